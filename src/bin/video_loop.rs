// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/video_loop.rs - 视频文件同步检测
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use shanan_uav::{
  args::{ModelArgs, RefreshArgs, UploadArgs},
  input::{GStreamerMediaOpener, MediaUpload},
  model::{InferenceClient, TractBackend},
  pipeline::{self, VideoCommand, VideoLoop},
  shutdown,
};

/// 视频文件检测，检测叠加层跟随播放进度
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 视频文件路径
  #[arg(long, value_name = "FILE")]
  pub input: PathBuf,

  /// 完成多少个周期后退出，0 表示播放到结束
  #[arg(long, value_name = "FRAME_NUMBER", default_value_t = 0)]
  pub frame_number: u64,

  #[command(flatten)]
  pub model: ModelArgs,

  #[command(flatten)]
  pub refresh: RefreshArgs,

  #[command(flatten)]
  pub upload: UploadArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("输入来源: {}", args.input.display());

  let upload = MediaUpload::from_path(&args.input)?;
  let config = args.model.model_config()?;
  let client = InferenceClient::load(&TractBackend::new(&args.model.weights_dir), &config)?;
  let core = args.model.build_core(&config, client)?;

  let cancel = CancellationToken::new();
  shutdown::cancel_on_interrupt(cancel.clone())?;

  let controller = VideoLoop::new(core, GStreamerMediaOpener).with_upload_policy(args.upload.policy());
  let handle = pipeline::spawn(
    controller,
    pipeline::refresh_ticks(args.refresh.refresh_hz),
    cancel.clone(),
  );
  let events = handle.subscribe();
  handle.command(VideoCommand::Select(upload)).await?;
  handle.start().await?;

  let limit = (args.frame_number > 0).then_some(args.frame_number);
  let summary = pipeline::monitor(events, limit, cancel.clone()).await;
  handle.cancel();
  let driver = handle.join().await?;

  info!(
    "检测结束: {} 个周期, {} 个目标, {} 个过期结果",
    summary.cycles, summary.detections, driver.stale_results
  );
  if let Some(message) = summary.errors.first() {
    bail!("{}", message);
  }
  Ok(())
}
