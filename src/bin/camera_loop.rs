// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/camera_loop.rs - 摄像头实时检测
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

use anyhow::{Result, bail};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use shanan_uav::{
  FromUrl,
  args::{ModelArgs, RefreshArgs},
  input::GStreamerCameraBuilder,
  model::{InferenceClient, TractBackend},
  pipeline::{self, CameraLoop},
  shutdown,
};

/// 摄像头连续检测，按刷新频率调度
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 摄像头，例如 camera://v4l2/dev/video0?user=/dev/video1
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 完成多少个周期后退出，0 表示不限
  #[arg(long, value_name = "FRAME_NUMBER", default_value_t = 0)]
  pub frame_number: u64,

  #[command(flatten)]
  pub model: ModelArgs,

  #[command(flatten)]
  pub refresh: RefreshArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("输入来源: {}", args.input);

  let camera = GStreamerCameraBuilder::from_url(&args.input)?.build()?;
  let config = args.model.model_config()?;
  let client = InferenceClient::load(&TractBackend::new(&args.model.weights_dir), &config)?;
  let core = args.model.build_core(&config, client)?;

  let cancel = CancellationToken::new();
  shutdown::cancel_on_interrupt(cancel.clone())?;

  let handle = pipeline::spawn(
    CameraLoop::new(core, camera),
    pipeline::refresh_ticks(args.refresh.refresh_hz),
    cancel.clone(),
  );
  let events = handle.subscribe();
  handle.start().await?;

  let limit = (args.frame_number > 0).then_some(args.frame_number);
  let summary = pipeline::monitor(events, limit, cancel.clone()).await;
  handle.cancel();
  let driver = handle.join().await?;

  info!(
    "检测结束: {} 个周期, {} 个目标, 丢弃 {} 次刷新",
    summary.cycles, summary.detections, driver.ticks_dropped
  );
  if let Some(message) = summary.errors.first() {
    bail!("{}", message);
  }
  Ok(())
}
