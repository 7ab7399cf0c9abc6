// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/photo_oneshot.rs - 单张图片检测
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
  input::ImageFileInput,
  model::{InferenceClient, TractBackend},
  pipeline::{self, PhotoOneShot},
  shutdown,
};

/// 对一张图片运行一次检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图片，例如 image:///path/to/photo.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

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

  let image = ImageFileInput::from_url(&args.input)?;
  let config = args.model.model_config()?;
  let client = InferenceClient::load(&TractBackend::new(&args.model.weights_dir), &config)?;
  let core = args.model.build_core(&config, client)?;

  let cancel = CancellationToken::new();
  shutdown::cancel_on_interrupt(cancel.clone())?;

  let controller = PhotoOneShot::new(core).with_image(image);
  let handle = pipeline::spawn(
    controller,
    pipeline::refresh_ticks(args.refresh.refresh_hz),
    cancel.clone(),
  );
  let events = handle.subscribe();
  handle.start().await?;

  let summary = pipeline::monitor(events, Some(1), cancel.clone()).await;
  handle.cancel();
  handle.join().await?;

  if let Some(message) = summary.errors.first() {
    bail!("{}", message);
  }
  info!("检测完成: {} 个目标", summary.detections);
  Ok(())
}
