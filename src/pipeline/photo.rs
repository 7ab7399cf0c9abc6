// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline/photo.rs - 单张图片检测
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

use async_trait::async_trait;
use image::RgbaImage;
use tracing::{info, warn};

use crate::{
  error::PipelineError,
  frame::SurfaceTransform,
  input::ImageFileInput,
  pipeline::{CycleReport, PipelineController, PipelineCore, PipelineEvent, SchedulePolicy},
};

#[derive(Debug, Clone)]
pub enum PhotoCommand {
  Select(ImageFileInput),
}

pub struct PhotoOneShot {
  core: PipelineCore,
  image: Option<ImageFileInput>,
}

impl PhotoOneShot {
  pub fn new(core: PipelineCore) -> Self {
    Self { core, image: None }
  }

  pub fn with_image(mut self, image: ImageFileInput) -> Self {
    self.select(image);
    self
  }

  pub fn image(&self) -> Option<&ImageFileInput> {
    self.image.as_ref()
  }

  fn select(&mut self, image: ImageFileInput) {
    if self.core.is_active() {
      self.core.halt();
    }
    let (width, height) = image.dimensions();
    info!("选择图片: {} ({}x{})", image.path().display(), width, height);
    self.core.surface_mut().invalidate();
    self.image = Some(image);
    self.core.notify(PipelineEvent::Ready { width, height });
  }
}

#[async_trait]
impl PipelineController for PhotoOneShot {
  type Command = PhotoCommand;

  fn policy(&self) -> SchedulePolicy {
    SchedulePolicy::OneShot
  }

  fn core(&self) -> &PipelineCore {
    &self.core
  }

  fn core_mut(&mut self) -> &mut PipelineCore {
    &mut self.core
  }

  async fn start(&mut self) -> Result<(), PipelineError> {
    if self.image.is_none() {
      warn!("尚未选择图片，忽略检测");
      return Ok(());
    }
    if self.core.is_active() {
      warn!("检测进行中，忽略开始");
      return Ok(());
    }
    self.core.start();
    Ok(())
  }

  async fn stop(&mut self) -> Result<(), PipelineError> {
    self.core.stop();
    Ok(())
  }

  async fn command(&mut self, command: PhotoCommand) -> Result<(), PipelineError> {
    match command {
      PhotoCommand::Select(image) => self.select(image),
    }
    Ok(())
  }

  fn capture(&mut self) -> Option<(RgbaImage, SurfaceTransform)> {
    let image = self.image.as_ref()?;
    Some((image.image().clone(), SurfaceTransform::Identity))
  }

  fn on_cycle_complete(&mut self, report: &CycleReport) {
    info!("图片检测完成: {} 个目标", report.detections.len());
    self.core.finish();
  }
}
