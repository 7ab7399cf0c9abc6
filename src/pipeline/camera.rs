// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline/camera.rs - 摄像头连续检测
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
  input::LiveSource,
  pipeline::{PipelineController, PipelineCore, SchedulePolicy},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraCommand {
  /// 在前置与后置摄像头之间切换
  SwitchFacing,
}

/// 绑定显示刷新信号，槽位忙时丢弃该次刷新
pub struct CameraLoop<S> {
  core: PipelineCore,
  source: S,
}

impl<S: LiveSource> CameraLoop<S> {
  pub fn new(core: PipelineCore, source: S) -> Self {
    Self { core, source }
  }

  pub fn source(&self) -> &S {
    &self.source
  }
}

#[async_trait]
impl<S: LiveSource> PipelineController for CameraLoop<S> {
  type Command = CameraCommand;

  fn policy(&self) -> SchedulePolicy {
    SchedulePolicy::DropOnOverlap
  }

  fn core(&self) -> &PipelineCore {
    &self.core
  }

  fn core_mut(&mut self) -> &mut PipelineCore {
    &mut self.core
  }

  async fn start(&mut self) -> Result<(), PipelineError> {
    if self.core.is_active() {
      warn!("检测已在运行，忽略开始");
      return Ok(());
    }
    info!("开始摄像头检测 ({})", self.source.facing());
    self.core.start();
    Ok(())
  }

  async fn stop(&mut self) -> Result<(), PipelineError> {
    self.core.stop();
    Ok(())
  }

  async fn command(&mut self, command: CameraCommand) -> Result<(), PipelineError> {
    match command {
      CameraCommand::SwitchFacing => {
        let facing = self.source.facing().toggled();
        if self.core.is_active() {
          self.core.stop();
        } else {
          self.core.reset_stats();
        }
        info!("切换摄像头: {}", facing);
        self.source.switch_facing(facing)?;
        Ok(())
      }
    }
  }

  fn capture(&mut self) -> Option<(RgbaImage, SurfaceTransform)> {
    let frame = self.source.grab()?;
    Some((frame, self.source.facing().transform()))
  }
}
