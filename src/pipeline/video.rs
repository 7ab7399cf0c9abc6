// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline/video.rs - 视频播放同步检测
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
use tracing::{error, info, warn};

use crate::{
  error::PipelineError,
  frame::SurfaceTransform,
  input::{
    MediaHandle, MediaLoadError, MediaOpener, MediaUpload, PlaybackSource, PlaybackStatus,
    UploadPolicy,
  },
  pipeline::{PipelineController, PipelineCore, PipelineEvent, SchedulePolicy},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoCommand {
  /// 上传新的视频文件
  Select(MediaUpload),
}

/// 播放元素独立推进，上一周期完成后才安排下一周期
///
/// 元数据就绪前检测控制被禁用。
pub struct VideoLoop<O> {
  core: PipelineCore,
  opener: O,
  policy: UploadPolicy,
  media: Option<MediaHandle>,
}

impl<O: MediaOpener> VideoLoop<O> {
  pub fn new(core: PipelineCore, opener: O) -> Self {
    Self {
      core,
      opener,
      policy: UploadPolicy::default(),
      media: None,
    }
  }

  pub fn with_upload_policy(mut self, policy: UploadPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn is_ready(&self) -> bool {
    self.media.as_ref().is_some_and(|m| !m.is_released())
  }

  fn with_media<T>(
    &mut self,
    f: impl FnOnce(&mut (dyn PlaybackSource + 'static)) -> Result<T, MediaLoadError>,
  ) -> Result<Option<T>, MediaLoadError> {
    match self.media.as_mut().and_then(|m| m.source_mut()) {
      Some(source) => f(source).map(Some),
      None => Ok(None),
    }
  }

  /// 暂停并回到开头，清空统计
  fn halt_and_rewind(&mut self) -> Result<(), MediaLoadError> {
    self.core.stop();
    self.with_media(|source| {
      source.pause()?;
      source.rewind()
    })?;
    Ok(())
  }

  /// 播放，已播放结束的视频从头开始
  fn play_media(&mut self) -> Result<(), MediaLoadError> {
    self.with_media(|source| {
      if source.status() == PlaybackStatus::Ended {
        source.rewind()?;
      }
      source.play()
    })?;
    Ok(())
  }

  fn release_media(&mut self) {
    if let Some(mut media) = self.media.take() {
      media.release();
    }
    self.core.surface_mut().invalidate();
  }

  async fn load(&mut self, upload: MediaUpload) -> Result<(), PipelineError> {
    self.policy.validate(&upload)?;

    if let Err(e) = self.halt_and_rewind() {
      warn!("停止旧视频失败: {}", e);
    }
    self.release_media();
    self.core.dismiss_error();

    info!("加载视频: {}", upload.path.display());
    let source = self.opener.open(&upload).await?;
    let media = MediaHandle::new(upload, source);
    let metadata = media.metadata();
    self.media = Some(media);
    if metadata.width == 0 || metadata.height == 0 {
      self.release_media();
      return Err(MediaLoadError::MetadataUnavailable.into());
    }

    self.core.surface_mut().resize(metadata.width, metadata.height);
    self.core.notify(PipelineEvent::Ready {
      width: metadata.width,
      height: metadata.height,
    });
    Ok(())
  }
}

#[async_trait]
impl<O: MediaOpener> PipelineController for VideoLoop<O> {
  type Command = VideoCommand;

  fn policy(&self) -> SchedulePolicy {
    SchedulePolicy::WaitThenReschedule
  }

  fn core(&self) -> &PipelineCore {
    &self.core
  }

  fn core_mut(&mut self) -> &mut PipelineCore {
    &mut self.core
  }

  async fn start(&mut self) -> Result<(), PipelineError> {
    if !self.is_ready() {
      warn!("视频未就绪，忽略开始");
      return Ok(());
    }
    if self.core.is_active() {
      warn!("检测已在运行，忽略开始");
      return Ok(());
    }
    self.play_media()?;
    self.core.start();
    Ok(())
  }

  async fn pause(&mut self) -> Result<(), PipelineError> {
    self.with_media(|source| source.pause())?;
    self.core.halt();
    info!("视频检测暂停");
    Ok(())
  }

  async fn resume(&mut self) -> Result<(), PipelineError> {
    if !self.is_ready() {
      warn!("视频未就绪，忽略继续");
      return Ok(());
    }
    if self.core.is_active() {
      return Ok(());
    }
    self.play_media()?;
    self.core.resume();
    Ok(())
  }

  async fn stop(&mut self) -> Result<(), PipelineError> {
    self.halt_and_rewind()?;
    Ok(())
  }

  async fn command(&mut self, command: VideoCommand) -> Result<(), PipelineError> {
    match command {
      VideoCommand::Select(upload) => self.load(upload).await,
    }
  }

  fn capture(&mut self) -> Option<(RgbaImage, SurfaceTransform)> {
    let source = self.media.as_mut()?.source_mut()?;
    if source.status() != PlaybackStatus::Playing {
      return None;
    }
    let frame = source.current_frame()?;
    Some((frame, SurfaceTransform::Identity))
  }

  async fn on_cycle_failed(&mut self, error: PipelineError) {
    if let Err(e) = self.halt_and_rewind() {
      error!("停止视频失败: {}", e);
    }
    self.core.fail(error);
  }

  fn on_tick(&mut self) {
    if !self.core.is_active() || self.core.is_inferring() {
      return;
    }
    let Some(source) = self.media.as_mut().and_then(|m| m.source_mut()) else {
      return;
    };
    match source.status() {
      PlaybackStatus::Ended => {
        info!("视频播放结束，检测停止");
        self.core.finish();
        self.core.notify(PipelineEvent::Ended);
      }
      PlaybackStatus::Failed => {
        let cause = source
          .take_error()
          .unwrap_or_else(|| MediaLoadError::Unavailable("播放中断".to_string()));
        // 播放失败后媒体不可再用，需重新上传
        self.core.stop();
        self.release_media();
        self.core.fail(cause.into());
      }
      PlaybackStatus::Playing | PlaybackStatus::Paused => {}
    }
  }

  async fn close(&mut self) {
    self.release_media();
  }
}
