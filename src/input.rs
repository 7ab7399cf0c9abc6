// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 帧来源边界
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

use std::{fmt, time::Duration};

use async_trait::async_trait;
use image::RgbaImage;
use thiserror::Error;

use crate::frame::SurfaceTransform;

mod image_file;
pub use self::image_file::{ImageFileInput, ImageFileInputError};

mod upload;
pub use self::upload::{
  DEFAULT_ALLOWED_MIME_TYPES, DEFAULT_MAX_FILE_SIZE, MediaHandle, MediaUpload, UploadError,
  UploadPolicy, mime_from_path,
};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerCamera, GStreamerCameraBuilder, GStreamerInputError, GStreamerMediaOpener,
  GStreamerPlayback,
};

#[derive(Error, Debug)]
pub enum MediaLoadError {
  #[error("媒体无法打开: {0}")]
  Unavailable(String),
  #[error("媒体元数据未就绪")]
  MetadataUnavailable,
  #[error("媒体控制失败: {0}")]
  Control(String),
}

/// 摄像头朝向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FacingMode {
  User,
  #[default]
  Environment,
}

impl FacingMode {
  pub fn toggled(self) -> Self {
    match self {
      FacingMode::User => FacingMode::Environment,
      FacingMode::Environment => FacingMode::User,
    }
  }

  /// 前置摄像头画面镜像绘制，坐标计算不受影响
  pub fn transform(self) -> SurfaceTransform {
    match self {
      FacingMode::User => SurfaceTransform::MirrorHorizontal,
      FacingMode::Environment => SurfaceTransform::Identity,
    }
  }
}

impl fmt::Display for FacingMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FacingMode::User => write!(f, "user"),
      FacingMode::Environment => write!(f, "environment"),
    }
  }
}

/// 实时设备流：帧总是“当前”的，偶尔不可用
pub trait LiveSource: Send {
  /// 设备暂时无帧时返回 `None`，调用方静默跳过
  fn grab(&mut self) -> Option<RgbaImage>;

  fn facing(&self) -> FacingMode;

  fn switch_facing(&mut self, facing: FacingMode) -> Result<(), MediaLoadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
  Playing,
  Paused,
  Ended,
  /// 播放中出现解码或管线错误，原因由 [`PlaybackSource::take_error`] 取出
  Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaMetadata {
  pub width: u32,
  pub height: u32,
  pub duration: Option<Duration>,
}

/// 独立推进的播放元素，帧与播放位置绑定
pub trait PlaybackSource: Send {
  fn metadata(&self) -> MediaMetadata;

  fn play(&mut self) -> Result<(), MediaLoadError>;

  fn pause(&mut self) -> Result<(), MediaLoadError>;

  /// 回到位置 0
  fn rewind(&mut self) -> Result<(), MediaLoadError>;

  fn status(&mut self) -> PlaybackStatus;

  /// 取出导致 [`PlaybackStatus::Failed`] 的错误
  fn take_error(&mut self) -> Option<MediaLoadError> {
    None
  }

  /// 当前显示的帧
  fn current_frame(&mut self) -> Option<RgbaImage>;

  /// 释放底层媒体资源，只能经由 [`MediaHandle`] 调用
  fn release(&mut self);
}

/// 打开已校验的上传文件，元数据就绪后才返回
#[async_trait]
pub trait MediaOpener: Send + Sync {
  async fn open(&self, upload: &MediaUpload) -> Result<Box<dyn PlaybackSource>, MediaLoadError>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_facing_is_environment() {
    assert_eq!(FacingMode::default(), FacingMode::Environment);
    assert_eq!(FacingMode::default().transform(), SurfaceTransform::Identity);
  }

  #[test]
  fn user_facing_is_mirrored() {
    let facing = FacingMode::Environment.toggled();
    assert_eq!(facing, FacingMode::User);
    assert_eq!(facing.transform(), SurfaceTransform::MirrorHorizontal);
    assert_eq!(facing.toggled(), FacingMode::Environment);
  }
}
