// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/upload.rs - 视频上传校验与媒体句柄
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::input::{MediaMetadata, PlaybackSource};

pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
pub const DEFAULT_ALLOWED_MIME_TYPES: [&str; 3] = ["video/mp4", "video/webm", "video/ogg"];

#[derive(Error, Debug)]
pub enum UploadError {
  #[error("无法读取上传文件 {path}: {source}")]
  Unreadable {
    path: String,
    source: std::io::Error,
  },
  #[error("不支持的文件类型: {mime}")]
  UnsupportedType { mime: String, allowed: Vec<String> },
  #[error("文件大小 {size} 字节超过上限 {limit} 字节")]
  TooLarge { size: u64, limit: u64 },
}

/// 按扩展名推断 MIME 类型
pub fn mime_from_path(path: &Path) -> &'static str {
  let extension = path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_ascii_lowercase());
  match extension.as_deref() {
    Some("mp4") | Some("m4v") => "video/mp4",
    Some("webm") => "video/webm",
    Some("ogg") | Some("ogv") => "video/ogg",
    _ => "application/octet-stream",
  }
}

/// 待校验的上传文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
  pub path: PathBuf,
  pub mime: String,
  pub size: u64,
}

impl MediaUpload {
  pub fn new(path: impl Into<PathBuf>, mime: impl Into<String>, size: u64) -> Self {
    Self {
      path: path.into(),
      mime: mime.into(),
      size,
    }
  }

  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, UploadError> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path).map_err(|source| UploadError::Unreadable {
      path: path.display().to_string(),
      source,
    })?;
    Ok(Self::new(path, mime_from_path(path), metadata.len()))
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
  pub max_file_size: u64,
  pub allowed_mime_types: Vec<String>,
}

impl Default for UploadPolicy {
  fn default() -> Self {
    Self {
      max_file_size: DEFAULT_MAX_FILE_SIZE,
      allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
        .iter()
        .map(|m| m.to_string())
        .collect(),
    }
  }
}

impl UploadPolicy {
  /// 先校验类型，再校验大小
  pub fn validate(&self, upload: &MediaUpload) -> Result<(), UploadError> {
    if !self.allowed_mime_types.iter().any(|m| *m == upload.mime) {
      return Err(UploadError::UnsupportedType {
        mime: upload.mime.clone(),
        allowed: self.allowed_mime_types.clone(),
      });
    }
    if upload.size > self.max_file_size {
      return Err(UploadError::TooLarge {
        size: upload.size,
        limit: self.max_file_size,
      });
    }
    debug!(
      "上传文件校验通过: {} ({}, {} 字节)",
      upload.path.display(),
      upload.mime,
      upload.size
    );
    Ok(())
  }
}

/// 已打开的可播放媒体，底层资源恰好释放一次
///
/// 显式 `release` 与 `Drop` 都会释放，重复调用无效果。
pub struct MediaHandle {
  upload: MediaUpload,
  metadata: MediaMetadata,
  source: Option<Box<dyn PlaybackSource>>,
}

impl MediaHandle {
  pub fn new(upload: MediaUpload, source: Box<dyn PlaybackSource>) -> Self {
    let metadata = source.metadata();
    info!(
      "媒体就绪: {} ({}x{})",
      upload.path.display(),
      metadata.width,
      metadata.height
    );
    Self {
      upload,
      metadata,
      source: Some(source),
    }
  }

  pub fn upload(&self) -> &MediaUpload {
    &self.upload
  }

  pub fn metadata(&self) -> MediaMetadata {
    self.metadata
  }

  pub fn source_mut(&mut self) -> Option<&mut (dyn PlaybackSource + 'static)> {
    self.source.as_deref_mut()
  }

  pub fn is_released(&self) -> bool {
    self.source.is_none()
  }

  /// 返回本次调用是否真正释放了资源
  pub fn release(&mut self) -> bool {
    match self.source.take() {
      Some(mut source) => {
        source.release();
        info!("释放媒体资源: {}", self.upload.path.display());
        true
      }
      None => {
        debug!("媒体资源已释放: {}", self.upload.path.display());
        false
      }
    }
  }
}

impl Drop for MediaHandle {
  fn drop(&mut self) {
    if self.release() {
      warn!("媒体句柄在释放前被丢弃: {}", self.upload.path.display());
    }
  }
}
