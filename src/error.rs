// 该文件是 Shanan （山南西风） 项目的一部分。
// src/error.rs - 管线错误分类
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

use thiserror::Error;

use crate::{
  input::{MediaLoadError, UploadError},
  model::InferenceError,
  postprocess::PostprocessError,
  preprocess::PreprocessError,
};

/// 检测周期内的致命错误来源
#[derive(Error, Debug)]
pub enum CycleFailure {
  #[error("预处理失败: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("{0}")]
  Inference(#[from] InferenceError),
  #[error("后处理失败: {0}")]
  Postprocess(#[from] PostprocessError),
}

#[derive(Error, Debug)]
pub enum PipelineError {
  /// 本次刷新没有可用帧，下一次刷新重试
  #[error("当前没有可用帧")]
  CaptureUnavailable,
  #[error("上传被拒绝: {0}")]
  UnsupportedUpload(#[from] UploadError),
  #[error("媒体加载失败: {0}")]
  MediaLoadFailure(#[from] MediaLoadError),
  #[error("推理失败: {0}")]
  InferenceFailure(#[from] CycleFailure),
}

impl From<PreprocessError> for PipelineError {
  fn from(err: PreprocessError) -> Self {
    PipelineError::InferenceFailure(err.into())
  }
}

impl From<InferenceError> for PipelineError {
  fn from(err: InferenceError) -> Self {
    PipelineError::InferenceFailure(err.into())
  }
}

impl From<PostprocessError> for PipelineError {
  fn from(err: PostprocessError) -> Self {
    PipelineError::InferenceFailure(err.into())
  }
}

impl PipelineError {
  /// 只有取帧失败是可静默吸收的
  pub fn is_fatal(&self) -> bool {
    !matches!(self, PipelineError::CaptureUnavailable)
  }

  /// 面向操作员的单条提示
  pub fn user_message(&self) -> String {
    match self {
      PipelineError::CaptureUnavailable => "No frame available.".to_string(),
      PipelineError::UnsupportedUpload(UploadError::UnsupportedType { allowed, .. }) => {
        let formats: Vec<&str> = allowed
          .iter()
          .map(|m| m.split('/').nth(1).unwrap_or(m.as_str()))
          .collect();
        format!("Invalid format. Supported: {}", formats.join(", "))
      }
      PipelineError::UnsupportedUpload(UploadError::TooLarge { limit, .. }) => {
        format!("File exceeds {}MB limit", limit / (1024 * 1024))
      }
      PipelineError::UnsupportedUpload(UploadError::Unreadable { .. })
      | PipelineError::MediaLoadFailure(_) => "Failed to load video. Please try again.".to_string(),
      PipelineError::InferenceFailure(_) => {
        "Error processing video frames. Please try again.".to_string()
      }
    }
  }
}
