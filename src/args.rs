// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 命令行参数
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

//! 各个可执行程序共用的参数组，通过 `#[command(flatten)]` 组合。

use std::{path::PathBuf, time::Duration};

use clap::Args;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl,
  config::{ConfigError, DEFAULT_REFRESH_HZ, ModelConfig},
  input::{DEFAULT_ALLOWED_MIME_TYPES, DEFAULT_MAX_FILE_SIZE, UploadPolicy},
  model::InferenceClient,
  output::{OutputError, OutputWrapper, draw::Overlay, draw::OverlayError},
  pipeline::PipelineCore,
};

#[derive(Error, Debug)]
pub enum ArgsError {
  #[error("模型配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("字体加载错误: {0}")]
  Overlay(#[from] OverlayError),
  #[error("输出配置错误: {0}")]
  Output(#[from] OutputError),
}

/// 模型与检测输出
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
  /// 模型目录索引，见 `MODEL_CATALOG`
  #[arg(long, value_name = "INDEX", default_value_t = 0)]
  pub model_index: usize,

  /// ONNX 权重目录
  #[arg(long, value_name = "DIR", default_value = "weights")]
  pub weights_dir: PathBuf,

  /// 单次推理超时（毫秒），不设置则无限等待
  #[arg(long, value_name = "MS")]
  pub inference_timeout_ms: Option<u64>,

  /// 标签字体文件，不设置时使用内置字体
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 结果记录最多保留的条数，不设置则不限
  #[arg(long, value_name = "COUNT")]
  pub result_log_capacity: Option<usize>,

  /// 输出路径
  /// - image:///path/to/out.png
  /// - folder:///path/to/dir?record=name&always
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
}

impl ModelArgs {
  pub fn model_config(&self) -> Result<ModelConfig, ConfigError> {
    ModelConfig::from_catalog(self.model_index)
  }

  pub fn inference_timeout(&self) -> Option<Duration> {
    self.inference_timeout_ms.map(Duration::from_millis)
  }

  pub fn overlay(&self) -> Result<Overlay, OverlayError> {
    match &self.font {
      Some(path) => Overlay::from_font_file(path),
      None => Ok(Overlay::default()),
    }
  }

  pub fn sink(&self) -> Result<Option<OutputWrapper>, OutputError> {
    self.output.as_ref().map(OutputWrapper::from_url).transpose()
  }

  /// 按参数组装管线内核
  pub fn build_core(
    &self,
    config: &ModelConfig,
    client: InferenceClient,
  ) -> Result<PipelineCore, ArgsError> {
    let mut core = PipelineCore::new(config, client.with_timeout(self.inference_timeout()))
      .with_overlay(self.overlay()?)
      .with_result_capacity(self.result_log_capacity);
    if let Some(sink) = self.sink()? {
      info!("输出路径: {}", self.output.as_ref().map(Url::as_str).unwrap_or_default());
      core = core.with_sink(sink);
    }
    Ok(core)
  }
}

/// 显示刷新信号
#[derive(Args, Debug, Clone)]
pub struct RefreshArgs {
  /// 刷新频率（Hz）
  #[arg(long, value_name = "HZ", default_value_t = DEFAULT_REFRESH_HZ)]
  pub refresh_hz: u32,
}

/// 视频上传限制
#[derive(Args, Debug, Clone)]
pub struct UploadArgs {
  /// 上传文件大小上限（字节）
  #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_FILE_SIZE)]
  pub max_file_size: u64,

  /// 允许的 MIME 类型，逗号分隔
  #[arg(
    long,
    value_name = "MIME",
    value_delimiter = ',',
    default_values_t = DEFAULT_ALLOWED_MIME_TYPES.map(String::from)
  )]
  pub allowed_mime_types: Vec<String>,
}

impl UploadArgs {
  pub fn policy(&self) -> UploadPolicy {
    UploadPolicy {
      max_file_size: self.max_file_size,
      allowed_mime_types: self.allowed_mime_types.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use clap::Parser;

  use super::*;

  #[derive(Parser, Debug)]
  struct TestArgs {
    #[command(flatten)]
    model: ModelArgs,
    #[command(flatten)]
    refresh: RefreshArgs,
    #[command(flatten)]
    upload: UploadArgs,
  }

  #[test]
  fn defaults_match_config() {
    let args = TestArgs::parse_from(["test"]);
    assert_eq!(args.model.model_index, 0);
    assert_eq!(args.model.inference_timeout(), None);
    assert_eq!(args.refresh.refresh_hz, DEFAULT_REFRESH_HZ);
    assert_eq!(args.upload.policy(), UploadPolicy::default());
  }

  #[test]
  fn mime_list_is_comma_separated() {
    let args = TestArgs::parse_from([
      "test",
      "--allowed-mime-types",
      "video/mp4,video/webm",
      "--inference-timeout-ms",
      "250",
    ]);
    assert_eq!(
      args.upload.allowed_mime_types,
      vec!["video/mp4".to_string(), "video/webm".to_string()]
    );
    assert_eq!(
      args.model.inference_timeout(),
      Some(Duration::from_millis(250))
    );
  }

  #[test]
  fn unknown_output_scheme_is_rejected() {
    let args = TestArgs::parse_from(["test", "--output", "rtsp://localhost/live"]);
    assert!(matches!(
      args.model.sink(),
      Err(OutputError::SchemeMismatch(_))
    ));
  }
}
