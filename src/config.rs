// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 模型与管线配置
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

use std::fmt;

use thiserror::Error;

/// 置信度阈值，低于该值的检测记录被丢弃
pub const CONFIDENCE_THRESHOLD: f32 = 0.5;
/// FPS 滚动窗口容量
pub const METRICS_WINDOW_SIZE: usize = 30;
/// 默认显示刷新率
pub const DEFAULT_REFRESH_HZ: u32 = 60;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
  #[error("模型索引越界: {0}, 可选范围 0..{1}")]
  ModelIndexOutOfRange(usize, usize),
  #[error("无效的分辨率: {0}x{1}")]
  InvalidResolution(u32, u32),
}

/// 网络规模
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
  Nano,
  Medium,
}

impl ModelVariant {
  pub fn weights_identifier(&self) -> &'static str {
    match self {
      ModelVariant::Nano => "yolov10n200e.onnx",
      ModelVariant::Medium => "yolov10m200e.onnx",
    }
  }
}

impl fmt::Display for ModelVariant {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ModelVariant::Nano => write!(f, "yolov10n"),
      ModelVariant::Medium => write!(f, "yolov10m"),
    }
  }
}

/// 模型输入分辨率
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
  pub width: u32,
  pub height: u32,
}

impl Resolution {
  pub const fn square(side: u32) -> Self {
    Self {
      width: side,
      height: side,
    }
  }
}

impl fmt::Display for Resolution {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}

/// 会话级模型配置，选定后不可变，切换模型需要重建管线
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
  resolution: Resolution,
  weights_identifier: String,
}

impl ModelConfig {
  pub fn new(
    resolution: Resolution,
    weights_identifier: impl Into<String>,
  ) -> Result<Self, ConfigError> {
    if resolution.width == 0 || resolution.height == 0 {
      return Err(ConfigError::InvalidResolution(
        resolution.width,
        resolution.height,
      ));
    }
    Ok(Self {
      resolution,
      weights_identifier: weights_identifier.into(),
    })
  }

  /// 按目录索引选择模型
  pub fn from_catalog(index: usize) -> Result<Self, ConfigError> {
    let (variant, resolution) = MODEL_CATALOG
      .get(index)
      .copied()
      .ok_or(ConfigError::ModelIndexOutOfRange(index, MODEL_CATALOG.len()))?;
    Self::new(resolution, variant.weights_identifier())
  }

  pub fn resolution(&self) -> Resolution {
    self.resolution
  }

  pub fn weights_identifier(&self) -> &str {
    &self.weights_identifier
  }
}

/// 可选模型：网络规模 × 输入分辨率
pub const MODEL_CATALOG: [(ModelVariant, Resolution); 8] = [
  (ModelVariant::Nano, Resolution::square(160)),
  (ModelVariant::Nano, Resolution::square(256)),
  (ModelVariant::Nano, Resolution::square(320)),
  (ModelVariant::Nano, Resolution::square(640)),
  (ModelVariant::Medium, Resolution::square(160)),
  (ModelVariant::Medium, Resolution::square(256)),
  (ModelVariant::Medium, Resolution::square(320)),
  (ModelVariant::Medium, Resolution::square(640)),
];

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn catalog_maps_to_weights_and_resolution() {
    let first = ModelConfig::from_catalog(0).unwrap();
    assert_eq!(first.resolution(), Resolution::square(160));
    assert_eq!(first.weights_identifier(), "yolov10n200e.onnx");

    let last = ModelConfig::from_catalog(7).unwrap();
    assert_eq!(last.resolution(), Resolution::square(640));
    assert_eq!(last.weights_identifier(), "yolov10m200e.onnx");
  }

  #[test]
  fn catalog_index_out_of_range() {
    assert_eq!(
      ModelConfig::from_catalog(8),
      Err(ConfigError::ModelIndexOutOfRange(8, 8))
    );
  }

  #[test]
  fn zero_resolution_is_rejected() {
    let res = Resolution {
      width: 0,
      height: 320,
    };
    assert!(ModelConfig::new(res, "x.onnx").is_err());
  }
}
