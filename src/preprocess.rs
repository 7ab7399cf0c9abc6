// 该文件是 Shanan （山南西风） 项目的一部分。
// src/preprocess.rs - 推理前处理
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

use image::imageops::{self, FilterType};
use thiserror::Error;
use tracing::debug;

use crate::{
  config::Resolution,
  frame::FrameSurface,
  tensor::{Tensor, TensorError},
};

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("帧表面为空，无法前处理")]
  EmptySurface,
  #[error("前处理输出形状 {actual:?} 与模型分辨率 {expected} 不符")]
  ShapeMismatch {
    expected: Resolution,
    actual: Vec<usize>,
  },
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
}

/// 帧表面 → NCHW 张量
///
/// 直接拉伸到模型分辨率（不做 letterbox），丢弃 alpha，
/// 从交错像素重排为通道平面，并缩放到 [0, 1]。
/// 在缩放后的副本上操作，不修改原始表面。
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
  resolution: Resolution,
  filter: FilterType,
}

impl Preprocessor {
  pub fn new(resolution: Resolution) -> Self {
    Self {
      resolution,
      filter: FilterType::Triangle,
    }
  }

  pub fn with_filter(mut self, filter: FilterType) -> Self {
    self.filter = filter;
    self
  }

  pub fn resolution(&self) -> Resolution {
    self.resolution
  }

  pub fn process(&self, surface: &FrameSurface) -> Result<Tensor, PreprocessError> {
    if surface.is_empty() {
      return Err(PreprocessError::EmptySurface);
    }

    let Resolution { width, height } = self.resolution;
    let resized = imageops::resize(surface.image(), width, height, self.filter);

    let (w, h) = (width as usize, height as usize);
    let plane = w * h;
    let mut data = vec![0f32; RGB_CHANNELS * plane];
    for (idx, pixel) in resized.pixels().enumerate() {
      for c in 0..RGB_CHANNELS {
        data[c * plane + idx] = pixel[c] as f32 / 255.0;
      }
    }

    let tensor = Tensor::new(vec![1, RGB_CHANNELS, h, w], data)?;
    if tensor.dims() != [1, RGB_CHANNELS, h, w] {
      return Err(PreprocessError::ShapeMismatch {
        expected: self.resolution,
        actual: tensor.dims().to_vec(),
      });
    }

    debug!(
      "前处理完成: {}x{} -> {:?}",
      surface.width(),
      surface.height(),
      tensor.dims()
    );
    Ok(tensor)
  }
}
