// 该文件是 Shanan （山南西风） 项目的一部分。
// src/tensor.rs - 张量定义
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

use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TensorError {
  #[error("数据长度不匹配: 形状 {dims:?} 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch {
    dims: Vec<usize>,
    expected: usize,
    actual: usize,
  },
  #[error("张量形状为空")]
  EmptyShape,
}

/// 与推理引擎交换的不可变 f32 张量
///
/// 克隆只复制形状，数据共享。
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  dims: Box<[usize]>,
  data: Arc<[f32]>,
}

impl Tensor {
  pub fn new(
    dims: impl Into<Box<[usize]>>,
    data: impl Into<Arc<[f32]>>,
  ) -> Result<Self, TensorError> {
    let dims = dims.into();
    let data = data.into();
    if dims.is_empty() {
      return Err(TensorError::EmptyShape);
    }
    let expected = dims.iter().product::<usize>();
    if expected != data.len() {
      return Err(TensorError::LengthMismatch {
        dims: dims.to_vec(),
        expected,
        actual: data.len(),
      });
    }
    Ok(Self { dims, data })
  }

  pub fn dims(&self) -> &[usize] {
    &self.dims
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }
}
