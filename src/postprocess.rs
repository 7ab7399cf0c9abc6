// 该文件是 Shanan （山南西风） 项目的一部分。
// src/postprocess.rs - 推理后处理
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

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  config::{CONFIDENCE_THRESHOLD, Resolution},
  frame::FrameSurface,
  model::CocoLabel,
  output::draw::Overlay,
  tensor::Tensor,
};

/// 每条检测记录的宽度: [x0, y0, x1, y1, confidence, classId]
pub const RECORD_STRIDE: usize = 6;

#[derive(Error, Debug)]
pub enum PostprocessError {
  #[error("输出张量形状无效: {0:?}")]
  MalformedShape(Vec<usize>),
  #[error("记录区长度 {0} 不是 {RECORD_STRIDE} 的整数倍")]
  PartialRecord(usize),
  #[error("第 {index} 条记录的类别编号 {raw} 不在类别表中")]
  UnknownClass { index: usize, raw: f32 },
}

/// 显示坐标系下的边界框
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
  pub x0: i32,
  pub y0: i32,
  pub x1: i32,
  pub y1: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
  pub class_name: CocoLabel,
  /// 百分比，保留一位小数
  pub score: f32,
  pub bounding_box: BoundingBox,
  pub timestamp: DateTime<Local>,
}

// 与显示端一致的四舍五入（.5 向正无穷）
fn round_half_up(v: f64) -> f64 {
  (v + 0.5).floor()
}

/// 原始输出张量 → 检测结果，并把结果叠加绘制到帧表面
///
/// 按输入顺序输出，不排序，不做 NMS。
#[derive(Debug, Clone)]
pub struct Postprocessor {
  resolution: Resolution,
  threshold: f32,
  overlay: Overlay,
}

impl Postprocessor {
  pub fn new(resolution: Resolution) -> Self {
    Self {
      resolution,
      threshold: CONFIDENCE_THRESHOLD,
      overlay: Overlay::default(),
    }
  }

  pub fn with_overlay(mut self, overlay: Overlay) -> Self {
    self.overlay = overlay;
    self
  }

  /// 解码记录流，`surface` 为显示表面尺寸
  pub fn decode(
    &self,
    output: &Tensor,
    surface: (u32, u32),
    timestamp: DateTime<Local>,
  ) -> Result<Vec<DetectionResult>, PostprocessError> {
    let dims = output.dims();
    if dims.len() < 2 {
      return Err(PostprocessError::MalformedShape(dims.to_vec()));
    }
    let span = dims[1];
    if span % RECORD_STRIDE != 0 {
      return Err(PostprocessError::PartialRecord(span));
    }

    let dx = surface.0 as f64 / self.resolution.width as f64;
    let dy = surface.1 as f64 / self.resolution.height as f64;

    let records = output
      .data()
      .get(..span)
      .ok_or_else(|| PostprocessError::MalformedShape(dims.to_vec()))?;

    let mut results = Vec::new();
    for (index, record) in records.chunks_exact(RECORD_STRIDE).enumerate() {
      let [x0, y0, x1, y1, confidence, class_id] = [
        record[0], record[1], record[2], record[3], record[4], record[5],
      ];
      // NaN 同样被丢弃
      if !(confidence >= self.threshold) {
        continue;
      }

      let class_name = CocoLabel::from_raw(class_id).ok_or(PostprocessError::UnknownClass {
        index,
        raw: class_id,
      })?;

      let bounding_box = BoundingBox {
        x0: round_half_up(x0 as f64 * dx) as i32,
        y0: round_half_up(y0 as f64 * dy) as i32,
        x1: round_half_up(x1 as f64 * dx) as i32,
        y1: round_half_up(y1 as f64 * dy) as i32,
      };
      let score = (round_half_up(confidence as f64 * 1000.0) / 10.0) as f32;

      results.push(DetectionResult {
        class_name,
        score,
        bounding_box,
        timestamp,
      });
    }

    debug!(
      "后处理完成: {} 条记录, {} 个目标",
      span / RECORD_STRIDE,
      results.len()
    );
    Ok(results)
  }

  pub fn process(
    &self,
    output: &Tensor,
    surface: &mut FrameSurface,
    timestamp: DateTime<Local>,
  ) -> Result<Vec<DetectionResult>, PostprocessError> {
    let results = self.decode(output, surface.dimensions(), timestamp)?;
    for result in &results {
      self.overlay.draw_detection(surface.image_mut(), result);
    }
    Ok(results)
  }
}
