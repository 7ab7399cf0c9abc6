// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::warn;

use crate::postprocess::{BoundingBox, DetectionResult};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_BASELINE_OFFSET: i32 = 5;
const BOX_LINE_WIDTH: u32 = 2;

/// 内置标签字体
static DEFAULT_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

#[derive(Error, Debug)]
pub enum OverlayError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无法加载字体文件: {0}")]
  InvalidFont(String),
}

/// 置信度到颜色的插值：低置信度偏红，高置信度偏绿
pub fn confidence_color(confidence: f32) -> Rgba<u8> {
  let c = confidence.clamp(0.0, 1.0);
  let r = (255.0 * (1.0 - c)).round() as u8;
  let g = (255.0 * c).round() as u8;
  Rgba([r, g, 0, 255])
}

/// 检测框与标签叠加层
///
/// 默认使用内置字体，字体不可用时只绘制边框。
#[derive(Clone)]
pub struct Overlay {
  font: Option<FontArc>,
  font_scale: PxScale,
  line_width: u32,
}

impl Default for Overlay {
  fn default() -> Self {
    let font = FontArc::try_from_slice(DEFAULT_FONT)
      .map_err(|e| warn!("内置字体无法解析，只绘制检测框: {}", e))
      .ok();
    Self {
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      line_width: BOX_LINE_WIDTH,
    }
  }
}

impl std::fmt::Debug for Overlay {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Overlay")
      .field("font", &self.font.is_some())
      .field("font_scale", &self.font_scale.y)
      .field("line_width", &self.line_width)
      .finish()
  }
}

impl Overlay {
  pub fn from_font_file(path: impl AsRef<Path>) -> Result<Self, OverlayError> {
    let data = std::fs::read(path.as_ref())?;
    let font = FontArc::try_from_vec(data)
      .map_err(|e| OverlayError::InvalidFont(format!("{}: {}", path.as_ref().display(), e)))?;
    Ok(Self::default().with_font(font))
  }

  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  /// 不绘制标签文字
  pub fn without_labels(mut self) -> Self {
    self.font = None;
    self
  }

  pub fn has_labels(&self) -> bool {
    self.font.is_some()
  }

  pub fn draw_detection(&self, image: &mut RgbaImage, result: &DetectionResult) {
    let confidence = result.score / 100.0;
    let color = confidence_color(confidence);
    self.draw_box(image, &result.bounding_box, color);

    if let Some(font) = &self.font {
      let label = format!(
        "{} {}%",
        result.class_name,
        (confidence * 100.0).round() as i32
      );
      let x = result.bounding_box.x0.max(0);
      let y = (result.bounding_box.y0 - LABEL_BASELINE_OFFSET - self.font_scale.y as i32).max(0);
      draw_text_mut(image, color, x, y, self.font_scale, font, &label);
    }
  }

  fn draw_box(&self, image: &mut RgbaImage, bbox: &BoundingBox, color: Rgba<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }
    let x_min = bbox.x0.min(bbox.x1).clamp(0, w - 1);
    let y_min = bbox.y0.min(bbox.y1).clamp(0, h - 1);
    let x_max = bbox.x0.max(bbox.x1).clamp(0, w - 1);
    let y_max = bbox.y0.max(bbox.y1).clamp(0, h - 1);

    // 逐层内缩绘制以获得线宽
    for inset in 0..self.line_width as i32 {
      let width = x_max - x_min + 1 - 2 * inset;
      let height = y_max - y_min + 1 - 2 * inset;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + inset, y_min + inset).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }
  }
}
