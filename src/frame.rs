// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - 帧表面定义
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

use image::{Rgba, RgbImage, RgbaImage, imageops};
use tracing::debug;

/// 绘制到表面时施加的变换
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SurfaceTransform {
  #[default]
  Identity,
  /// 水平镜像（前置摄像头）
  MirrorHorizontal,
}

/// 可写入、可读回的 RGBA 像素缓冲
///
/// 由当前活动的管线独占持有。源分辨率变化时整体重建。
#[derive(Debug, Clone)]
pub struct FrameSurface {
  pixels: RgbaImage,
}

impl Default for FrameSurface {
  fn default() -> Self {
    Self::new(0, 0)
  }
}

impl FrameSurface {
  pub fn new(width: u32, height: u32) -> Self {
    Self {
      pixels: RgbaImage::new(width, height),
    }
  }

  pub fn width(&self) -> u32 {
    self.pixels.width()
  }

  pub fn height(&self) -> u32 {
    self.pixels.height()
  }

  pub fn dimensions(&self) -> (u32, u32) {
    self.pixels.dimensions()
  }

  /// 尚未绘入任何帧或已失效
  pub fn is_empty(&self) -> bool {
    self.width() == 0 || self.height() == 0
  }

  /// 尺寸变化时重建缓冲，返回是否发生了重建
  pub fn resize(&mut self, width: u32, height: u32) -> bool {
    if self.dimensions() == (width, height) {
      return false;
    }
    debug!(
      "帧表面尺寸变化: {}x{} -> {}x{}",
      self.width(),
      self.height(),
      width,
      height
    );
    self.pixels = RgbaImage::new(width, height);
    true
  }

  /// 将一帧画入表面，表面尺寸跟随帧尺寸
  pub fn draw_frame(&mut self, frame: &RgbaImage, transform: SurfaceTransform) {
    let (width, height) = frame.dimensions();
    self.resize(width, height);
    match transform {
      SurfaceTransform::Identity => self.pixels.copy_from_slice(frame.as_raw()),
      SurfaceTransform::MirrorHorizontal => {
        let mirrored = imageops::flip_horizontal(frame);
        self.pixels.copy_from_slice(mirrored.as_raw());
      }
    }
  }

  /// 清空像素，保留尺寸
  pub fn clear(&mut self) {
    self.pixels.fill(0);
  }

  /// 丢弃缓冲与尺寸，下一帧绘入时重新分配
  pub fn invalidate(&mut self) {
    self.pixels = RgbaImage::new(0, 0);
  }

  pub fn image(&self) -> &RgbaImage {
    &self.pixels
  }

  pub fn image_mut(&mut self) -> &mut RgbaImage {
    &mut self.pixels
  }

  pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
    self.pixels.get_pixel_checked(x, y).copied()
  }

  /// 丢弃 alpha 通道，导出 RGB 图像
  pub fn to_rgb_image(&self) -> RgbImage {
    RgbImage::from_fn(self.width(), self.height(), |x, y| {
      let [r, g, b, _] = self.pixels.get_pixel(x, y).0;
      image::Rgb([r, g, b])
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn gradient(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 7, 255]))
  }

  #[test]
  fn surface_follows_frame_size() {
    let mut surface = FrameSurface::default();
    assert!(surface.is_empty());

    surface.draw_frame(&gradient(4, 3), SurfaceTransform::Identity);
    assert_eq!(surface.dimensions(), (4, 3));
    assert_eq!(surface.pixel(3, 2), Some(Rgba([3, 2, 7, 255])));

    surface.draw_frame(&gradient(2, 2), SurfaceTransform::Identity);
    assert_eq!(surface.dimensions(), (2, 2));
  }

  #[test]
  fn mirror_flips_columns_only() {
    let mut surface = FrameSurface::default();
    surface.draw_frame(&gradient(4, 2), SurfaceTransform::MirrorHorizontal);
    assert_eq!(surface.pixel(0, 1), Some(Rgba([3, 1, 7, 255])));
    assert_eq!(surface.pixel(3, 0), Some(Rgba([0, 0, 7, 255])));
  }

  #[test]
  fn invalidate_drops_dimensions() {
    let mut surface = FrameSurface::new(8, 8);
    assert!(!surface.resize(8, 8));
    surface.invalidate();
    assert!(surface.is_empty());
  }
}
