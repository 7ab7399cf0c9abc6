// 该文件是 Shanan （山南西风） 项目的一部分。
// src/metrics.rs - 滚动窗口性能统计
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

use std::collections::VecDeque;

use serde::Serialize;

use crate::config::METRICS_WINDOW_SIZE;

/// 有界 FIFO 延迟窗口（毫秒）
#[derive(Debug, Clone)]
pub struct MetricsWindow {
  samples: VecDeque<f64>,
  capacity: usize,
}

impl Default for MetricsWindow {
  fn default() -> Self {
    Self::with_capacity(METRICS_WINDOW_SIZE)
  }
}

impl MetricsWindow {
  pub fn with_capacity(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      samples: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  pub fn push(&mut self, ms: f64) {
    if self.samples.len() == self.capacity {
      self.samples.pop_front();
    }
    self.samples.push_back(ms);
  }

  pub fn mean(&self) -> Option<f64> {
    if self.samples.is_empty() {
      return None;
    }
    Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
  }

  pub fn len(&self) -> usize {
    self.samples.len()
  }

  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
    self.samples.iter().copied()
  }

  pub fn clear(&mut self) {
    self.samples.clear();
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
  pub inference_ms: Option<f64>,
  pub cycle_ms: Option<f64>,
  pub fps: Option<u32>,
  pub frame_count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsAggregator {
  window: MetricsWindow,
  frame_count: u64,
  last_inference_ms: Option<f64>,
  last_cycle_ms: Option<f64>,
}

impl MetricsAggregator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record_latency(&mut self, ms: f64) {
    self.window.push(ms);
  }

  /// 记录一次成功完成的检测周期
  pub fn record_cycle(&mut self, inference_ms: f64, cycle_ms: f64) {
    self.record_latency(cycle_ms);
    self.last_inference_ms = Some(inference_ms);
    self.last_cycle_ms = Some(cycle_ms);
    self.frame_count += 1;
  }

  /// 窗口为空或平均延迟为 0 时无定义
  pub fn current_fps(&self) -> Option<u32> {
    let mean = self.window.mean()?;
    if mean <= 0.0 || !mean.is_finite() {
      return None;
    }
    Some((1000.0 / mean).round() as u32)
  }

  pub fn frame_count(&self) -> u64 {
    self.frame_count
  }

  pub fn last_inference_ms(&self) -> Option<f64> {
    self.last_inference_ms
  }

  pub fn window(&self) -> &MetricsWindow {
    &self.window
  }

  pub fn reset(&mut self) {
    self.window.clear();
    self.frame_count = 0;
    self.last_inference_ms = None;
    self.last_cycle_ms = None;
  }

  pub fn snapshot(&self) -> MetricsSnapshot {
    MetricsSnapshot {
      inference_ms: self.last_inference_ms,
      cycle_ms: self.last_cycle_ms,
      fps: self.current_fps(),
      frame_count: self.frame_count,
    }
  }
}
