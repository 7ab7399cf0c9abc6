// 该文件是 Shanan （山南西风） 项目的一部分。
// src/results.rs - 检测结果历史
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

use crate::postprocess::DetectionResult;

/// 只追加的检测结果记录
///
/// 默认不限容量；设置容量后超出的最旧记录被淘汰。
#[derive(Debug, Clone, Default)]
pub struct ResultLog {
  entries: VecDeque<DetectionResult>,
  capacity: Option<usize>,
  evicted: u64,
}

impl ResultLog {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_capacity(capacity: Option<usize>) -> Self {
    Self {
      capacity,
      ..Self::default()
    }
  }

  pub fn capacity(&self) -> Option<usize> {
    self.capacity
  }

  pub fn append(&mut self, result: DetectionResult) {
    if let Some(capacity) = self.capacity {
      if capacity == 0 {
        self.evicted += 1;
        return;
      }
      while self.entries.len() >= capacity {
        self.entries.pop_front();
        self.evicted += 1;
      }
    }
    self.entries.push_back(result);
  }

  pub fn extend(&mut self, results: impl IntoIterator<Item = DetectionResult>) {
    for result in results {
      self.append(result);
    }
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// 因容量限制被淘汰的记录数
  pub fn evicted(&self) -> u64 {
    self.evicted
  }

  pub fn iter(&self) -> impl Iterator<Item = &DetectionResult> {
    self.entries.iter()
  }

  pub fn clear(&mut self) {
    self.entries.clear();
    self.evicted = 0;
  }

  pub fn to_json(&self) -> serde_json::Result<String> {
    let entries: Vec<&DetectionResult> = self.entries.iter().collect();
    serde_json::to_string_pretty(&entries)
  }
}

#[cfg(test)]
mod tests {
  use chrono::Local;

  use super::*;
  use crate::{model::CocoLabel, postprocess::BoundingBox};

  fn result(x0: i32) -> DetectionResult {
    DetectionResult {
      class_name: CocoLabel::from_label_id(2).unwrap(),
      score: 90.0,
      bounding_box: BoundingBox {
        x0,
        y0: 0,
        x1: x0 + 10,
        y1: 10,
      },
      timestamp: Local::now(),
    }
  }

  #[test]
  fn unbounded_log_keeps_everything() {
    let mut log = ResultLog::new();
    log.extend((0..500).map(result));
    assert_eq!(log.len(), 500);
    assert_eq!(log.evicted(), 0);
  }

  #[test]
  fn bounded_log_evicts_oldest() {
    let mut log = ResultLog::with_capacity(Some(3));
    log.extend((0..5).map(result));
    let x0s: Vec<i32> = log.iter().map(|r| r.bounding_box.x0).collect();
    assert_eq!(x0s, vec![2, 3, 4]);
    assert_eq!(log.evicted(), 2);

    log.clear();
    assert!(log.is_empty());
    assert_eq!(log.capacity(), Some(3));
  }

  #[test]
  fn json_uses_display_field_names() {
    let mut log = ResultLog::new();
    log.append(result(40));
    let json = log.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value[0]["className"], "car");
    assert_eq!(value[0]["score"], 90.0);
    assert_eq!(value[0]["boundingBox"]["x0"], 40);
    assert!(value[0]["timestamp"].is_string());
  }
}
