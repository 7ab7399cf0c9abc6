// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/directory_record.rs - 按日期目录记录标注帧
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

use std::{
  path::{Path, PathBuf},
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{DateTime, Datelike, Local};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::FrameSurface,
  output::Render,
  postprocess::{BoundingBox, DetectionResult},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("路径解码失败: {0}")]
  InvalidPath(String),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
  /// 只保存标注图像
  Draw,
  /// 图像 + JSON 记录，类别写名称
  RecordName,
  /// 图像 + JSON 记录，类别写编号
  RecordId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DetectionEntry {
  #[serde(skip_serializing_if = "Option::is_none")]
  class_name: Option<&'static str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  class_id: Option<u32>,
  score: f32,
  bounding_box: BoundingBox,
  timestamp: DateTime<Local>,
}

/// 每帧一个 JSON 记录
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRecord {
  image: String,
  width: u32,
  height: u32,
  detections: Vec<DetectionEntry>,
}

pub struct DirectoryRecordOutput {
  directory: PathBuf,
  kind: RecordKind,
  frame_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let kind = uri
      .query_pairs()
      .find(|(k, _)| k == "record")
      .map(|(_, v)| {
        if v == "id" {
          RecordKind::RecordId
        } else {
          RecordKind::RecordName
        }
      })
      .unwrap_or(RecordKind::Draw);
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    let directory = urlencoding::decode(uri.path())
      .map_err(|e| DirectoryRecordOutputError::InvalidPath(e.to_string()))?;

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(directory.as_ref()),
      kind,
      frame_counter: AtomicU16::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  /// `<root>/YYYY/MM/DD/HH-MM-SS-XXXX.png`
  fn frame_path(&self, now: DateTime<Local>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn record(
    &self,
    path: &Path,
    frame: &FrameSurface,
    results: &[DetectionResult],
  ) -> Result<(), DirectoryRecordOutputError> {
    let with_name = self.kind == RecordKind::RecordName;
    let record = FrameRecord {
      image: path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default(),
      width: frame.width(),
      height: frame.height(),
      detections: results
        .iter()
        .map(|r| DetectionEntry {
          class_name: with_name.then(|| r.class_name.to_label_str()),
          class_id: (!with_name).then(|| r.class_name.to_label_id()),
          score: r.score,
          bounding_box: r.bounding_box,
          timestamp: r.timestamp,
        })
        .collect(),
    };
    let json = serde_json::to_string_pretty(&record)?;
    std::fs::write(path.with_extension("json"), json)?;
    Ok(())
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(
    &self,
    frame: &FrameSurface,
    results: &[DetectionResult],
  ) -> Result<(), Self::Error> {
    if frame.is_empty() || (!self.always && results.is_empty()) {
      return Ok(());
    }

    let path = self.frame_path(Local::now())?;
    frame.to_rgb_image().save(&path)?;
    if self.kind != RecordKind::Draw {
      self.record(&path, frame, results)?;
    }
    debug!("记录帧: {}", path.display());
    Ok(())
  }
}
