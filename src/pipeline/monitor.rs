// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline/monitor.rs - 管线事件监视
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

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{metrics::MetricsSnapshot, pipeline::PipelineEvent};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorSummary {
  pub cycles: u64,
  pub detections: u64,
  pub errors: Vec<String>,
  pub ended: bool,
  pub last_metrics: Option<MetricsSnapshot>,
}

/// 记录管线事件，直到出错、播放结束、达到周期数或被取消
///
/// `stop_after` 为 `None` 时不限周期数。
pub async fn monitor(
  mut events: broadcast::Receiver<PipelineEvent>,
  stop_after: Option<u64>,
  cancel: CancellationToken,
) -> MonitorSummary {
  let mut summary = MonitorSummary::default();
  loop {
    let event = tokio::select! {
      biased;

      _ = cancel.cancelled() => break,
      event = events.recv() => event,
    };

    match event {
      Ok(PipelineEvent::CycleCompleted(report)) => {
        summary.cycles += 1;
        summary.detections += report.detections.len() as u64;
        for detection in &report.detections {
          info!(
            "检测到 {} ({:.1}%) [{}, {}, {}, {}]",
            detection.class_name,
            detection.score,
            detection.bounding_box.x0,
            detection.bounding_box.y0,
            detection.bounding_box.x1,
            detection.bounding_box.y1
          );
        }
        info!(
          "第 {} 个周期: 推理 {:.2} ms, FPS {}",
          summary.cycles,
          report.metrics.inference_ms.unwrap_or_default(),
          report
            .metrics
            .fps
            .map(|fps| fps.to_string())
            .unwrap_or_else(|| "-".to_string())
        );
        summary.last_metrics = Some(report.metrics);
        if stop_after.is_some_and(|limit| summary.cycles >= limit) {
          warn!("已达到指定周期数 {}, 停止监视", summary.cycles);
          break;
        }
      }
      Ok(PipelineEvent::Error { message, detail }) => {
        error!("{} ({})", message, detail);
        summary.errors.push(message);
        break;
      }
      Ok(PipelineEvent::Ended) => {
        info!("播放结束");
        summary.ended = true;
        break;
      }
      Ok(PipelineEvent::Ready { width, height }) => info!("帧来源就绪: {}x{}", width, height),
      Ok(PipelineEvent::StateChanged(state)) => debug!("管线状态: {}", state),
      Err(RecvError::Lagged(skipped)) => warn!("事件积压，跳过 {} 条", skipped),
      Err(RecvError::Closed) => break,
    }
  }
  summary
}
