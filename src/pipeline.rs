// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline.rs - 实时检测管线
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

//! 采集 → 预处理 → 单槽位推理 → 后处理 → 统计。
//!
//! 每条管线是一个独立的 tokio 任务，独占帧表面、统计与结果记录。
//! 操作员动作经 [`PipelineHandle`] 以 [`Control`] 消息送入，
//! 进度以 [`PipelineEvent`] 广播。

use std::fmt;

use async_trait::async_trait;
use image::RgbaImage;
use thiserror::Error;
use tokio::{
  sync::{broadcast, mpsc},
  task::JoinHandle,
};
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::{
  error::PipelineError, frame::SurfaceTransform, metrics::MetricsSnapshot,
  postprocess::DetectionResult,
};

mod machine;
pub use self::machine::{PendingCycle, PipelineCore};

mod driver;
pub use self::driver::{DriverSummary, drive};

mod ticker;
pub use self::ticker::{refresh_period, refresh_ticks, ticks_every};

mod monitor;
pub use self::monitor::{MonitorSummary, monitor};

mod camera;
pub use self::camera::{CameraCommand, CameraLoop};

mod video;
pub use self::video::{VideoCommand, VideoLoop};

mod photo;
pub use self::photo::{PhotoCommand, PhotoOneShot};

const CONTROL_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Idle,
  Capturing,
  Inferring,
}

impl fmt::Display for PipelineState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PipelineState::Idle => write!(f, "idle"),
      PipelineState::Capturing => write!(f, "capturing"),
      PipelineState::Inferring => write!(f, "inferring"),
    }
  }
}

/// 相邻周期的调度方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePolicy {
  /// 每次刷新尝试一个周期，槽位被占用时丢弃该次刷新
  DropOnOverlap,
  /// 开始时立即运行，之后在上一周期完成后的第一次刷新运行
  WaitThenReschedule,
  /// 只运行一个周期，随后回到空闲
  OneShot,
}

/// 一次成功完成的检测周期
#[derive(Debug, Clone)]
pub struct CycleReport {
  pub generation: u64,
  pub detections: Vec<DetectionResult>,
  pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
  StateChanged(PipelineState),
  CycleCompleted(CycleReport),
  /// `message` 面向操作员，`detail` 用于日志
  Error { message: String, detail: String },
  /// 帧来源就绪，尺寸已知
  Ready { width: u32, height: u32 },
  /// 播放结束，管线回到空闲
  Ended,
}

#[derive(Debug)]
pub enum Control<C> {
  Start,
  Pause,
  Resume,
  Stop,
  DismissError,
  Command(C),
}

/// 管线策略：在公共内核之上决定取帧方式与操作员动作的语义
#[async_trait]
pub trait PipelineController: Send {
  type Command: fmt::Debug + Send + 'static;

  fn policy(&self) -> SchedulePolicy;

  fn core(&self) -> &PipelineCore;

  fn core_mut(&mut self) -> &mut PipelineCore;

  async fn start(&mut self) -> Result<(), PipelineError>;

  async fn stop(&mut self) -> Result<(), PipelineError>;

  async fn pause(&mut self) -> Result<(), PipelineError> {
    tracing::warn!("当前模式不支持暂停，忽略");
    Ok(())
  }

  async fn resume(&mut self) -> Result<(), PipelineError> {
    tracing::warn!("当前模式不支持继续，忽略");
    Ok(())
  }

  async fn command(&mut self, command: Self::Command) -> Result<(), PipelineError>;

  /// 为新周期取一帧，`None` 表示本次无帧可用
  fn capture(&mut self) -> Option<(RgbaImage, SurfaceTransform)>;

  fn on_cycle_complete(&mut self, _report: &CycleReport) {}

  async fn on_cycle_failed(&mut self, error: PipelineError) {
    self.core_mut().fail(error);
  }

  /// 每次刷新时调用，用于观察来源状态
  fn on_tick(&mut self) {}

  /// 驱动退出前调用
  async fn close(&mut self) {}
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("管线已关闭")]
pub struct PipelineClosed;

/// 管线任务的控制端
pub struct PipelineHandle<C> {
  control: mpsc::Sender<Control<C>>,
  events: broadcast::Sender<PipelineEvent>,
  cancel: CancellationToken,
  task: JoinHandle<DriverSummary>,
}

impl<C: fmt::Debug + Send + 'static> PipelineHandle<C> {
  async fn send(&self, control: Control<C>) -> Result<(), PipelineClosed> {
    self.control.send(control).await.map_err(|_| PipelineClosed)
  }

  pub async fn start(&self) -> Result<(), PipelineClosed> {
    self.send(Control::Start).await
  }

  pub async fn pause(&self) -> Result<(), PipelineClosed> {
    self.send(Control::Pause).await
  }

  pub async fn resume(&self) -> Result<(), PipelineClosed> {
    self.send(Control::Resume).await
  }

  pub async fn stop(&self) -> Result<(), PipelineClosed> {
    self.send(Control::Stop).await
  }

  pub async fn dismiss_error(&self) -> Result<(), PipelineClosed> {
    self.send(Control::DismissError).await
  }

  pub async fn command(&self, command: C) -> Result<(), PipelineClosed> {
    self.send(Control::Command(command)).await
  }

  pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
    self.events.subscribe()
  }

  pub fn cancellation_token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  pub async fn join(self) -> Result<DriverSummary, tokio::task::JoinError> {
    self.task.await
  }
}

/// 在新任务上运行管线
pub fn spawn<P, S>(controller: P, ticks: S, cancel: CancellationToken) -> PipelineHandle<P::Command>
where
  P: PipelineController + 'static,
  S: Stream + Unpin + Send + 'static,
  S::Item: Send,
{
  let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
  let (events, _) = broadcast::channel(EVENT_CAPACITY);
  let task = tokio::spawn(drive(
    controller,
    ticks,
    control_rx,
    events.clone(),
    cancel.clone(),
  ));
  PipelineHandle {
    control: control_tx,
    events,
    cancel,
    task,
  }
}
