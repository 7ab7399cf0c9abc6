// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline/driver.rs - 管线异步驱动循环
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

use tokio::{
  sync::{broadcast, mpsc},
  time::Instant,
};
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
  error::PipelineError,
  model::{InferenceError, InferenceOutput},
  pipeline::{Control, PendingCycle, PipelineController, PipelineEvent, SchedulePolicy},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverSummary {
  pub cycles_started: u64,
  pub cycles_completed: u64,
  /// 因槽位被占用而放弃的调度
  pub ticks_dropped: u64,
  pub stale_results: u64,
}

/// 下一个周期何时开始
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextCycle {
  Halted,
  EveryTick,
  OnTick,
  AwaitingCompletion,
}

enum Attempt {
  Started,
  Busy,
  NoFrame,
  Inactive,
  Failed(PipelineError),
}

async fn settle(
  pending: &mut Option<PendingCycle>,
) -> (u64, Instant, Result<InferenceOutput, InferenceError>) {
  match pending.as_mut() {
    Some(cycle) => {
      let result = (&mut cycle.call).await;
      (cycle.generation, cycle.started, result)
    }
    None => std::future::pending().await,
  }
}

struct Driver<P> {
  controller: P,
  pending: Option<PendingCycle>,
  next: NextCycle,
  summary: DriverSummary,
  events: broadcast::Sender<PipelineEvent>,
}

impl<P: PipelineController> Driver<P> {
  fn flush(&mut self) {
    for event in self.controller.core_mut().drain_events() {
      // 没有订阅者时事件直接丢弃
      let _ = self.events.send(event);
    }
  }

  fn attempt(&mut self) -> Attempt {
    if !self.controller.core().is_active() {
      return Attempt::Inactive;
    }
    if self.pending.is_some() || self.controller.core().slot_busy() {
      return Attempt::Busy;
    }
    let Some((frame, transform)) = self.controller.capture() else {
      return Attempt::NoFrame;
    };
    match self.controller.core_mut().begin_cycle(&frame, transform) {
      Ok(Some(cycle)) => {
        self.pending = Some(cycle);
        Attempt::Started
      }
      Ok(None) => Attempt::Busy,
      Err(e) => Attempt::Failed(e),
    }
  }

  async fn run_cycle(&mut self) {
    let policy = self.controller.policy();
    match self.attempt() {
      Attempt::Started => {
        self.summary.cycles_started += 1;
        if policy != SchedulePolicy::DropOnOverlap {
          self.next = NextCycle::AwaitingCompletion;
        }
      }
      Attempt::Busy => {
        self.summary.ticks_dropped += 1;
        debug!("推理槽位被占用，丢弃本次刷新");
        if policy != SchedulePolicy::DropOnOverlap {
          self.next = NextCycle::OnTick;
        }
      }
      Attempt::NoFrame => {
        debug!("本次刷新无可用帧，下次重试");
        if policy != SchedulePolicy::DropOnOverlap {
          self.next = NextCycle::OnTick;
        }
      }
      Attempt::Inactive => self.next = NextCycle::Halted,
      Attempt::Failed(e) => {
        self.controller.on_cycle_failed(e).await;
        self.next = NextCycle::Halted;
      }
    }
  }

  /// 开始或继续后按策略安排第一个周期
  async fn schedule_after_start(&mut self) {
    if !self.controller.core().is_active() {
      self.next = NextCycle::Halted;
      return;
    }
    match self.controller.policy() {
      SchedulePolicy::DropOnOverlap => self.next = NextCycle::EveryTick,
      SchedulePolicy::WaitThenReschedule | SchedulePolicy::OneShot => self.run_cycle().await,
    }
  }

  async fn handle_control(&mut self, control: Control<P::Command>) {
    debug!("收到控制消息: {:?}", control);
    let starting = matches!(control, Control::Start | Control::Resume);
    let result = match control {
      Control::Start => self.controller.start().await,
      Control::Resume => self.controller.resume().await,
      Control::Pause => self.controller.pause().await,
      Control::Stop => self.controller.stop().await,
      Control::DismissError => {
        self.controller.core_mut().dismiss_error();
        Ok(())
      }
      Control::Command(command) => self.controller.command(command).await,
    };

    match result {
      Ok(()) if starting => self.schedule_after_start().await,
      Ok(()) => {}
      Err(e) => self.controller.core_mut().report_error(e),
    }
    if !self.controller.core().is_active() {
      self.next = NextCycle::Halted;
    }
  }

  async fn handle_completion(
    &mut self,
    generation: u64,
    started: Instant,
    result: Result<InferenceOutput, InferenceError>,
  ) {
    self.pending = None;
    match self
      .controller
      .core_mut()
      .complete_cycle(generation, started, result)
    {
      Ok(Some(report)) => {
        self.summary.cycles_completed += 1;
        self
          .controller
          .core_mut()
          .notify(PipelineEvent::CycleCompleted(report.clone()));
        self.controller.on_cycle_complete(&report);
        self.next = match self.controller.policy() {
          SchedulePolicy::DropOnOverlap => NextCycle::EveryTick,
          SchedulePolicy::WaitThenReschedule => NextCycle::OnTick,
          SchedulePolicy::OneShot => NextCycle::Halted,
        };
      }
      Ok(None) => self.summary.stale_results += 1,
      Err(e) => {
        self.controller.on_cycle_failed(e).await;
        self.next = NextCycle::Halted;
      }
    }
    if !self.controller.core().is_active() {
      self.next = NextCycle::Halted;
    }
  }

  async fn handle_tick(&mut self) {
    self.controller.on_tick();
    if !self.controller.core().is_active() {
      self.next = NextCycle::Halted;
      return;
    }
    match self.next {
      NextCycle::EveryTick | NextCycle::OnTick => self.run_cycle().await,
      NextCycle::Halted | NextCycle::AwaitingCompletion => {}
    }
  }
}

/// 管线主循环
///
/// 同一任务内依次处理取消、控制消息、推理返回与刷新信号，推理调用之外不挂起。
/// 刷新信号结束后等待在途调用返回再退出。
pub async fn drive<P, S>(
  controller: P,
  mut ticks: S,
  mut control: mpsc::Receiver<Control<P::Command>>,
  events: broadcast::Sender<PipelineEvent>,
  cancel: CancellationToken,
) -> DriverSummary
where
  P: PipelineController,
  S: Stream + Unpin,
{
  let mut driver = Driver {
    controller,
    pending: None,
    next: NextCycle::Halted,
    summary: DriverSummary::default(),
    events,
  };
  let mut control_open = true;
  let mut ticks_open = true;

  info!("管线驱动启动: {:?}", driver.controller.policy());
  loop {
    tokio::select! {
      biased;

      _ = cancel.cancelled() => {
        info!("收到取消信号，管线退出");
        break;
      }
      message = control.recv(), if control_open => match message {
        Some(message) => driver.handle_control(message).await,
        None => {
          debug!("控制通道已关闭");
          control_open = false;
        }
      },
      (generation, started, result) = settle(&mut driver.pending), if driver.pending.is_some() => {
        driver.handle_completion(generation, started, result).await;
      }
      tick = ticks.next(), if ticks_open => match tick {
        Some(_) => driver.handle_tick().await,
        None => {
          debug!("刷新信号结束");
          ticks_open = false;
        }
      },
    }
    driver.flush();

    if !ticks_open && driver.pending.is_none() {
      break;
    }
  }

  driver.controller.core_mut().flush_output().await;
  driver.controller.close().await;
  driver.flush();
  info!(
    "管线驱动结束: 开始 {} 个周期, 完成 {} 个, 丢弃 {} 次调度",
    driver.summary.cycles_started, driver.summary.cycles_completed, driver.summary.ticks_dropped
  );
  driver.summary
}
