// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline/machine.rs - 管线状态机与单次检测周期
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

use chrono::Local;
use image::RgbaImage;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, error, info, warn};

use crate::{
  config::ModelConfig,
  error::PipelineError,
  frame::{FrameSurface, SurfaceTransform},
  metrics::MetricsAggregator,
  model::{InferenceCall, InferenceClient, InferenceError, InferenceOutput},
  output::{OutputError, Render, draw::Overlay},
  pipeline::{CycleReport, PipelineEvent, PipelineState},
  postprocess::{DetectionResult, Postprocessor},
  preprocess::Preprocessor,
  results::ResultLog,
};

type Sink = Arc<dyn Render<Error = OutputError> + Sync>;

/// 已派发、尚未返回的推理调用
pub struct PendingCycle {
  pub generation: u64,
  pub started: Instant,
  pub call: InferenceCall,
}

/// 三种策略共用的内核
///
/// 持有唯一的推理槽位：槽位在调用真正返回前一直被占用，即使管线已停止。
/// 每次开始、暂停、停止都会推进运行代数，旧代数的结果被丢弃。
pub struct PipelineCore {
  state: PipelineState,
  client: InferenceClient,
  preprocessor: Preprocessor,
  postprocessor: Postprocessor,
  surface: FrameSurface,
  metrics: MetricsAggregator,
  results: ResultLog,
  sink: Option<Sink>,
  rendering: Option<JoinHandle<()>>,
  last_error: Option<PipelineError>,
  generation: u64,
  inflight: Option<u64>,
  outbox: Vec<PipelineEvent>,
}

impl PipelineCore {
  pub fn new(config: &ModelConfig, client: InferenceClient) -> Self {
    let resolution = config.resolution();
    Self {
      state: PipelineState::Idle,
      client,
      preprocessor: Preprocessor::new(resolution),
      postprocessor: Postprocessor::new(resolution),
      surface: FrameSurface::default(),
      metrics: MetricsAggregator::new(),
      results: ResultLog::new(),
      sink: None,
      rendering: None,
      last_error: None,
      generation: 0,
      inflight: None,
      outbox: Vec::new(),
    }
  }

  pub fn with_overlay(mut self, overlay: Overlay) -> Self {
    self.postprocessor = self.postprocessor.with_overlay(overlay);
    self
  }

  pub fn with_sink(mut self, sink: impl Render<Error = OutputError> + Sync + 'static) -> Self {
    self.sink = Some(Arc::new(sink));
    self
  }

  pub fn with_result_capacity(mut self, capacity: Option<usize>) -> Self {
    self.results = ResultLog::with_capacity(capacity);
    self
  }

  pub fn state(&self) -> PipelineState {
    self.state
  }

  pub fn is_active(&self) -> bool {
    self.state != PipelineState::Idle
  }

  pub fn is_inferring(&self) -> bool {
    self.state == PipelineState::Inferring
  }

  /// 槽位被任意代数的调用占用
  pub fn slot_busy(&self) -> bool {
    self.inflight.is_some()
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }

  pub fn surface(&self) -> &FrameSurface {
    &self.surface
  }

  pub fn surface_mut(&mut self) -> &mut FrameSurface {
    &mut self.surface
  }

  pub fn metrics(&self) -> &MetricsAggregator {
    &self.metrics
  }

  pub fn results(&self) -> &ResultLog {
    &self.results
  }

  pub fn last_error(&self) -> Option<&PipelineError> {
    self.last_error.as_ref()
  }

  fn set_state(&mut self, state: PipelineState) {
    if self.state != state {
      debug!("管线状态: {} -> {}", self.state, state);
      self.state = state;
      self.outbox.push(PipelineEvent::StateChanged(state));
    }
  }

  pub fn notify(&mut self, event: PipelineEvent) {
    self.outbox.push(event);
  }

  pub fn drain_events(&mut self) -> Vec<PipelineEvent> {
    std::mem::take(&mut self.outbox)
  }

  /// Idle → Capturing，重置统计并清除错误
  pub fn start(&mut self) {
    self.generation += 1;
    self.metrics.reset();
    self.results.clear();
    self.last_error = None;
    info!("管线开始 (第 {} 代)", self.generation);
    self.set_state(PipelineState::Capturing);
  }

  /// 继续调度，统计保留
  pub fn resume(&mut self) {
    self.generation += 1;
    self.last_error = None;
    info!("管线继续 (第 {} 代)", self.generation);
    self.set_state(PipelineState::Capturing);
  }

  /// 停止调度，统计保留
  pub fn halt(&mut self) {
    if self.is_active() {
      self.generation += 1;
    }
    self.set_state(PipelineState::Idle);
  }

  /// 停止调度并清空统计与结果
  pub fn stop(&mut self) {
    self.halt();
    self.reset_stats();
    info!("管线停止");
  }

  pub fn reset_stats(&mut self) {
    self.metrics.reset();
    self.results.clear();
  }

  /// 记录一个面向操作员的错误，不改变运行状态
  pub fn report_error(&mut self, error: PipelineError) {
    self.outbox.push(PipelineEvent::Error {
      message: error.user_message(),
      detail: error.to_string(),
    });
    self.last_error = Some(error);
  }

  /// 致命错误：回到空闲，不自动重试
  pub fn fail(&mut self, error: PipelineError) {
    error!("检测周期失败: {}", error);
    self.halt();
    self.report_error(error);
  }

  pub fn dismiss_error(&mut self) {
    if self.last_error.take().is_some() {
      debug!("错误提示已关闭");
    }
  }

  /// 将一帧绘入帧表面并派发推理
  ///
  /// 槽位被占用或管线未运行时返回 `Ok(None)`。
  pub fn begin_cycle(
    &mut self,
    frame: &RgbaImage,
    transform: SurfaceTransform,
  ) -> Result<Option<PendingCycle>, PipelineError> {
    if !self.is_active() || self.slot_busy() {
      return Ok(None);
    }

    let started = Instant::now();
    self.surface.draw_frame(frame, transform);
    let tensor = self.preprocessor.process(&self.surface)?;
    let call = self.client.dispatch(tensor);

    self.inflight = Some(self.generation);
    self.set_state(PipelineState::Inferring);
    debug!("派发推理 (第 {} 代)", self.generation);
    Ok(Some(PendingCycle {
      generation: self.generation,
      started,
      call,
    }))
  }

  /// 推理返回后调用；过期代数的结果返回 `Ok(None)`
  pub fn complete_cycle(
    &mut self,
    generation: u64,
    started: Instant,
    result: Result<InferenceOutput, InferenceError>,
  ) -> Result<Option<CycleReport>, PipelineError> {
    self.inflight = None;
    if generation != self.generation || !self.is_active() {
      debug!(
        "丢弃过期推理结果 (第 {} 代, 当前第 {} 代)",
        generation, self.generation
      );
      return Ok(None);
    }

    let output = result?;
    let detections = self
      .postprocessor
      .process(&output.tensor, &mut self.surface, Local::now())?;

    let cycle_ms = started.elapsed().as_secs_f64() * 1000.0;
    self.metrics.record_cycle(output.elapsed_ms(), cycle_ms);
    self.results.extend(detections.iter().cloned());

    self.spawn_render(&detections);

    self.set_state(PipelineState::Capturing);
    debug!(
      "周期完成: {} 个目标, 推理 {:.2} ms, 周期 {:.2} ms",
      detections.len(),
      output.elapsed_ms(),
      cycle_ms
    );
    Ok(Some(CycleReport {
      generation,
      detections,
      metrics: self.metrics.snapshot(),
    }))
  }

  /// 单次模式完成后回到空闲
  pub fn finish(&mut self) {
    self.halt();
  }

  /// 输出写入放到阻塞线程池，上一帧未写完时跳过本帧
  fn spawn_render(&mut self, detections: &[DetectionResult]) {
    let Some(sink) = &self.sink else {
      return;
    };
    if self.rendering.as_ref().is_some_and(|task| !task.is_finished()) {
      debug!("上一帧输出尚未完成，跳过本帧");
      return;
    }
    let sink = Arc::clone(sink);
    let frame = self.surface.clone();
    let detections = detections.to_vec();
    self.rendering = Some(tokio::task::spawn_blocking(move || {
      if let Err(e) = sink.render_result(&frame, &detections) {
        warn!("输出失败: {}", e);
      }
    }));
  }

  /// 等待在途的输出写完
  pub async fn flush_output(&mut self) {
    if let Some(task) = self.rendering.take()
      && let Err(e) = task.await
    {
      error!("输出任务异常退出: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::{
      Mutex,
      atomic::{AtomicUsize, Ordering},
      mpsc,
    },
    time::Duration,
  };

  use async_trait::async_trait;

  use super::*;
  use crate::{
    config::Resolution,
    model::InferenceSession,
    tensor::Tensor,
  };

  /// 收到放行信号后才写完的输出
  struct GatedSink {
    gate: Mutex<mpsc::Receiver<()>>,
    written: Arc<AtomicUsize>,
  }

  impl Render for GatedSink {
    type Error = OutputError;

    fn render_result(
      &self,
      _frame: &FrameSurface,
      results: &[DetectionResult],
    ) -> Result<(), OutputError> {
      let _ = self.gate.lock().unwrap().recv();
      self.written.fetch_add(results.len(), Ordering::SeqCst);
      Ok(())
    }
  }

  struct Fixed {
    output: Tensor,
  }

  #[async_trait]
  impl InferenceSession for Fixed {
    async fn run(&self, _input: Tensor) -> Result<Tensor, InferenceError> {
      tokio::time::sleep(Duration::from_millis(10)).await;
      Ok(self.output.clone())
    }
  }

  fn core(records: &[[f32; 6]]) -> PipelineCore {
    let data: Vec<f32> = records.iter().flatten().copied().collect();
    let output = Tensor::new(vec![1, data.len()], data).unwrap();
    let config = ModelConfig::new(Resolution::square(160), "test.onnx").unwrap();
    PipelineCore::new(&config, InferenceClient::new(Fixed { output }))
  }

  fn frame() -> RgbaImage {
    RgbaImage::new(640, 480)
  }

  #[tokio::test(start_paused = true)]
  async fn cycle_updates_metrics_and_results() {
    let mut core = core(&[[10.0, 10.0, 50.0, 50.0, 0.9, 2.0]]);
    core.start();
    let pending = core
      .begin_cycle(&frame(), SurfaceTransform::Identity)
      .unwrap()
      .unwrap();
    assert_eq!(core.state(), PipelineState::Inferring);
    assert!(core.slot_busy());

    let result = pending.call.await;
    let report = core
      .complete_cycle(pending.generation, pending.started, result)
      .unwrap()
      .unwrap();
    assert_eq!(report.detections.len(), 1);
    assert_eq!(report.metrics.frame_count, 1);
    assert!(report.metrics.inference_ms.unwrap() >= 10.0);
    assert_eq!(core.results().len(), 1);
    assert_eq!(core.state(), PipelineState::Capturing);
    assert!(!core.slot_busy());
  }

  #[tokio::test(start_paused = true)]
  async fn busy_slot_refuses_second_cycle() {
    let mut core = core(&[]);
    core.start();
    let first = core
      .begin_cycle(&frame(), SurfaceTransform::Identity)
      .unwrap();
    assert!(first.is_some());
    assert!(
      core
        .begin_cycle(&frame(), SurfaceTransform::Identity)
        .unwrap()
        .is_none()
    );
  }

  #[tokio::test(start_paused = true)]
  async fn result_after_stop_is_discarded_but_holds_slot() {
    let mut core = core(&[[0.0, 0.0, 1.0, 1.0, 0.9, 0.0]]);
    core.start();
    let pending = core
      .begin_cycle(&frame(), SurfaceTransform::Identity)
      .unwrap()
      .unwrap();
    core.stop();
    assert_eq!(core.state(), PipelineState::Idle);

    core.start();
    assert!(core.slot_busy());
    assert!(
      core
        .begin_cycle(&frame(), SurfaceTransform::Identity)
        .unwrap()
        .is_none()
    );

    let result = pending.call.await;
    assert!(
      core
        .complete_cycle(pending.generation, pending.started, result)
        .unwrap()
        .is_none()
    );
    assert!(!core.slot_busy());
    assert_eq!(core.metrics().frame_count(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn failure_halts_and_keeps_error() {
    let mut core = core(&[[0.0, 0.0, 1.0, 1.0, 0.9, 120.0]]);
    core.start();
    let pending = core
      .begin_cycle(&frame(), SurfaceTransform::Identity)
      .unwrap()
      .unwrap();
    let result = pending.call.await;
    let err = core
      .complete_cycle(pending.generation, pending.started, result)
      .unwrap_err();
    core.fail(err);
    assert_eq!(core.state(), PipelineState::Idle);
    assert!(matches!(
      core.last_error(),
      Some(PipelineError::InferenceFailure(_))
    ));

    let events = core.drain_events();
    assert!(events.iter().any(|e| matches!(
      e,
      PipelineEvent::Error { message, .. } if message == "Error processing video frames. Please try again."
    )));

    core.dismiss_error();
    assert!(core.last_error().is_none());
  }

  #[test]
  fn start_resets_stats_and_clears_error() {
    let mut core = core(&[]);
    core.report_error(PipelineError::CaptureUnavailable);
    core.start();
    assert!(core.last_error().is_none());
    assert_eq!(core.generation(), 1);
    core.halt();
    core.halt();
    assert_eq!(core.generation(), 2);
  }

  #[tokio::test]
  async fn slow_output_does_not_block_cycle() {
    let (open, gate) = mpsc::channel();
    let written = Arc::new(AtomicUsize::new(0));
    let mut core = core(&[[10.0, 10.0, 50.0, 50.0, 0.9, 2.0]]).with_sink(GatedSink {
      gate: Mutex::new(gate),
      written: written.clone(),
    });
    core.start();

    for _ in 0..2 {
      let pending = core
        .begin_cycle(&frame(), SurfaceTransform::Identity)
        .unwrap()
        .unwrap();
      let result = pending.call.await;
      let report = core
        .complete_cycle(pending.generation, pending.started, result)
        .unwrap();
      assert!(report.is_some());
    }
    assert_eq!(core.metrics().frame_count(), 2);
    assert_eq!(written.load(Ordering::SeqCst), 0);

    // 第二帧在第一帧写出期间被跳过
    open.send(()).unwrap();
    core.flush_output().await;
    assert_eq!(written.load(Ordering::SeqCst), 1);
  }
}
