// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/common/mod.rs - 集成测试公共桩件
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

#![allow(dead_code)]

use std::{
  collections::VecDeque,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use async_trait::async_trait;
use image::RgbaImage;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;

use shanan_uav::{
  config::{ModelConfig, Resolution},
  input::{
    FacingMode, LiveSource, MediaLoadError, MediaMetadata, MediaOpener, MediaUpload,
    PlaybackSource, PlaybackStatus,
  },
  model::{InferenceClient, InferenceError, InferenceSession},
  pipeline::{PipelineCore, PipelineEvent},
  tensor::Tensor,
};

/// 一条 car 检测记录，640x480 帧上对应 (40,30)-(200,150)
pub const CAR: [f32; 6] = [10.0, 10.0, 50.0, 50.0, 0.9, 2.0];

/// 按顺序返回延迟的推理会话，记录并发调用数
pub struct ScriptedSession {
  delays: Mutex<VecDeque<Duration>>,
  fallback: Duration,
  output: Tensor,
  failing_on: Option<usize>,
  pub stats: CallStats,
}

#[derive(Clone, Default)]
pub struct CallStats {
  current: Arc<AtomicUsize>,
  max: Arc<AtomicUsize>,
  calls: Arc<AtomicUsize>,
}

impl CallStats {
  pub fn max(&self) -> usize {
    self.max.load(Ordering::SeqCst)
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl ScriptedSession {
  pub fn new(delays: &[u64], fallback: u64, records: &[[f32; 6]]) -> Self {
    let data: Vec<f32> = records.iter().flatten().copied().collect();
    Self {
      delays: Mutex::new(delays.iter().copied().map(Duration::from_millis).collect()),
      fallback: Duration::from_millis(fallback),
      output: Tensor::new(vec![1, data.len()], data).unwrap(),
      failing_on: None,
      stats: CallStats::default(),
    }
  }

  /// 第 `call` 次调用（从 1 开始）返回引擎错误
  pub fn failing_on(mut self, call: usize) -> Self {
    self.failing_on = Some(call);
    self
  }
}

#[async_trait]
impl InferenceSession for ScriptedSession {
  async fn run(&self, _input: Tensor) -> Result<Tensor, InferenceError> {
    let delay = self
      .delays
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or(self.fallback);
    let call = self.stats.calls.fetch_add(1, Ordering::SeqCst) + 1;
    let now = self.stats.current.fetch_add(1, Ordering::SeqCst) + 1;
    self.stats.max.fetch_max(now, Ordering::SeqCst);
    tokio::time::sleep(delay).await;
    self.stats.current.fetch_sub(1, Ordering::SeqCst);
    if self.failing_on == Some(call) {
      return Err(InferenceError::Engine(format!("第 {} 次调用失败", call)));
    }
    Ok(self.output.clone())
  }
}

pub fn core_with(session: ScriptedSession) -> (PipelineCore, CallStats) {
  let stats = session.stats.clone();
  let config = ModelConfig::new(Resolution::square(160), "test.onnx").unwrap();
  (
    PipelineCore::new(&config, InferenceClient::new(session)),
    stats,
  )
}

/// 手动驱动的刷新信号
pub fn manual_ticks() -> (mpsc::Sender<()>, ReceiverStream<()>) {
  let (tx, rx) = mpsc::channel(64);
  (tx, ReceiverStream::new(rx))
}

/// 让管线任务处理完已送达的消息
pub async fn settle() {
  tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn drain(events: &mut broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
  let mut drained = Vec::new();
  while let Ok(event) = events.try_recv() {
    drained.push(event);
  }
  drained
}

pub fn completed(events: &[PipelineEvent]) -> Vec<u64> {
  events
    .iter()
    .filter_map(|e| match e {
      PipelineEvent::CycleCompleted(report) => Some(report.metrics.frame_count),
      _ => None,
    })
    .collect()
}

#[derive(Clone, Default)]
pub struct CameraState {
  pub facing: Arc<Mutex<FacingMode>>,
  pub switches: Arc<AtomicUsize>,
  pub grabs: Arc<AtomicUsize>,
}

pub struct MockCamera {
  state: CameraState,
  /// 每隔几次抓帧有一次拿不到帧
  gap_every: Option<usize>,
}

impl MockCamera {
  pub fn new() -> (Self, CameraState) {
    let state = CameraState::default();
    (
      Self {
        state: state.clone(),
        gap_every: None,
      },
      state,
    )
  }

  /// 第 n、2n、3n... 次抓帧返回空
  pub fn with_gaps(mut self, every: usize) -> Self {
    self.gap_every = Some(every);
    self
  }
}

impl LiveSource for MockCamera {
  fn grab(&mut self) -> Option<RgbaImage> {
    let grab = self.state.grabs.fetch_add(1, Ordering::SeqCst) + 1;
    if self.gap_every.is_some_and(|every| grab % every == 0) {
      return None;
    }
    Some(RgbaImage::new(640, 480))
  }

  fn facing(&self) -> FacingMode {
    *self.state.facing.lock().unwrap()
  }

  fn switch_facing(&mut self, facing: FacingMode) -> Result<(), MediaLoadError> {
    *self.state.facing.lock().unwrap() = facing;
    self.state.switches.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

/// 同一上传文件打开的媒体共享的观测点
#[derive(Clone)]
pub struct PlaybackState {
  pub status: Arc<Mutex<PlaybackStatus>>,
  pub releases: Arc<AtomicUsize>,
  pub rewinds: Arc<AtomicUsize>,
  pub error: Arc<Mutex<Option<String>>>,
}

impl Default for PlaybackState {
  fn default() -> Self {
    Self {
      status: Arc::new(Mutex::new(PlaybackStatus::Paused)),
      releases: Arc::default(),
      rewinds: Arc::default(),
      error: Arc::default(),
    }
  }
}

impl PlaybackState {
  pub fn set_status(&self, status: PlaybackStatus) {
    *self.status.lock().unwrap() = status;
  }

  pub fn status(&self) -> PlaybackStatus {
    *self.status.lock().unwrap()
  }

  pub fn releases(&self) -> usize {
    self.releases.load(Ordering::SeqCst)
  }

  pub fn rewinds(&self) -> usize {
    self.rewinds.load(Ordering::SeqCst)
  }

  /// 模拟播放中的解码错误
  pub fn fail(&self, reason: &str) {
    *self.error.lock().unwrap() = Some(reason.to_string());
    self.set_status(PlaybackStatus::Failed);
  }
}

pub struct MockPlayback {
  metadata: MediaMetadata,
  state: PlaybackState,
}

impl PlaybackSource for MockPlayback {
  fn metadata(&self) -> MediaMetadata {
    self.metadata
  }

  /// 与真实播放元素一致，已结束的视频需先回到开头
  fn play(&mut self) -> Result<(), MediaLoadError> {
    if self.state.status() == PlaybackStatus::Paused {
      self.state.set_status(PlaybackStatus::Playing);
    }
    Ok(())
  }

  fn pause(&mut self) -> Result<(), MediaLoadError> {
    if self.state.status() == PlaybackStatus::Playing {
      self.state.set_status(PlaybackStatus::Paused);
    }
    Ok(())
  }

  fn rewind(&mut self) -> Result<(), MediaLoadError> {
    self.state.rewinds.fetch_add(1, Ordering::SeqCst);
    self.state.set_status(PlaybackStatus::Paused);
    Ok(())
  }

  fn status(&mut self) -> PlaybackStatus {
    self.state.status()
  }

  fn take_error(&mut self) -> Option<MediaLoadError> {
    self
      .state
      .error
      .lock()
      .unwrap()
      .take()
      .map(MediaLoadError::Unavailable)
  }

  fn current_frame(&mut self) -> Option<RgbaImage> {
    Some(RgbaImage::new(self.metadata.width, self.metadata.height))
  }

  fn release(&mut self) {
    self.state.releases.fetch_add(1, Ordering::SeqCst);
  }
}

/// 每次打开都登记一个观测点，零尺寸的上传模拟元数据缺失
#[derive(Clone, Default)]
pub struct MockOpener {
  opened: Arc<Mutex<Vec<(MediaUpload, PlaybackState)>>>,
}

impl MockOpener {
  pub fn opened(&self) -> Vec<(MediaUpload, PlaybackState)> {
    self.opened.lock().unwrap().clone()
  }

  pub fn playback(&self, index: usize) -> PlaybackState {
    self.opened.lock().unwrap()[index].1.clone()
  }
}

#[async_trait]
impl MediaOpener for MockOpener {
  async fn open(&self, upload: &MediaUpload) -> Result<Box<dyn PlaybackSource>, MediaLoadError> {
    if upload.path.to_string_lossy().contains("broken") {
      return Err(MediaLoadError::Unavailable("无法解码".to_string()));
    }
    let (width, height) = if upload.path.to_string_lossy().contains("blank") {
      (0, 0)
    } else {
      (640, 480)
    };
    let state = PlaybackState::default();
    self
      .opened
      .lock()
      .unwrap()
      .push((upload.clone(), state.clone()));
    Ok(Box::new(MockPlayback {
      metadata: MediaMetadata {
        width,
        height,
        duration: Some(Duration::from_secs(10)),
      },
      state,
    }))
  }
}

pub fn mp4(name: &str) -> MediaUpload {
  MediaUpload::new(format!("/videos/{}.mp4", name), "video/mp4", 1024)
}
