// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 摄像头与视频播放来源
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

use std::{collections::HashMap, path::PathBuf, time::Duration};

use async_trait::async_trait;
use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbaImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{
    FacingMode, LiveSource, MediaLoadError, MediaMetadata, MediaOpener, MediaUpload,
    PlaybackSource, PlaybackStatus,
  },
};

const PREROLL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("状态切换失败: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("无法获取 appsink 元素")]
  AppSinkNotFound,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("管道错误: {0}")]
  PipelineError(String),
}

impl From<GStreamerInputError> for MediaLoadError {
  fn from(err: GStreamerInputError) -> Self {
    MediaLoadError::Unavailable(err.to_string())
  }
}

struct SinkPipeline {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl SinkPipeline {
  fn launch(description: &str) -> Result<Self, GStreamerInputError> {
    gst::init()?;
    let full = format!(
      "{} ! videoconvert ! video/x-raw,format=RGBA ! appsink name=sink max-buffers=1 drop=true",
      description
    );
    info!("GStreamer 管道描述: {}", full);

    let pipeline = gst::parse::launch(&full)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;
    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkNotFound)?;
    Ok(Self { pipeline, appsink })
  }

  fn shutdown(&self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 管道失败: {}", e);
    }
  }
}

fn sample_to_rgba(sample: &gst::Sample) -> Result<RgbaImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;
  let info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = info.width() as usize;
  let height = info.height() as usize;
  let stride = info.stride().first().copied().unwrap_or(0).max(0) as usize;
  let row = width * 4;
  let stride = stride.max(row);

  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();
  let expected = stride * height.saturating_sub(1) + row;
  if height > 0 && data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  // 按行拷贝以去掉行尾填充
  let mut pixels = Vec::with_capacity(row * height);
  for y in 0..height {
    pixels.extend_from_slice(&data[y * stride..y * stride + row]);
  }
  RgbaImage::from_raw(width as u32, height as u32, pixels)
    .ok_or_else(|| GStreamerInputError::PipelineError("帧尺寸与数据不符".to_string()))
}

/// `camera://v4l2/dev/video0?width=640&height=480&fps=30&user=/dev/video1`
pub struct GStreamerCameraBuilder {
  environment_device: String,
  user_device: Option<String>,
  width: u32,
  height: u32,
  fps: u32,
}

impl FromUrlWithScheme for GStreamerCameraBuilder {
  const SCHEME: &'static str = "camera";
}

impl FromUrl for GStreamerCameraBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME || url.host_str() != Some("v4l2") {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let number = |key: &str, default: u32| {
      query
        .get(key)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
    };

    Ok(Self {
      environment_device: url.path().to_string(),
      user_device: query.get("user").cloned(),
      width: number("width", 640),
      height: number("height", 480),
      fps: number("fps", 30),
    })
  }
}

impl GStreamerCameraBuilder {
  fn description(&self, device: &str) -> String {
    format!(
      "v4l2src device={} ! video/x-raw,width={},height={},framerate={}/1",
      device, self.width, self.height, self.fps
    )
  }

  pub fn build(self) -> Result<GStreamerCamera, GStreamerInputError> {
    let mut camera = GStreamerCamera {
      builder: self,
      facing: FacingMode::default(),
      active: None,
      last_frame: None,
    };
    camera.open(FacingMode::default())?;
    Ok(camera)
  }
}

/// V4L2 摄像头，缓存最近一帧作为“当前帧”
pub struct GStreamerCamera {
  builder: GStreamerCameraBuilder,
  facing: FacingMode,
  active: Option<SinkPipeline>,
  last_frame: Option<RgbaImage>,
}

impl GStreamerCamera {
  fn device(&self, facing: FacingMode) -> Option<&str> {
    match facing {
      FacingMode::Environment => Some(self.builder.environment_device.as_str()),
      FacingMode::User => self.builder.user_device.as_deref(),
    }
  }

  fn open(&mut self, facing: FacingMode) -> Result<(), GStreamerInputError> {
    let device = self
      .device(facing)
      .ok_or_else(|| GStreamerInputError::PipelineError(format!("未配置 {} 摄像头", facing)))?;
    let pipeline = SinkPipeline::launch(&self.builder.description(device))?;
    pipeline.pipeline.set_state(gst::State::Playing)?;

    if let Some(previous) = self.active.replace(pipeline) {
      previous.shutdown();
    }
    self.facing = facing;
    self.last_frame = None;
    Ok(())
  }
}

impl LiveSource for GStreamerCamera {
  fn grab(&mut self) -> Option<RgbaImage> {
    let active = self.active.as_ref()?;
    if let Some(sample) = active.appsink.try_pull_sample(gst::ClockTime::ZERO) {
      match sample_to_rgba(&sample) {
        Ok(frame) => self.last_frame = Some(frame),
        Err(e) => error!("摄像头帧转换失败: {}", e),
      }
    }
    self.last_frame.clone()
  }

  fn facing(&self) -> FacingMode {
    self.facing
  }

  fn switch_facing(&mut self, facing: FacingMode) -> Result<(), MediaLoadError> {
    if facing == self.facing {
      return Ok(());
    }
    self.open(facing).map_err(MediaLoadError::from)
  }
}

impl Drop for GStreamerCamera {
  fn drop(&mut self) {
    if let Some(active) = self.active.take() {
      active.shutdown();
    }
  }
}

/// 视频文件播放：`filesrc ! decodebin`，预滚动后元数据可用
pub struct GStreamerPlayback {
  inner: SinkPipeline,
  metadata: MediaMetadata,
  playing: bool,
  ended: bool,
  failure: Option<String>,
  last_frame: Option<RgbaImage>,
}

impl GStreamerPlayback {
  pub fn open(path: &std::path::Path) -> Result<Self, GStreamerInputError> {
    let inner = SinkPipeline::launch(&format!(
      "filesrc location=\"{}\" ! decodebin",
      path.display()
    ))?;
    inner.pipeline.set_state(gst::State::Paused)?;

    let timeout = gst::ClockTime::from_mseconds(PREROLL_TIMEOUT.as_millis() as u64);
    let (result, _, _) = inner.pipeline.state(timeout);
    if let Err(e) = result {
      inner.shutdown();
      return Err(e.into());
    }

    let Some(preroll) = inner.appsink.try_pull_preroll(timeout) else {
      inner.shutdown();
      return Err(GStreamerInputError::PipelineError(
        "预滚动超时，未获得首帧".to_string(),
      ));
    };
    let first = match sample_to_rgba(&preroll) {
      Ok(first) => first,
      Err(e) => {
        inner.shutdown();
        return Err(e);
      }
    };

    let duration = inner
      .pipeline
      .query_duration::<gst::ClockTime>()
      .map(|d| Duration::from_nanos(d.nseconds()));
    let metadata = MediaMetadata {
      width: first.width(),
      height: first.height(),
      duration,
    };
    debug!("视频元数据: {:?}", metadata);

    Ok(Self {
      inner,
      metadata,
      playing: false,
      ended: false,
      failure: None,
      last_frame: Some(first),
    })
  }

  fn poll_bus(&mut self) {
    let Some(bus) = self.inner.pipeline.bus() else {
      return;
    };
    while let Some(message) = bus.pop_filtered(&[gst::MessageType::Eos, gst::MessageType::Error])
    {
      match message.view() {
        gst::MessageView::Eos(..) => {
          info!("视频播放结束");
          self.ended = true;
          self.playing = false;
        }
        gst::MessageView::Error(err) => {
          error!("视频播放错误: {}", err.error());
          self.failure = Some(err.error().to_string());
          self.playing = false;
        }
        _ => {}
      }
    }
  }
}

impl PlaybackSource for GStreamerPlayback {
  fn metadata(&self) -> MediaMetadata {
    self.metadata
  }

  fn play(&mut self) -> Result<(), MediaLoadError> {
    if self.ended {
      self.rewind()?;
    }
    self
      .inner
      .pipeline
      .set_state(gst::State::Playing)
      .map_err(|e| MediaLoadError::Control(e.to_string()))?;
    self.playing = true;
    Ok(())
  }

  fn pause(&mut self) -> Result<(), MediaLoadError> {
    self
      .inner
      .pipeline
      .set_state(gst::State::Paused)
      .map_err(|e| MediaLoadError::Control(e.to_string()))?;
    self.playing = false;
    Ok(())
  }

  fn rewind(&mut self) -> Result<(), MediaLoadError> {
    self
      .inner
      .pipeline
      .seek_simple(
        gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
        gst::ClockTime::ZERO,
      )
      .map_err(|e| MediaLoadError::Control(e.to_string()))?;
    self.ended = false;
    Ok(())
  }

  fn status(&mut self) -> PlaybackStatus {
    self.poll_bus();
    if self.failure.is_some() {
      PlaybackStatus::Failed
    } else if self.ended {
      PlaybackStatus::Ended
    } else if self.playing {
      PlaybackStatus::Playing
    } else {
      PlaybackStatus::Paused
    }
  }

  fn take_error(&mut self) -> Option<MediaLoadError> {
    self.failure.take().map(MediaLoadError::Unavailable)
  }

  fn current_frame(&mut self) -> Option<RgbaImage> {
    if let Some(sample) = self.inner.appsink.try_pull_sample(gst::ClockTime::ZERO) {
      match sample_to_rgba(&sample) {
        Ok(frame) => self.last_frame = Some(frame),
        Err(e) => error!("视频帧转换失败: {}", e),
      }
    }
    self.last_frame.clone()
  }

  fn release(&mut self) {
    self.inner.shutdown();
    self.playing = false;
    self.last_frame = None;
  }
}

/// 在阻塞线程上打开视频，等待预滚动完成
#[derive(Debug, Clone, Default)]
pub struct GStreamerMediaOpener;

#[async_trait]
impl MediaOpener for GStreamerMediaOpener {
  async fn open(&self, upload: &MediaUpload) -> Result<Box<dyn PlaybackSource>, MediaLoadError> {
    let path: PathBuf = upload.path.clone();
    let playback = tokio::task::spawn_blocking(move || GStreamerPlayback::open(&path))
      .await
      .map_err(|e| MediaLoadError::Unavailable(e.to_string()))??;
    Ok(Box::new(playback))
  }
}
