// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 推理引擎边界
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

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
  config::ModelConfig,
  tensor::{Tensor, TensorError},
};

mod label;
pub use self::label::{COCO_CLASSES, CocoLabel};

#[cfg(feature = "backend-tract")]
mod tract_backend;
#[cfg(feature = "backend-tract")]
pub use self::tract_backend::{TractBackend, TractSession};

#[derive(Error, Debug)]
pub enum LoadError {
  #[error("模型文件不可读: {path}: {source}")]
  Unreadable {
    path: String,
    source: std::io::Error,
  },
  #[error("模型无效: {0}")]
  Invalid(String),
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("输入张量无效: {0}")]
  InvalidInput(String),
  #[error("推理引擎错误: {0}")]
  Engine(String),
  #[error("推理超时: 超过 {0:?}")]
  Timeout(Duration),
  #[error("推理任务异常终止: {0}")]
  Aborted(String),
  #[error("输出张量无效: {0}")]
  MalformedOutput(#[from] TensorError),
}

/// 已加载模型的推理会话
#[async_trait]
pub trait InferenceSession: Send + Sync {
  async fn run(&self, input: Tensor) -> Result<Tensor, InferenceError>;
}

/// 推理后端，按模型配置加载会话
pub trait InferenceBackend {
  type Session: InferenceSession + 'static;

  fn load(&self, config: &ModelConfig) -> Result<Self::Session, LoadError>;
}

#[derive(Debug, Clone)]
pub struct InferenceOutput {
  pub tensor: Tensor,
  pub elapsed: Duration,
}

impl InferenceOutput {
  pub fn elapsed_ms(&self) -> f64 {
    self.elapsed.as_secs_f64() * 1000.0
  }
}

/// 一次已派发的推理调用
///
/// 丢弃该 future 不会取消引擎内的调用，调用在后台完成后结果被丢弃。
pub type InferenceCall =
  Pin<Box<dyn Future<Output = Result<InferenceOutput, InferenceError>> + Send + 'static>>;

/// 推理调用边界：派发、计时、可选超时
#[derive(Clone)]
pub struct InferenceClient {
  session: Arc<dyn InferenceSession>,
  timeout: Option<Duration>,
}

impl InferenceClient {
  pub fn new(session: impl InferenceSession + 'static) -> Self {
    Self {
      session: Arc::new(session),
      timeout: None,
    }
  }

  pub fn load<B: InferenceBackend>(backend: &B, config: &ModelConfig) -> Result<Self, LoadError> {
    info!(
      "加载模型: {} ({})",
      config.weights_identifier(),
      config.resolution()
    );
    let session = backend.load(config)?;
    info!("模型加载完成");
    Ok(Self::new(session))
  }

  /// 为推理调用设置超时，`None` 表示无限等待
  pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.timeout
  }

  /// 在独立任务上派发推理，返回可等待的调用
  pub fn dispatch(&self, input: Tensor) -> InferenceCall {
    let session = Arc::clone(&self.session);
    let timeout = self.timeout;
    let handle = tokio::spawn(async move {
      let start = Instant::now();
      let tensor = session.run(input).await?;
      let elapsed = start.elapsed();
      debug!("推理完成，耗时: {:.2?}", elapsed);
      Ok(InferenceOutput { tensor, elapsed })
    });

    Box::pin(async move {
      let joined = match timeout {
        Some(limit) => tokio::time::timeout(limit, handle)
          .await
          .map_err(|_| InferenceError::Timeout(limit))?,
        None => handle.await,
      };
      joined.map_err(|e| InferenceError::Aborted(e.to_string()))?
    })
  }

  pub async fn run(&self, input: Tensor) -> Result<InferenceOutput, InferenceError> {
    self.dispatch(input).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Echo {
    delay: Duration,
  }

  #[async_trait]
  impl InferenceSession for Echo {
    async fn run(&self, input: Tensor) -> Result<Tensor, InferenceError> {
      tokio::time::sleep(self.delay).await;
      Ok(input)
    }
  }

  fn input() -> Tensor {
    Tensor::new(vec![1, 6], vec![0.0; 6]).unwrap()
  }

  #[tokio::test(start_paused = true)]
  async fn elapsed_time_is_measured_around_the_call() {
    let client = InferenceClient::new(Echo {
      delay: Duration::from_millis(40),
    });
    let output = client.run(input()).await.unwrap();
    assert_eq!(output.tensor.dims(), &[1, 6]);
    assert!(output.elapsed_ms() >= 40.0);
  }

  #[tokio::test(start_paused = true)]
  async fn stalled_call_times_out() {
    let client = InferenceClient::new(Echo {
      delay: Duration::from_secs(3600),
    })
    .with_timeout(Some(Duration::from_millis(500)));
    let err = client.run(input()).await.unwrap_err();
    assert!(matches!(err, InferenceError::Timeout(limit) if limit == Duration::from_millis(500)));
  }
}
