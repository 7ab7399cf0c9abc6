// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/tract_backend.rs - tract ONNX 推理后端
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
  sync::Arc,
};

use async_trait::async_trait;
use tracing::{debug, info};
use tract_onnx::prelude::*;

use crate::{
  config::{ModelConfig, Resolution},
  model::{InferenceBackend, InferenceError, InferenceSession, LoadError},
  tensor::Tensor,
};

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// 从权重目录加载 ONNX 模型的 tract 后端
#[derive(Debug, Clone)]
pub struct TractBackend {
  weights_dir: PathBuf,
}

impl TractBackend {
  pub fn new(weights_dir: impl Into<PathBuf>) -> Self {
    Self {
      weights_dir: weights_dir.into(),
    }
  }

  fn plan_for(path: &Path, resolution: Resolution) -> TractResult<Plan> {
    tract_onnx::onnx()
      .model_for_path(path)?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(
          f32::datum_type(),
          tvec!(1, 3, resolution.height as usize, resolution.width as usize),
        ),
      )?
      .into_optimized()?
      .into_runnable()
  }
}

impl InferenceBackend for TractBackend {
  type Session = TractSession;

  fn load(&self, config: &ModelConfig) -> Result<Self::Session, LoadError> {
    let path = self.weights_dir.join(config.weights_identifier());
    let metadata = std::fs::metadata(&path).map_err(|source| LoadError::Unreadable {
      path: path.display().to_string(),
      source,
    })?;
    debug!(
      "模型文件大小: {:.2} MB",
      metadata.len() as f64 / (1024.0 * 1024.0)
    );

    let plan = Self::plan_for(&path, config.resolution())
      .map_err(|e| LoadError::Invalid(format!("{}: {:#}", path.display(), e)))?;
    info!("tract 推理计划构建完成: {}", path.display());

    Ok(TractSession {
      plan: Arc::new(plan),
      resolution: config.resolution(),
    })
  }
}

pub struct TractSession {
  plan: Arc<Plan>,
  resolution: Resolution,
}

#[async_trait]
impl InferenceSession for TractSession {
  async fn run(&self, input: Tensor) -> Result<Tensor, InferenceError> {
    let expected = [
      1,
      3,
      self.resolution.height as usize,
      self.resolution.width as usize,
    ];
    if input.dims() != expected {
      return Err(InferenceError::InvalidInput(format!(
        "期望形状 {:?}, 实际形状 {:?}",
        expected,
        input.dims()
      )));
    }

    let plan = Arc::clone(&self.plan);
    tokio::task::spawn_blocking(move || run_blocking(&plan, &input))
      .await
      .map_err(|e| InferenceError::Aborted(e.to_string()))?
  }
}

/// 引擎输出统一展平为 `[batch, N*6]`
fn run_blocking(plan: &Plan, input: &Tensor) -> Result<Tensor, InferenceError> {
  let feed = tract_onnx::prelude::Tensor::from_shape::<f32>(input.dims(), input.data())
    .map_err(|e| InferenceError::InvalidInput(format!("{:#}", e)))?;
  let outputs = plan
    .run(tvec!(feed.into()))
    .map_err(|e| InferenceError::Engine(format!("{:#}", e)))?;
  let output = outputs
    .first()
    .ok_or_else(|| InferenceError::Engine("模型没有输出".to_string()))?;
  let view = output
    .to_array_view::<f32>()
    .map_err(|e| InferenceError::Engine(format!("输出张量不是 f32: {:#}", e)))?;

  let batch = view.shape().first().copied().unwrap_or(1);
  let rest = view.shape().iter().skip(1).product::<usize>();
  let data: Vec<f32> = view.iter().copied().collect();
  Ok(Tensor::new(vec![batch, rest], data)?)
}
