// 该文件是 Shanan Snap （山南快照） 项目的一部分。
// src/model.rs - 模型与检测结果
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

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod pipeline;
pub mod registry;
mod replay;

pub use self::pipeline::{
  DEFAULT_CACHE_DIR, DEFAULT_REMOTE_PATH_TEMPLATE, PipelineEnv, WeightsLocator,
};
pub use self::registry::{DEFAULT_MODEL_ID, ModelDescriptor};
pub use self::replay::{ReplayLoader, ReplayPipeline};

/// 检测阈值，运行和结果过滤共用
pub const DETECTION_THRESHOLD: f32 = 0.1;
pub const DETECTION_TOPK: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelTask {
  ObjectDetection,
  /// 按用户给定的标签列表检测
  ZeroShotObjectDetection,
}

impl ModelTask {
  pub fn as_str(&self) -> &'static str {
    match self {
      ModelTask::ObjectDetection => "object-detection",
      ModelTask::ZeroShotObjectDetection => "zero-shot-object-detection",
    }
  }

  pub fn accepts_labels(&self) -> bool {
    matches!(self, ModelTask::ZeroShotObjectDetection)
  }
}

impl std::fmt::Display for ModelTask {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.pad(self.as_str())
  }
}

/// 源图像像素坐标下的边框
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  pub xmin: f32,
  pub ymin: f32,
  pub xmax: f32,
  pub ymax: f32,
}

impl BoundingBox {
  pub fn width(&self) -> f32 {
    self.xmax - self.xmin
  }

  pub fn height(&self) -> f32 {
    self.ymax - self.ymin
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub label: String,
  pub score: f32,
  #[serde(rename = "box")]
  pub bbox: BoundingBox,
}

/// 从逗号分隔文本解析出的标签列表，去除空白并丢弃空项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelPrompt {
  labels: Vec<String>,
}

impl LabelPrompt {
  pub fn parse(text: &str) -> Self {
    let labels = text
      .split(',')
      .map(str::trim)
      .filter(|l| !l.is_empty())
      .map(str::to_string)
      .collect();
    Self { labels }
  }

  pub fn labels(&self) -> &[String] {
    &self.labels
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn contains_ignore_case(&self, label: &str) -> bool {
    self.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectOptions {
  pub threshold: f32,
  pub topk: usize,
}

impl Default for DetectOptions {
  fn default() -> Self {
    Self {
      threshold: DETECTION_THRESHOLD,
      topk: DETECTION_TOPK,
    }
  }
}

/// 模型流水线初始化失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to load: {reason}")]
pub struct ModelLoadError {
  reason: String,
}

impl ModelLoadError {
  pub fn new(reason: impl Into<String>) -> Self {
    Self {
      reason: reason.into(),
    }
  }

  pub fn reason(&self) -> &str {
    &self.reason
  }
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("{0}")]
  Inference(String),
  #[error("空图像: {0}x{1}")]
  EmptyImage(u32, u32),
}

/// 已初始化的推理流水线
pub trait Pipeline: Send + Sync {
  fn detect(
    &self,
    image: &RgbImage,
    labels: Option<&LabelPrompt>,
    options: &DetectOptions,
  ) -> Result<Vec<Detection>, PipelineError>;
}

/// 按任务类型和权重位置创建流水线
pub trait PipelineLoader: Send + Sync + 'static {
  type Pipeline: Pipeline + 'static;

  fn init_pipeline(
    &self,
    task: ModelTask,
    locator: &WeightsLocator,
  ) -> Result<Self::Pipeline, ModelLoadError>;
}

/// 只保留分数严格大于阈值的结果
pub fn filter_by_score(detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
  detections
    .into_iter()
    .filter(|d| d.score > threshold)
    .collect()
}
