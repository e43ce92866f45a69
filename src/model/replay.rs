// 该文件是 Shanan Snap （山南快照） 项目的一部分。
// src/model/replay.rs - 回放推理流水线
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

//! 回放流水线
//!
//! 从目录中读取事先记录的流水线输出，目录结构与权重名称一致：
//!
//! ```text
//! <root>/Xenova/detr-resnet-50.json
//! <root>/Xenova/owlvit-base-patch32.json
//! ```
//!
//! 每个文件是一个检测数组，字段为 `label`、`score` 与 `box`。
//! 地址形如 `replay:///var/lib/shanan/replay`。

use std::path::PathBuf;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{
    DetectOptions, Detection, LabelPrompt, ModelLoadError, ModelTask, Pipeline, PipelineError,
    PipelineLoader, WeightsLocator,
  },
};

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

#[derive(Debug, Clone)]
pub struct ReplayLoader {
  root: PathBuf,
}

impl FromUrlWithScheme for ReplayLoader {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayLoader {
  type Error = ReplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ReplayError::SchemeMismatch(url.scheme().to_string()));
    }

    Ok(ReplayLoader {
      root: PathBuf::from(url.path()),
    })
  }
}

impl ReplayLoader {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  fn record_path(&self, locator: &WeightsLocator) -> PathBuf {
    self.root.join(format!("{}.json", locator.name))
  }
}

impl PipelineLoader for ReplayLoader {
  type Pipeline = ReplayPipeline;

  fn init_pipeline(
    &self,
    task: ModelTask,
    locator: &WeightsLocator,
  ) -> Result<Self::Pipeline, ModelLoadError> {
    let path = self.record_path(locator);
    info!("加载回放记录: {} ({}, {})", path.display(), task, locator.url);

    let data = std::fs::read(&path)
      .map_err(|e| ModelLoadError::new(format!("{}: {}", path.display(), e)))?;
    let detections: Vec<Detection> = serde_json::from_slice(&data)
      .map_err(|e| ModelLoadError::new(format!("{}: {}", path.display(), e)))?;

    debug!("回放记录包含 {} 个检测", detections.len());
    Ok(ReplayPipeline { task, detections })
  }
}

/// 返回固定记录的流水线，按阈值、topk 与零样本标签过滤
#[derive(Debug, Clone)]
pub struct ReplayPipeline {
  task: ModelTask,
  detections: Vec<Detection>,
}

impl ReplayPipeline {
  pub fn new(task: ModelTask, detections: Vec<Detection>) -> Self {
    Self { task, detections }
  }
}

impl Pipeline for ReplayPipeline {
  fn detect(
    &self,
    image: &RgbImage,
    labels: Option<&LabelPrompt>,
    options: &DetectOptions,
  ) -> Result<Vec<Detection>, PipelineError> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
      return Err(PipelineError::EmptyImage(w, h));
    }

    let prompt = labels.filter(|_| self.task.accepts_labels());
    let mut result: Vec<Detection> = self
      .detections
      .iter()
      .filter(|d| d.score >= options.threshold)
      .filter(|d| prompt.is_none_or(|p| p.contains_ignore_case(&d.label)))
      .cloned()
      .collect();

    result.sort_by(|a, b| b.score.total_cmp(&a.score));
    result.truncate(options.topk);
    Ok(result)
  }
}
