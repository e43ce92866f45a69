// 该文件是 Shanan Snap （山南快照） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{Datelike, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::CapturedImage,
  model::{Detection, ModelDescriptor},
  output::{
    Render,
    aggregate::{AggregatedCounts, aggregate},
  },
  screen::RunOutcome,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 每次检测写入的记录
#[derive(Debug, Serialize)]
pub struct DetectionRecord<'a> {
  pub image: &'a str,
  pub width: u32,
  pub height: u32,
  pub model: &'a ModelDescriptor,
  pub detections: &'a [Detection],
  pub summary: AggregatedCounts,
}

/// 按日期分目录记录检测结果，地址形如 `folder:///data/records?source&always`
///
/// - `source`：同时保存未标注的原图
/// - `always`：没有检测到物体时也写入
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counters: Mutex<u16>,
  save_source: bool,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let save_source = uri.query_pairs().any(|(k, _)| k == "source");
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      frame_counters: Mutex::new(0),
      save_source,
      always,
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u16 {
    // 计数器只做文件名区分，锁中毒时沿用内部值
    let mut counter = self
      .frame_counters
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    let id = counter.wrapping_add(1);
    *counter = id;
    id
  }

  /// 返回本次记录的路径前缀（不含扩展名）
  fn frame_stem(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!(
      "{}-{:04X}",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn write_record(
    &self,
    stem: &Path,
    frame: &CapturedImage,
    result: &RunOutcome,
  ) -> Result<(), DirectoryRecordOutputError> {
    let (width, height) = frame.dimensions();
    let record = DetectionRecord {
      image: result.image_uri.as_str(),
      width,
      height,
      model: result.model,
      detections: &result.detections,
      summary: aggregate(&result.detections),
    };
    let json = serde_json::to_vec_pretty(&record)?;
    std::fs::write(stem.with_extension("json"), json)?;
    Ok(())
  }
}

impl Render<CapturedImage, RunOutcome> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &CapturedImage, result: &RunOutcome) -> Result<(), Self::Error> {
    if !self.always && result.detections.is_empty() {
      debug!("没有检测到物体，跳过记录");
      return Ok(());
    }

    let stem = self.frame_stem()?;
    result.canvas.save(stem.with_extension("png"))?;
    if self.save_source {
      let source = stem.with_file_name(format!(
        "{}-source.png",
        stem.file_name().map(|s| s.to_string_lossy()).unwrap_or_default()
      ));
      frame.image().save(source)?;
    }
    self.write_record(&stem, frame, result)?;

    info!("记录检测结果: {}", stem.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BoundingBox, registry};
  use image::RgbImage;

  fn outcome(frame: &CapturedImage, detections: Vec<Detection>) -> RunOutcome {
    RunOutcome {
      model: registry::lookup("detr-resnet"),
      image_uri: frame.uri().clone(),
      detections,
      canvas: frame.image().clone(),
    }
  }

  fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
      for entry in std::fs::read_dir(&d).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else {
          out.push(path);
        }
      }
    }
    out.sort();
    out
  }

  #[test]
  fn writes_image_json_and_source() {
    let root = std::env::temp_dir().join(format!("shanan-snap-record-{}", std::process::id()));
    let url = url::Url::parse(&format!("folder://{}?source", root.display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();

    let frame = CapturedImage::from_capture(RgbImage::new(16, 8)).unwrap();
    let detection = Detection {
      label: "person".to_string(),
      score: 0.9,
      bbox: BoundingBox {
        xmin: 1.0,
        ymin: 1.0,
        xmax: 8.0,
        ymax: 6.0,
      },
    };
    output
      .render_result(&frame, &outcome(&frame, vec![detection]))
      .unwrap();

    let files = files_under(&root);
    assert_eq!(files.len(), 3);
    let json = files
      .iter()
      .find(|p| p.extension().is_some_and(|e| e == "json"))
      .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&std::fs::read(json).unwrap()).unwrap();
    assert_eq!(value["model"]["id"], "detr-resnet");
    assert_eq!(value["summary"]["total_objects"], 1);
    assert_eq!(value["detections"][0]["box"]["xmax"], 8.0);

    std::fs::remove_dir_all(&root).unwrap();
  }

  #[test]
  fn empty_results_skipped_unless_always() {
    let root = std::env::temp_dir().join(format!("shanan-snap-empty-{}", std::process::id()));
    let frame = CapturedImage::from_capture(RgbImage::new(4, 4)).unwrap();

    let url = url::Url::parse(&format!("folder://{}", root.display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    output.render_result(&frame, &outcome(&frame, vec![])).unwrap();
    assert!(!root.exists());

    let url = url::Url::parse(&format!("folder://{}?always", root.display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    output.render_result(&frame, &outcome(&frame, vec![])).unwrap();
    assert_eq!(files_under(&root).len(), 2);

    std::fs::remove_dir_all(&root).unwrap();
  }
}
