// 该文件是 Shanan Snap （山南快照） 项目的一部分。
// src/bin/snap_oneshot.rs - 截取一帧并检测
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use shanan_snap::{
  FromUrl,
  input::{CameraRequest, CameraWrapper},
  model::{DEFAULT_MODEL_ID, ReplayLoader},
  output::{OutputWrapper, annotate::Annotator},
  screen::{DEFAULT_PROMPT, DetectionConfig},
  task::{OneShotTask, Task},
};

/// Shanan Snap 单次截取参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 摄像头地址，例如 v4l:///dev/video0?width=1280&height=720
  #[arg(long, value_name = "CAMERA", default_value = "v4l:///dev/video0")]
  pub camera: Url,
  /// 流水线地址，例如 replay:///var/lib/shanan/replay
  #[arg(long, value_name = "PIPELINE")]
  pub pipeline: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 模型 id
  #[arg(long, value_name = "MODEL", default_value = DEFAULT_MODEL_ID)]
  pub model: String,
  /// 零样本模型使用的逗号分隔标签
  #[arg(long, value_name = "LABELS", default_value = DEFAULT_PROMPT)]
  pub labels: String,
  /// 标签字体文件，默认使用内嵌的 DejaVu Sans
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,
  /// 截取前预览的帧数
  #[arg(long, value_name = "FRAMES", default_value_t = 10)]
  pub warmup_frames: usize,
  /// 直接检测本地图像文件，不打开摄像头
  #[arg(long, value_name = "IMAGE")]
  pub image: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("摄像头: {}", args.camera);
  info!("流水线: {}", args.pipeline);
  info!("输出路径: {}", args.output);

  let camera = CameraWrapper::from_url(&args.camera)?;
  let request = CameraRequest::from_url_query(&args.camera)?;
  let loader = ReplayLoader::from_url(&args.pipeline)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let annotator = match &args.font {
    Some(path) => Annotator::with_font_file(path)?,
    None => Annotator::default(),
  };
  let config = DetectionConfig {
    annotator: Arc::new(annotator),
    model_id: args.model,
    prompt: args.labels,
    ..DetectionConfig::default()
  };

  OneShotTask::default()
    .with_request(request)
    .with_config(config)
    .with_warmup_frames(args.warmup_frames)
    .with_image(args.image)
    .run_task(camera, loader, output)?;

  Ok(())
}
