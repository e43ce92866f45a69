// 该文件是 Shanan Snap （山南快照） 项目的一部分。
// src/task.rs - 截取并检测的任务流程
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

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use tracing::{info, warn};

use crate::{
  app::App,
  frame::CapturedImage,
  input::{Camera, CameraRequest},
  model::PipelineLoader,
  output::Render,
  screen::{DetectionConfig, DetectionScreen, ModelState, RunOutcome},
};

pub trait Task<C, L, O>: Sized {
  type Error;
  fn run_task(self, camera: C, loader: L, output: O) -> Result<(), Self::Error>;
}

/// 预览若干帧后截取一张，检测一次并写出结果
///
/// 指定了 `image` 时跳过摄像头，直接检测该文件。
#[derive(Debug, Clone)]
pub struct OneShotTask {
  request: CameraRequest,
  config: DetectionConfig,
  warmup_frames: usize,
  timeout: Duration,
  image: Option<PathBuf>,
}

impl Default for OneShotTask {
  fn default() -> Self {
    Self {
      request: CameraRequest::default(),
      config: DetectionConfig::default(),
      warmup_frames: 0,
      timeout: Duration::from_secs(120),
      image: None,
    }
  }
}

impl OneShotTask {
  pub fn with_request(mut self, request: CameraRequest) -> Self {
    self.request = request;
    self
  }

  pub fn with_config(mut self, config: DetectionConfig) -> Self {
    self.config = config;
    self
  }

  pub fn with_warmup_frames(mut self, warmup_frames: usize) -> Self {
    self.warmup_frames = warmup_frames;
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn with_image(mut self, image: Option<PathBuf>) -> Self {
    self.image = image;
    self
  }

  fn warmup<C: Camera, L: PipelineLoader>(&self, app: &mut App<C, L>) -> Result<(), anyhow::Error> {
    let screen = app
      .capture_screen_mut()
      .ok_or_else(|| anyhow!("不在截取页面"))?;
    if let Some(e) = screen.error() {
      bail!("{}", e);
    }
    if self.warmup_frames == 0 {
      return Ok(());
    }

    let (tx, rx) = mpsc::channel();
    if let Err(e) = ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
    }) {
      warn!("无法设置中断处理: {}", e);
    }

    info!("预览 {} 帧...", self.warmup_frames);
    for index in 0..self.warmup_frames {
      let frame = screen.preview_frame()?;
      let (w, h) = frame.dimensions();
      info!("预览第 {} 帧: {}x{}", index + 1, w, h);
      if rx.try_recv().is_ok() {
        bail!("中断信号接收，取消截取");
      }
    }
    Ok(())
  }

  fn detect<L, O, RE>(&self, screen: &mut DetectionScreen<L>, output: &O) -> Result<(), anyhow::Error>
  where
    L: PipelineLoader,
    RE: std::error::Error + Sync + Send + 'static,
    O: Render<CapturedImage, RunOutcome, Error = RE>,
  {
    info!("等待模型 {} 加载...", screen.model().id);
    screen.wait_settled(self.timeout);
    match screen.model_state() {
      ModelState::Ready => {}
      ModelState::Error(e) => bail!("{}", e),
      ModelState::Idle | ModelState::Loading => bail!("模型加载超时"),
    }

    let now = std::time::Instant::now();
    screen.run()?;
    screen.wait_settled(self.timeout);
    if screen.is_running() {
      bail!("检测超时");
    }
    info!("检测完成，耗时: {:.2?}", now.elapsed());

    let (Some(image), Some(outcome)) = (screen.image(), screen.outcome()) else {
      bail!("检测没有产生结果");
    };
    output.render_result(image, outcome)?;

    let counts = outcome.aggregate();
    info!("共检测到 {} 个对象", counts.total_objects);
    for summary in &counts.labels {
      info!(
        "  {}: {} ({:.1}%)",
        summary.label, summary.count, summary.avg_confidence
      );
    }
    Ok(())
  }
}

impl<C, L, O, RE> Task<C, L, O> for OneShotTask
where
  C: Camera,
  L: PipelineLoader,
  RE: std::error::Error + Sync + Send + 'static,
  O: Render<CapturedImage, RunOutcome, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, camera: C, loader: L, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");

    if let Some(path) = &self.image {
      info!("使用图像文件: {}", path.display());
      let image = CapturedImage::from_file(path)?;
      let mut screen = DetectionScreen::mount(Arc::new(loader), self.config.clone(), Some(image));
      self.detect(&mut screen, &output)?;
      screen.unmount();
      return Ok(());
    }

    let mut app = App::new(camera, self.request.clone(), loader, self.config.clone());
    self.warmup(&mut app)?;
    app.capture()?;
    let screen = app
      .detection_screen_mut()
      .ok_or_else(|| anyhow!("截取后未进入检测页面"))?;
    self.detect(screen, &output)?;

    info!("任务完成，退出");
    Ok(())
  }
}
