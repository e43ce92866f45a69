// 该文件是 Shanan Snap （山南快照） 项目的一部分。
// src/app.rs - 页面导航
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

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::{
  frame::{CapturedImage, FrameError},
  input::{Camera, CameraRequest},
  model::PipelineLoader,
  screen::{CaptureError, CaptureScreen, DetectionConfig, DetectionScreen},
};

#[derive(Error, Debug)]
pub enum AppError {
  #[error("{0}")]
  Capture(#[from] CaptureError),
  #[error("{0}")]
  Frame(#[from] FrameError),
  #[error("当前页面不支持该操作: {0}")]
  WrongPage(&'static str),
}

pub enum Page<C: Camera, L: PipelineLoader> {
  Capture(CaptureScreen<C>),
  Detection(DetectionScreen<L>),
}

impl<C: Camera, L: PipelineLoader> Page<C, L> {
  pub fn name(&self) -> &'static str {
    match self {
      Page::Capture(_) => "capture",
      Page::Detection(_) => "detection",
    }
  }
}

/// 应用顶层状态：当前页面以及截取图像的归属
///
/// 截取成功后图像移交给检测页面；返回截取页面时检测页面连同图像一起释放，
/// 因此同一时刻最多只有一张截取图像存活。
pub struct App<C: Camera, L: PipelineLoader> {
  camera: Arc<C>,
  request: CameraRequest,
  loader: Arc<L>,
  config: DetectionConfig,
  page: Page<C, L>,
}

impl<C: Camera, L: PipelineLoader> App<C, L> {
  /// 从截取页面启动
  pub fn new(camera: C, request: CameraRequest, loader: L, config: DetectionConfig) -> Self {
    let camera = Arc::new(camera);
    let page = Page::Capture(CaptureScreen::mount(Arc::clone(&camera), request.clone()));
    Self {
      camera,
      request,
      loader: Arc::new(loader),
      config,
      page,
    }
  }

  pub fn page(&self) -> &Page<C, L> {
    &self.page
  }

  pub fn capture_screen_mut(&mut self) -> Option<&mut CaptureScreen<C>> {
    match &mut self.page {
      Page::Capture(screen) => Some(screen),
      Page::Detection(_) => None,
    }
  }

  pub fn detection_screen_mut(&mut self) -> Option<&mut DetectionScreen<L>> {
    match &mut self.page {
      Page::Detection(screen) => Some(screen),
      Page::Capture(_) => None,
    }
  }

  /// 截取一帧并进入检测页面
  pub fn capture(&mut self) -> Result<(), AppError> {
    let image = match &mut self.page {
      Page::Capture(screen) => screen.capture()?,
      Page::Detection(_) => return Err(AppError::WrongPage("capture")),
    };
    info!("进入检测页面: {}", image.uri());
    let detection =
      DetectionScreen::mount(Arc::clone(&self.loader), self.config.clone(), Some(image));
    // 截取页面在替换时析构，摄像头轨道随之停止
    drop(std::mem::replace(&mut self.page, Page::Detection(detection)));
    Ok(())
  }

  /// 在检测页面用本地文件替换当前图像
  pub fn open_image(&mut self, path: impl AsRef<Path>) -> Result<(), AppError> {
    let Page::Detection(screen) = &mut self.page else {
      return Err(AppError::WrongPage("open"));
    };
    let image = CapturedImage::from_file(path)?;
    info!("打开图像文件: {}", image.uri());
    screen.set_image(image);
    Ok(())
  }

  /// 返回截取页面，释放当前图像并重新申请摄像头
  pub fn back(&mut self) -> Result<(), AppError> {
    if let Page::Capture(_) = self.page {
      return Err(AppError::WrongPage("back"));
    }
    let capture = CaptureScreen::mount(Arc::clone(&self.camera), self.request.clone());
    if let Page::Detection(detection) = std::mem::replace(&mut self.page, Page::Capture(capture)) {
      detection.unmount();
    }
    info!("返回截取页面");
    Ok(())
  }
}
