// 该文件是 Shanan Snap （山南快照） 项目的一部分。
// src/screen/capture.rs - 摄像头截取页面
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

use std::sync::Arc;

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  frame::{CapturedImage, FrameError},
  input::{Camera, CameraAccessError, CameraRequest, LiveStream, StreamError},
};

#[derive(Error, Debug)]
pub enum CaptureError {
  #[error("Capture is disabled")]
  Disabled,
  #[error("{0}")]
  Stream(#[from] StreamError),
  #[error("{0}")]
  Frame(#[from] FrameError),
}

/// 摄像头截取页面
///
/// 挂载时申请摄像头；截取一帧后立即停止所有轨道。
/// 页面销毁时无论处于什么状态都会释放设备。
pub struct CaptureScreen<C: Camera> {
  camera: Arc<C>,
  request: CameraRequest,
  stream: Option<C::Stream>,
  error: Option<CameraAccessError>,
  capturing: bool,
}

impl<C: Camera> CaptureScreen<C> {
  pub fn mount(camera: Arc<C>, request: CameraRequest) -> Self {
    let mut screen = Self {
      camera,
      request,
      stream: None,
      error: None,
      capturing: false,
    };
    screen.start();
    screen
  }

  fn start(&mut self) {
    info!(
      "申请摄像头: {}x{} {:?}",
      self.request.width, self.request.height, self.request.facing
    );
    match self.camera.request(&self.request) {
      Ok(stream) => {
        let (w, h) = stream.dimensions();
        info!("摄像头流已就绪: {}x{}", w, h);
        self.stream = Some(stream);
        self.error = None;
      }
      Err(e) => {
        error!("{}", e);
        self.stream = None;
        self.error = Some(e);
      }
    }
  }

  /// 失败后重新申请摄像头
  pub fn retry(&mut self) -> Result<(), CameraAccessError> {
    if self.is_streaming() {
      return Ok(());
    }
    self.stop_tracks();
    self.capturing = false;
    self.start();
    match &self.error {
      Some(e) => Err(e.clone()),
      None => Ok(()),
    }
  }

  pub fn error(&self) -> Option<&CameraAccessError> {
    self.error.as_ref()
  }

  pub fn request(&self) -> &CameraRequest {
    &self.request
  }

  pub fn is_streaming(&self) -> bool {
    self.stream.as_ref().is_some_and(|s| s.is_active())
  }

  pub fn is_capturing(&self) -> bool {
    self.capturing
  }

  /// 截取按钮是否可用
  pub fn can_capture(&self) -> bool {
    self.is_streaming() && !self.capturing
  }

  pub fn stream_dimensions(&self) -> Option<(u32, u32)> {
    self.stream.as_ref().map(|s| s.dimensions())
  }

  /// 获取一帧预览
  pub fn preview_frame(&mut self) -> Result<RgbImage, CaptureError> {
    match self.stream.as_mut() {
      Some(stream) if stream.is_active() => Ok(stream.grab()?),
      _ => Err(CaptureError::Disabled),
    }
  }

  /// 冻结当前帧并释放摄像头，每个页面只能成功截取一次
  pub fn capture(&mut self) -> Result<CapturedImage, CaptureError> {
    if !self.can_capture() {
      warn!("截取不可用: streaming={}, capturing={}", self.is_streaming(), self.capturing);
      return Err(CaptureError::Disabled);
    }
    self.capturing = true;

    let grabbed = match self.stream.as_mut() {
      Some(stream) => stream.grab(),
      None => Err(StreamError::Stopped),
    };
    let image = match grabbed {
      Ok(image) => image,
      Err(e) => {
        error!("截取失败: {}", e);
        self.capturing = false;
        return Err(e.into());
      }
    };

    self.stop_tracks();
    Ok(CapturedImage::from_capture(image)?)
  }

  fn stop_tracks(&mut self) {
    if let Some(mut stream) = self.stream.take() {
      stream.stop();
      info!("摄像头轨道已停止");
    }
  }

  /// 离开页面
  pub fn unmount(mut self) {
    self.stop_tracks();
  }
}

impl<C: Camera> Drop for CaptureScreen<C> {
  fn drop(&mut self) {
    self.stop_tracks();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

  use image::Rgb;

  #[derive(Default)]
  struct Tracks {
    live: AtomicUsize,
    deny: AtomicBool,
    fail_grab: AtomicBool,
  }

  struct FakeCamera(Arc<Tracks>);

  struct FakeStream {
    tracks: Arc<Tracks>,
    active: bool,
  }

  impl Camera for FakeCamera {
    type Stream = FakeStream;

    fn request(&self, request: &CameraRequest) -> Result<FakeStream, CameraAccessError> {
      if self.0.deny.load(Ordering::SeqCst) {
        return Err(CameraAccessError::new("Permission denied"));
      }
      assert_eq!((request.width, request.height), (1280, 720));
      self.0.live.fetch_add(1, Ordering::SeqCst);
      Ok(FakeStream {
        tracks: Arc::clone(&self.0),
        active: true,
      })
    }
  }

  impl LiveStream for FakeStream {
    fn dimensions(&self) -> (u32, u32) {
      (8, 6)
    }

    fn grab(&mut self) -> Result<RgbImage, StreamError> {
      if self.tracks.fail_grab.load(Ordering::SeqCst) {
        return Err(StreamError::Capture("timeout".to_string()));
      }
      Ok(RgbImage::from_pixel(8, 6, Rgb([1, 2, 3])))
    }

    fn stop(&mut self) {
      if self.active {
        self.active = false;
        self.tracks.live.fetch_sub(1, Ordering::SeqCst);
      }
    }

    fn is_active(&self) -> bool {
      self.active
    }
  }

  fn mount(tracks: &Arc<Tracks>) -> CaptureScreen<FakeCamera> {
    CaptureScreen::mount(
      Arc::new(FakeCamera(Arc::clone(tracks))),
      CameraRequest::default(),
    )
  }

  #[test]
  fn capture_freezes_frame_and_stops_tracks() {
    let tracks = Arc::new(Tracks::default());
    let mut screen = mount(&tracks);
    assert!(screen.can_capture());
    assert_eq!(tracks.live.load(Ordering::SeqCst), 1);

    let preview = screen.preview_frame().unwrap();
    assert_eq!(preview.dimensions(), (8, 6));

    let captured = screen.capture().unwrap();
    assert_eq!(captured.dimensions(), (8, 6));
    assert_eq!(tracks.live.load(Ordering::SeqCst), 0);
    assert!(!screen.can_capture());
  }

  #[test]
  fn second_capture_is_disabled() {
    let tracks = Arc::new(Tracks::default());
    let mut screen = mount(&tracks);
    screen.capture().unwrap();
    assert!(matches!(screen.capture(), Err(CaptureError::Disabled)));
  }

  #[test]
  fn denied_camera_disables_capture_until_retry() {
    let tracks = Arc::new(Tracks::default());
    tracks.deny.store(true, Ordering::SeqCst);
    let mut screen = mount(&tracks);

    assert_eq!(
      screen.error().map(|e| e.to_string()).as_deref(),
      Some("Failed to access webcam: Permission denied")
    );
    for _ in 0..3 {
      assert!(!screen.can_capture());
      assert!(matches!(screen.capture(), Err(CaptureError::Disabled)));
    }
    assert!(screen.retry().is_err());
    assert!(!screen.can_capture());

    tracks.deny.store(false, Ordering::SeqCst);
    screen.retry().unwrap();
    assert!(screen.error().is_none());
    assert!(screen.can_capture());
  }

  #[test]
  fn failed_grab_keeps_stream_for_another_try() {
    let tracks = Arc::new(Tracks::default());
    let mut screen = mount(&tracks);
    tracks.fail_grab.store(true, Ordering::SeqCst);
    assert!(matches!(screen.capture(), Err(CaptureError::Stream(_))));
    assert!(screen.can_capture());

    tracks.fail_grab.store(false, Ordering::SeqCst);
    assert!(screen.capture().is_ok());
  }

  #[test]
  fn teardown_releases_device() {
    let tracks = Arc::new(Tracks::default());
    let screen = mount(&tracks);
    assert_eq!(tracks.live.load(Ordering::SeqCst), 1);
    drop(screen);
    assert_eq!(tracks.live.load(Ordering::SeqCst), 0);

    let screen = mount(&tracks);
    screen.unmount();
    assert_eq!(tracks.live.load(Ordering::SeqCst), 0);
  }
}
