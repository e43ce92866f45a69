// 该文件是 Shanan Snap （山南快照） 项目的一部分。
// src/input.rs - 摄像头输入
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

use std::str::FromStr;

use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::{FromUrl, frame::FrameError};

#[cfg(feature = "v4l_input")]
mod v4l_camera;
#[cfg(feature = "v4l_input")]
pub use self::v4l_camera::{V4lCamera, V4lStream};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileCamera, StillStream};

pub const DEFAULT_CAPTURE_WIDTH: u32 = 1280;
pub const DEFAULT_CAPTURE_HEIGHT: u32 = 720;

/// 摄像头朝向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FacingMode {
  /// 前置（面向用户）
  #[default]
  User,
  /// 后置
  Environment,
}

impl FromStr for FacingMode {
  type Err = InputError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "user" => Ok(FacingMode::User),
      "environment" => Ok(FacingMode::Environment),
      other => Err(InputError::InvalidParameter("facing", other.to_string())),
    }
  }
}

/// 摄像头访问请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraRequest {
  pub width: u32,
  pub height: u32,
  pub facing: FacingMode,
}

impl Default for CameraRequest {
  fn default() -> Self {
    Self {
      width: DEFAULT_CAPTURE_WIDTH,
      height: DEFAULT_CAPTURE_HEIGHT,
      facing: FacingMode::User,
    }
  }
}

impl CameraRequest {
  /// 从 URL 查询参数读取请求，例如 `?width=640&height=480&facing=environment`
  pub fn from_url_query(url: &Url) -> Result<Self, InputError> {
    let mut request = Self::default();
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "width" => {
          request.width = v
            .parse()
            .map_err(|_| InputError::InvalidParameter("width", v.to_string()))?
        }
        "height" => {
          request.height = v
            .parse()
            .map_err(|_| InputError::InvalidParameter("height", v.to_string()))?
        }
        "facing" => request.facing = v.parse()?,
        _ => {}
      }
    }
    Ok(request)
  }
}

/// 摄像头访问失败（权限或硬件问题）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to access webcam: {reason}")]
pub struct CameraAccessError {
  reason: String,
}

impl CameraAccessError {
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
pub enum StreamError {
  #[error("摄像头流已停止")]
  Stopped,
  #[error("无法捕获帧: {0}")]
  Capture(String),
  #[error("帧转换错误: {0}")]
  Frame(#[from] FrameError),
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("Invalid parameter {0}: {1}")]
  InvalidParameter(&'static str, String),
}

/// 摄像头设备
pub trait Camera {
  type Stream: LiveStream;

  fn request(&self, request: &CameraRequest) -> Result<Self::Stream, CameraAccessError>;
}

/// 一个活动的摄像头流，拥有设备访问权
pub trait LiveStream {
  /// 当前流的实际尺寸 (width, height)
  fn dimensions(&self) -> (u32, u32);

  /// 获取当前帧
  fn grab(&mut self) -> Result<RgbImage, StreamError>;

  /// 停止所有轨道并释放设备，可重复调用
  fn stop(&mut self);

  fn is_active(&self) -> bool;
}

pub enum CameraWrapper {
  #[cfg(feature = "v4l_input")]
  V4l(V4lCamera),
  #[cfg(feature = "read_image_file")]
  ImageFile(ImageFileCamera),
}

impl FromUrl for CameraWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "v4l_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4lCamera::SCHEME {
        return Ok(CameraWrapper::V4l(V4lCamera::from_url(url)?));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileCamera::SCHEME {
        return Ok(CameraWrapper::ImageFile(ImageFileCamera::from_url(url)?));
      }
    }
    Err(InputError::SchemeMismatch)
  }
}

pub enum StreamWrapper {
  #[cfg(feature = "v4l_input")]
  V4l(V4lStream),
  #[cfg(feature = "read_image_file")]
  ImageFile(StillStream),
}

impl Camera for CameraWrapper {
  type Stream = StreamWrapper;

  fn request(&self, request: &CameraRequest) -> Result<Self::Stream, CameraAccessError> {
    match self {
      #[cfg(feature = "v4l_input")]
      CameraWrapper::V4l(camera) => camera.request(request).map(StreamWrapper::V4l),
      #[cfg(feature = "read_image_file")]
      CameraWrapper::ImageFile(camera) => camera.request(request).map(StreamWrapper::ImageFile),
    }
  }
}

impl LiveStream for StreamWrapper {
  fn dimensions(&self) -> (u32, u32) {
    match self {
      #[cfg(feature = "v4l_input")]
      StreamWrapper::V4l(stream) => stream.dimensions(),
      #[cfg(feature = "read_image_file")]
      StreamWrapper::ImageFile(stream) => stream.dimensions(),
    }
  }

  fn grab(&mut self) -> Result<RgbImage, StreamError> {
    match self {
      #[cfg(feature = "v4l_input")]
      StreamWrapper::V4l(stream) => stream.grab(),
      #[cfg(feature = "read_image_file")]
      StreamWrapper::ImageFile(stream) => stream.grab(),
    }
  }

  fn stop(&mut self) {
    match self {
      #[cfg(feature = "v4l_input")]
      StreamWrapper::V4l(stream) => stream.stop(),
      #[cfg(feature = "read_image_file")]
      StreamWrapper::ImageFile(stream) => stream.stop(),
    }
  }

  fn is_active(&self) -> bool {
    match self {
      #[cfg(feature = "v4l_input")]
      StreamWrapper::V4l(stream) => stream.is_active(),
      #[cfg(feature = "read_image_file")]
      StreamWrapper::ImageFile(stream) => stream.is_active(),
    }
  }
}
