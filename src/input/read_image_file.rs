// 该文件是 Shanan Snap （山南快照） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage};
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{CameraAccessError, Camera, CameraRequest, InputError, LiveStream, StreamError},
};

/// 把一张图像文件当作摄像头使用，每一帧都是同一张图
pub struct ImageFileCamera {
  path: String,
}

impl FromUrlWithScheme for ImageFileCamera {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileCamera {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch);
    }

    Ok(ImageFileCamera {
      path: url.path().to_string(),
    })
  }
}

impl Camera for ImageFileCamera {
  type Stream = StillStream;

  fn request(&self, request: &CameraRequest) -> Result<Self::Stream, CameraAccessError> {
    let image = ImageReader::open(&self.path)
      .map_err(|e| CameraAccessError::new(format!("{}: {}", self.path, e)))?
      .decode()
      .map_err(|e| CameraAccessError::new(format!("{}: {}", self.path, e)))?
      .to_rgb8();

    info!(
      "图像文件输入: {} ({}x{}, 请求 {}x{})",
      self.path,
      image.width(),
      image.height(),
      request.width,
      request.height
    );

    Ok(StillStream::new(image))
  }
}

/// 重复给出同一帧的流
pub struct StillStream {
  image: Option<RgbImage>,
  dimensions: (u32, u32),
}

impl StillStream {
  pub fn new(image: RgbImage) -> Self {
    let dimensions = image.dimensions();
    Self {
      image: Some(image),
      dimensions,
    }
  }
}

impl LiveStream for StillStream {
  fn dimensions(&self) -> (u32, u32) {
    self.dimensions
  }

  fn grab(&mut self) -> Result<RgbImage, StreamError> {
    self.image.clone().ok_or(StreamError::Stopped)
  }

  fn stop(&mut self) {
    self.image.take();
  }

  fn is_active(&self) -> bool {
    self.image.is_some()
  }
}
