// 该文件是 Shanan Snap （山南快照） 项目的一部分。
// src/input/v4l_camera.rs - V4L2 摄像头输入
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

use image::{ImageFormat, RgbImage};
use tracing::{debug, error, info, warn};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{rgb_from_raw, rgb_from_yuyv},
  input::{CameraAccessError, Camera, CameraRequest, InputError, LiveStream, StreamError},
};

const DEFAULT_DEVICE: &str = "/dev/video0";
const STREAM_BUFFERS: u32 = 4;

const FOURCC_YUYV: &[u8; 4] = b"YUYV";
const FOURCC_RGB3: &[u8; 4] = b"RGB3";
const FOURCC_MJPG: &[u8; 4] = b"MJPG";

/// V4L2 摄像头，地址形如 `v4l:///dev/video0`
pub struct V4lCamera {
  device_path: String,
}

impl FromUrlWithScheme for V4lCamera {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lCamera {
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

    let device_path = if url.path().is_empty() || url.path() == "/" {
      DEFAULT_DEVICE.to_string()
    } else {
      url.path().to_string()
    };

    Ok(V4lCamera { device_path })
  }
}

impl V4lCamera {
  pub fn device_path(&self) -> &str {
    &self.device_path
  }
}

impl Camera for V4lCamera {
  type Stream = V4lStream;

  fn request(&self, request: &CameraRequest) -> Result<Self::Stream, CameraAccessError> {
    let access = |e: std::io::Error| CameraAccessError::new(format!("{}: {}", self.device_path, e));

    info!("打开摄像头设备: {}", self.device_path);
    let device = Device::with_path(&self.device_path).map_err(access)?;

    // V4L2 不区分前后摄像头，朝向由设备路径决定
    debug!("忽略摄像头朝向参数: {:?}", request.facing);

    let mut format = device.format().map_err(access)?;
    format.width = request.width;
    format.height = request.height;
    format.fourcc = FourCC::new(FOURCC_YUYV);
    let mut format = device.set_format(&format).map_err(access)?;

    if !is_supported(&format.fourcc) {
      warn!("设备不支持 YUYV，尝试 MJPG: {}", format.fourcc);
      format.fourcc = FourCC::new(FOURCC_MJPG);
      format = device.set_format(&format).map_err(access)?;
    }
    if !is_supported(&format.fourcc) {
      return Err(CameraAccessError::new(format!(
        "{}: unsupported pixel format {}",
        self.device_path, format.fourcc
      )));
    }

    if format.width != request.width || format.height != request.height {
      warn!(
        "设备调整了分辨率: 请求 {}x{}, 实际 {}x{}",
        request.width, request.height, format.width, format.height
      );
    }

    let stream =
      Stream::with_buffers(&device, Type::VideoCapture, STREAM_BUFFERS).map_err(access)?;

    info!(
      "摄像头流已启动: {}x{} {}",
      format.width, format.height, format.fourcc
    );

    Ok(V4lStream {
      stream: Some(stream),
      device: Some(device),
      width: format.width,
      height: format.height,
      fourcc: format.fourcc,
    })
  }
}

fn is_supported(fourcc: &FourCC) -> bool {
  [FOURCC_YUYV, FOURCC_RGB3, FOURCC_MJPG]
    .iter()
    .any(|f| fourcc.repr == **f)
}

/// 活动的 V4L2 捕获流
pub struct V4lStream {
  // stream 必须先于 device 释放
  stream: Option<Stream<'static>>,
  device: Option<Device>,
  width: u32,
  height: u32,
  fourcc: FourCC,
}

impl V4lStream {
  fn decode(&self, buffer: &[u8]) -> Result<RgbImage, StreamError> {
    if self.fourcc.repr == *FOURCC_YUYV {
      Ok(rgb_from_yuyv(buffer, self.width, self.height)?)
    } else if self.fourcc.repr == *FOURCC_RGB3 {
      Ok(rgb_from_raw(buffer, self.width, self.height)?)
    } else {
      let image = image::load_from_memory_with_format(buffer, ImageFormat::Jpeg)
        .map_err(|e| StreamError::Capture(e.to_string()))?;
      Ok(image.to_rgb8())
    }
  }
}

impl LiveStream for V4lStream {
  fn dimensions(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  fn grab(&mut self) -> Result<RgbImage, StreamError> {
    let stream = self.stream.as_mut().ok_or(StreamError::Stopped)?;
    let (buffer, meta) = stream
      .next()
      .map_err(|e| StreamError::Capture(e.to_string()))?;
    let used = (meta.bytesused as usize).min(buffer.len());
    let data = if used == 0 { buffer } else { &buffer[..used] };
    let owned = data.to_vec();
    self.decode(&owned)
  }

  fn stop(&mut self) {
    if self.stream.take().is_some() {
      info!("停止摄像头流");
    }
    self.device.take();
  }

  fn is_active(&self) -> bool {
    self.stream.is_some()
  }
}

impl Drop for V4lStream {
  fn drop(&mut self) {
    self.stop();
  }
}
