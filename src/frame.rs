// 该文件是 Shanan Snap （山南快照） 项目的一部分。
// src/frame.rs - 静态帧与图像资源定义
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
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

const RGB_CHANNELS: usize = 3;
const YUYV_BYTES_PER_PIXEL: usize = 2;

pub const CAPTURE_SCHEME: &str = "capture";

static CAPTURE_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  SizeMismatch { expected: usize, actual: usize },
  #[error("无效的图像资源地址: {0}")]
  InvalidUri(String),
}

/// 一张被冻结的静态图像，以及指向它的资源地址
///
/// 摄像头截取的图像使用 `capture:` 地址，文件输入使用 `file://` 地址。
/// 同一会话内最多只有一张存活，替换或返回截取页面时释放。
#[derive(Debug)]
pub struct CapturedImage {
  uri: Url,
  image: RgbImage,
}

impl CapturedImage {
  /// 从摄像头帧创建图像资源
  pub fn from_capture(image: RgbImage) -> Result<Self, FrameError> {
    let seq = CAPTURE_SEQ.fetch_add(1, Ordering::Relaxed) + 1;
    let now = Utc::now();
    let raw = format!(
      "{}:{}-{:04X}",
      CAPTURE_SCHEME,
      now.format("%Y%m%dT%H%M%S%.3f"),
      seq
    );
    let uri = Url::parse(&raw).map_err(|_| FrameError::InvalidUri(raw))?;
    info!(
      "创建图像资源: {} ({}x{})",
      uri,
      image.width(),
      image.height()
    );
    Ok(Self { uri, image })
  }

  /// 读取图像文件作为图像资源（文件输入入口）
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FrameError> {
    let path = std::fs::canonicalize(path.as_ref())?;
    let uri = Url::from_file_path(&path)
      .map_err(|_| FrameError::InvalidUri(path.display().to_string()))?;
    let image = ImageReader::open(&path)?.decode()?.to_rgb8();
    info!(
      "读取图像文件: {} ({}x{})",
      uri,
      image.width(),
      image.height()
    );
    Ok(Self { uri, image })
  }

  pub fn uri(&self) -> &Url {
    &self.uri
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  /// 图像原始尺寸 (width, height)
  pub fn dimensions(&self) -> (u32, u32) {
    self.image.dimensions()
  }

  /// 显式释放图像资源
  pub fn release(self) {
    info!("释放图像资源: {}", self.uri);
  }
}

impl Drop for CapturedImage {
  fn drop(&mut self) {
    debug!("图像资源已回收: {}", self.uri);
  }
}

/// 将打包的 RGB24 数据转换为图像
pub fn rgb_from_raw(data: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
  let expected = RGB_CHANNELS * width as usize * height as usize;
  if data.len() < expected {
    return Err(FrameError::SizeMismatch {
      expected,
      actual: data.len(),
    });
  }
  RgbImage::from_raw(width, height, data[..expected].to_vec()).ok_or(FrameError::SizeMismatch {
    expected,
    actual: data.len(),
  })
}

/// 将 YUYV (YUV 4:2:2) 格式转换为 RGB 图像
pub fn rgb_from_yuyv(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
  let pixels = width as usize * height as usize;
  let expected = YUYV_BYTES_PER_PIXEL * pixels;
  if yuyv.len() < expected {
    return Err(FrameError::SizeMismatch {
      expected,
      actual: yuyv.len(),
    });
  }

  let mut rgb = Vec::with_capacity(RGB_CHANNELS * pixels);
  for chunk in yuyv[..expected].chunks_exact(4) {
    let y0 = chunk[0] as f32;
    let u = chunk[1] as f32 - 128.0;
    let y1 = chunk[2] as f32;
    let v = chunk[3] as f32 - 128.0;

    for y in [y0, y1] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  RgbImage::from_raw(width, height, rgb).ok_or(FrameError::SizeMismatch {
    expected,
    actual: yuyv.len(),
  })
}
