// 该文件是 Shanan Snap （山南快照） 项目的一部分。
// src/output/annotate.rs - 目标检测结果可视化
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

use ab_glyph::{FontArc, FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::Detection;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: i32 = 18;
const LABEL_TEXT_HORIZONTAL_PADDING: i32 = 5;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 1;
const LABEL_TEXT_COLOR: [u8; 3] = [255, 255, 255];
const BOX_LINE_WIDTH: i32 = 3;

static EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

pub const DEFAULT_COLOR: [u8; 3] = [0x21, 0x96, 0xf3];

static COLOR_TABLE: [(&str, [u8; 3]); 13] = [
  ("person", [0x00, 0xff, 0x88]),
  ("cell phone", [0xff, 0x00, 0x77]),
  ("book", [0xff, 0xaa, 0x00]),
  ("handbag", [0x00, 0xaa, 0xff]),
  ("backpack", [0x00, 0xaa, 0xff]),
  ("bag", [0x00, 0xaa, 0xff]),
  ("bottle", [0xaa, 0xff, 0x00]),
  ("laptop", [0xff, 0x44, 0xff]),
  ("watch", [0xff, 0xcc, 0x00]),
  ("headphones", [0xcc, 0x00, 0xff]),
  ("glasses", [0xff, 0x66, 0x99]),
  ("car", [0xff, 0x00, 0xff]),
  ("dog", [0x00, 0xff, 0xff]),
];

/// 按标签查找颜色（忽略大小写），未登记的标签使用默认颜色
pub fn label_color(label: &str) -> [u8; 3] {
  let label = label.to_lowercase();
  COLOR_TABLE
    .iter()
    .find(|(name, _)| *name == label)
    .map(|(_, color)| *color)
    .unwrap_or(DEFAULT_COLOR)
}

/// 标签文本，例如 `person (90.0%)`
pub fn chip_text(detection: &Detection) -> String {
  format!("{} ({:.1}%)", detection.label, detection.score * 100.0)
}

#[derive(Error, Debug)]
pub enum AnnotateError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

pub struct Annotator {
  font: FontArc,
  font_size: f32,
  label_text_height: i32,
}

impl Default for Annotator {
  fn default() -> Self {
    let font = FontRef::try_from_slice(EMBEDDED_FONT).expect("无法加载嵌入的字体文件");
    Self::with_font(FontArc::new(font))
  }
}

impl Annotator {
  fn with_font(font: FontArc) -> Self {
    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
    }
  }

  pub fn with_font_data(data: Vec<u8>) -> Result<Self, AnnotateError> {
    Ok(Self::with_font(FontArc::try_from_vec(data)?))
  }

  pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self, AnnotateError> {
    let path = path.as_ref();
    info!("加载标签字体: {}", path.display());
    Self::with_font_data(std::fs::read(path)?)
  }

  /// 在源图像原始分辨率的画布上按顺序绘制检测结果，后绘制的覆盖先绘制的
  pub fn annotate(&self, source: &RgbImage, detections: &[Detection]) -> RgbImage {
    let mut canvas = source.clone();
    for detection in detections {
      self.draw_detection(&mut canvas, detection);
    }
    debug!(
      "绘制 {} 个检测结果, 画布 {}x{}",
      detections.len(),
      canvas.width(),
      canvas.height()
    );
    canvas
  }

  /// 重新设定画布尺寸为源图像尺寸后绘制
  pub fn annotate_into(&self, canvas: &mut RgbImage, source: &RgbImage, detections: &[Detection]) {
    *canvas = self.annotate(source, detections);
  }

  fn text_width(&self, text: &str) -> i32 {
    let (w, _) = text_size(PxScale::from(self.font_size), &self.font, text);
    i32::try_from(w).unwrap_or(i32::MAX / 4)
  }

  fn draw_detection(&self, canvas: &mut RgbImage, detection: &Detection) {
    let (cw, ch) = (canvas.width() as i32, canvas.height() as i32);
    let bbox = &detection.bbox;
    let (Some(x), Some(y), Some(x_max), Some(y_max)) = (
      pixel(bbox.xmin, cw),
      pixel(bbox.ymin, ch),
      pixel(bbox.xmax, cw),
      pixel(bbox.ymax, ch),
    ) else {
      warn!("忽略坐标无效的检测结果: {} {:?}", detection.label, bbox);
      return;
    };
    let (w, h) = (x_max - x, y_max - y);
    let color = Rgb(label_color(&detection.label));

    // 3 像素线宽，以边框路径为中心
    let half = BOX_LINE_WIDTH / 2;
    for offset in -half..=half {
      let (rw, rh) = (w + 2 * offset, h + 2 * offset);
      if rw <= 0 || rh <= 0 {
        continue;
      }
      let rect = Rect::at(x - offset, y - offset).of_size(rw as u32, rh as u32);
      draw_hollow_rect_mut(canvas, rect, color);
    }

    let text = chip_text(detection);
    let chip_w = self.text_width(&text) + 2 * LABEL_TEXT_HORIZONTAL_PADDING;
    let chip_h = self.label_text_height;

    // 标签放在边框上方；贴近顶边时放进边框内部，超出画布的部分被裁剪
    let chip_y = if y - chip_h > 0 { y - chip_h } else { y };
    let rect = Rect::at(x, chip_y).of_size(chip_w as u32, chip_h as u32);
    draw_filled_rect_mut(canvas, rect, color);

    draw_text_mut(
      canvas,
      Rgb(LABEL_TEXT_COLOR),
      x + LABEL_TEXT_HORIZONTAL_PADDING,
      chip_y + LABEL_TEXT_VERTICAL_PADDING,
      PxScale::from(self.font_size),
      &self.font,
      &text,
    );
  }
}

/// 把坐标取整并限制在画布尺寸的两倍范围内，非有限值返回 `None`
fn pixel(value: f32, extent: i32) -> Option<i32> {
  if !value.is_finite() {
    return None;
  }
  let limit = extent.max(1) as f32 * 2.0;
  Some(value.round().clamp(-limit, limit) as i32)
}
