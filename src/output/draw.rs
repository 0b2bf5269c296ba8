// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/output/draw.rs - 检测结果标注
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{info, warn};

use crate::{frame::PixelRect, model::Label};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_CHAR_WIDTH: f32 = 8.5; // 无字体时每字符平均宽度（粗略估计）
const LABEL_BOX_EXTRA_HEIGHT: u32 = 5;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_TEXT_COLOR: [u8; 3] = [255, 255, 255];
const BOX_THICKNESS: u32 = 2;

pub const HELMET_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
pub const NO_HELMET_COLOR: [u8; 3] = [255, 0, 0]; // 红色
pub const LICENSE_PLATE_COLOR: [u8; 3] = [0, 255, 255]; // 青色
pub const FALLBACK_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色

const FONT_CANDIDATES: [&str; 5] = [
  "assets/font.ttf",
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/Library/Fonts/Arial.ttf",
];

/// 类别到标注颜色（RGB）的映射
pub fn color_for(label: &Label) -> [u8; 3] {
  match label {
    Label::Helmet => HELMET_COLOR,
    Label::NoHelmet => NO_HELMET_COLOR,
    Label::LicensePlate => LICENSE_PLATE_COLOR,
    Label::Vehicle | Label::Other(_) => FALLBACK_COLOR,
  }
}

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(PathBuf),
}

/// 标注器：在图像上原地绘制带标签的矩形框
///
/// 越界策略为裁剪：标签背景放在框上沿之上，空间不足时下移到 y = 0，
/// 超出右边界的部分截断；零面积矩形直接忽略。
#[derive(Clone)]
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
}

impl Default for Draw {
  fn default() -> Self {
    Self::new(None)
  }
}

impl Draw {
  pub fn new(font: Option<FontArc>) -> Self {
    Self {
      font,
      font_size: LABEL_FONT_SIZE,
    }
  }

  pub fn from_font_file(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data).map_err(|_| DrawError::InvalidFont(path.into()))?;
    Ok(Self::new(Some(font)))
  }

  /// 优先使用给定字体，否则依次尝试常见系统字体；都不可用时只绘制标签背景
  pub fn discover(preferred: Option<&Path>) -> Self {
    if let Some(path) = preferred {
      match Self::from_font_file(path) {
        Ok(draw) => {
          info!("使用字体: {}", path.display());
          return draw;
        }
        Err(e) => warn!("无法加载字体 {}: {}", path.display(), e),
      }
    }

    for candidate in FONT_CANDIDATES {
      if let Ok(draw) = Self::from_font_file(candidate) {
        info!("使用字体: {}", candidate);
        return draw;
      }
    }

    warn!("没有可用字体, 标签将不包含文字");
    Self::default()
  }

  fn text_extent(&self, text: &str) -> (u32, u32) {
    match &self.font {
      Some(font) => text_size(PxScale::from(self.font_size), font, text),
      None => (
        (text.chars().count() as f32 * LABEL_CHAR_WIDTH) as u32,
        self.font_size as u32,
      ),
    }
  }

  /// 标签背景的位置，紧贴矩形上沿并裁剪到图像内
  pub fn label_box(&self, image: &RgbImage, rect: PixelRect, text: &str) -> Option<PixelRect> {
    let (text_w, text_h) = self.text_extent(text);
    let box_h = text_h + LABEL_BOX_EXTRA_HEIGHT;
    let x = rect.x.min(image.width());
    let y = rect.y.saturating_sub(box_h);
    let width = text_w.min(image.width() - x);
    let height = box_h.min(image.height().saturating_sub(y));

    let label = PixelRect::new(x, y, width, height);
    (!label.is_empty()).then_some(label)
  }

  /// 绘制矩形边框、标签背景与标签文字
  pub fn draw(&self, image: &mut RgbImage, rect: PixelRect, label: &str, color: [u8; 3]) {
    let rect = rect.clamp_to(image.width(), image.height());
    if rect.is_empty() {
      return;
    }

    // 边框加粗为 2 像素
    for inset in 0..BOX_THICKNESS {
      if rect.width <= 2 * inset || rect.height <= 2 * inset {
        break;
      }
      let outline = Rect::at((rect.x + inset) as i32, (rect.y + inset) as i32)
        .of_size(rect.width - 2 * inset, rect.height - 2 * inset);
      draw_hollow_rect_mut(image, outline, Rgb(color));
    }

    let Some(label_box) = self.label_box(image, rect, label) else {
      return;
    };
    let background =
      Rect::at(label_box.x as i32, label_box.y as i32).of_size(label_box.width, label_box.height);
    draw_filled_rect_mut(image, background, Rgb(color));

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb(LABEL_TEXT_COLOR),
        label_box.x as i32,
        label_box.y as i32 + LABEL_TEXT_VERTICAL_PADDING,
        PxScale::from(self.font_size),
        font,
        label,
      );
    }
  }
}
