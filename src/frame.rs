// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/frame.rs - 帧与感兴趣区域定义
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

use image::{RgbImage, imageops};
use serde::Serialize;

/// 帧数据
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据（HWC，8 位）
  pub image: RgbImage,
  /// 帧索引，从 0 开始
  pub index: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64) -> Self {
    Self { image, index }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// 像素坐标下的矩形，左上角为 (x, y)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PixelRect {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

impl PixelRect {
  pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  /// 由 `[x_min, y_min, x_max, y_max]` 像素坐标构造，坐标截断取整并裁剪到图像范围内
  pub fn from_bbox(bbox: &[f32; 4], image_width: u32, image_height: u32) -> Self {
    let to_px = |v: f32, limit: u32| -> u32 {
      if v.is_finite() {
        (v.max(0.0) as u32).min(limit)
      } else {
        0
      }
    };

    let x_min = to_px(bbox[0], image_width);
    let y_min = to_px(bbox[1], image_height);
    let x_max = to_px(bbox[2], image_width);
    let y_max = to_px(bbox[3], image_height);

    Self {
      x: x_min,
      y: y_min,
      width: x_max.saturating_sub(x_min),
      height: y_max.saturating_sub(y_min),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }

  pub fn right(&self) -> u32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> u32 {
    self.y + self.height
  }

  pub fn contains(&self, x: u32, y: u32) -> bool {
    x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
  }

  /// 将局部坐标平移到父图像坐标系
  pub fn translate(&self, origin: &PixelRect) -> Self {
    Self {
      x: self.x + origin.x,
      y: self.y + origin.y,
      ..*self
    }
  }

  /// 裁剪到给定尺寸的图像内
  pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Self {
    let x = self.x.min(image_width);
    let y = self.y.min(image_height);
    Self {
      x,
      y,
      width: self.width.min(image_width - x),
      height: self.height.min(image_height - y),
    }
  }
}

/// 感兴趣区域
///
/// 采用“复制出、修改、写回”的约定：`copy_out` 复制父帧中的矩形区域，
/// 对 ROI 的修改只有在 `write_back` 之后才会反映到父帧，且只会覆盖该矩形内的像素。
/// 多个重叠 ROI 依次处理时，后取出的 ROI 已包含先前写回的内容。
#[derive(Debug, Clone)]
pub struct Roi {
  rect: PixelRect,
  image: RgbImage,
}

impl Roi {
  pub fn copy_out(frame: &RgbImage, rect: PixelRect) -> Self {
    let rect = rect.clamp_to(frame.width(), frame.height());
    let image = if rect.is_empty() {
      RgbImage::new(rect.width, rect.height)
    } else {
      imageops::crop_imm(frame, rect.x, rect.y, rect.width, rect.height).to_image()
    };
    Self { rect, image }
  }

  pub fn rect(&self) -> PixelRect {
    self.rect
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn image_mut(&mut self) -> &mut RgbImage {
    &mut self.image
  }

  pub fn write_back(self, frame: &mut RgbImage) {
    if self.rect.is_empty() {
      return;
    }
    imageops::replace(frame, &self.image, self.rect.x as i64, self.rect.y as i64);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, (x + y) as u8]))
  }

  #[test]
  fn bbox_is_truncated_and_clamped() {
    let rect = PixelRect::from_bbox(&[-4.0, 2.9, 120.5, 30.2], 100, 50);
    assert_eq!(rect, PixelRect::new(0, 2, 100, 28));
  }

  #[test]
  fn inverted_bbox_is_degenerate() {
    let rect = PixelRect::from_bbox(&[40.0, 10.0, 20.0, 30.0], 100, 50);
    assert!(rect.is_empty());
    let rect = PixelRect::from_bbox(&[f32::NAN, 10.0, 20.0, 30.0], 100, 50);
    assert_eq!(rect.x, 0);
  }

  #[test]
  fn write_back_only_touches_roi_pixels() {
    let original = gradient(64, 48);
    let mut frame = original.clone();
    let rect = PixelRect::new(10, 8, 20, 16);

    let mut roi = Roi::copy_out(&frame, rect);
    for pixel in roi.image_mut().pixels_mut() {
      *pixel = Rgb([255, 0, 255]);
    }
    roi.write_back(&mut frame);

    for (x, y, pixel) in frame.enumerate_pixels() {
      if rect.contains(x, y) {
        assert_eq!(*pixel, Rgb([255, 0, 255]));
      } else {
        assert_eq!(pixel, original.get_pixel(x, y), "({x}, {y}) changed");
      }
    }
  }

  #[test]
  fn roi_is_a_copy_until_written_back() {
    let original = gradient(16, 16);
    let frame = original.clone();
    let mut roi = Roi::copy_out(&frame, PixelRect::new(2, 2, 4, 4));
    roi.image_mut().put_pixel(0, 0, Rgb([1, 2, 3]));
    assert_eq!(frame, original);
    assert_eq!(roi.image().get_pixel(1, 1), original.get_pixel(3, 3));
  }

  #[test]
  fn roi_past_the_edge_is_clamped() {
    let frame = gradient(16, 16);
    let roi = Roi::copy_out(&frame, PixelRect::new(12, 12, 10, 10));
    assert_eq!(roi.rect(), PixelRect::new(12, 12, 4, 4));
    assert_eq!(roi.image().dimensions(), (4, 4));
  }

  #[test]
  fn empty_roi_write_back_is_noop() {
    let original = gradient(8, 8);
    let mut frame = original.clone();
    let roi = Roi::copy_out(&frame, PixelRect::new(3, 3, 0, 5));
    assert_eq!(roi.image().width(), 0);
    roi.write_back(&mut frame);
    assert_eq!(frame, original);
  }
}
