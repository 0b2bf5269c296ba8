// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/input/read_image_file.rs - 读取图像文件
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 单张图像，打开时即解码，无法读取时立即报错
pub struct ImageFileInput {
  image: Option<RgbImage>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch(url.scheme().to_string()));
    }

    Self::open(url.path())
  }
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    info!(
      "读取图像: {} ({}x{})",
      path.display(),
      image.width(),
      image.height()
    );

    Ok(ImageFileInput {
      image: Some(image.into_rgb8()),
    })
  }
}

impl Iterator for ImageFileInput {
  type Item = Result<Frame, ImageFileInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take().map(|image| Ok(Frame::new(image, 0)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unreadable_file_fails_at_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.png");
    std::fs::write(&path, b"not an image").unwrap();
    assert!(matches!(
      ImageFileInput::open(&path),
      Err(ImageFileInputError::ImageLoadError(_))
    ));
    assert!(matches!(
      ImageFileInput::open(dir.path().join("missing.png")),
      Err(ImageFileInputError::IoError(_))
    ));
  }

  #[test]
  fn format_is_guessed_from_content() {
    let dir = tempfile::tempdir().unwrap();
    let png = dir.path().join("photo.png");
    RgbImage::new(3, 3).save(&png).unwrap();
    // 扩展名与内容不一致时按内容解码
    let renamed = dir.path().join("photo.jpg");
    std::fs::rename(&png, &renamed).unwrap();

    let mut input = ImageFileInput::open(&renamed).unwrap();
    assert_eq!(input.next().unwrap().unwrap().index, 0);
    assert!(input.next().is_none());
  }
}
