// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/input.rs - 输入
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

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

mod ffmpeg_input;
pub use self::ffmpeg_input::{CameraOptions, FfmpegInput, FfmpegInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

#[cfg(feature = "v4l2_input")]
mod v4l2_input;
#[cfg(feature = "v4l2_input")]
pub use self::v4l2_input::{V4l2Input, V4l2InputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("FFmpeg 输入错误: {0}")]
  FfmpegInputError(#[from] FfmpegInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[cfg(feature = "v4l2_input")]
  #[error("V4L2 输入错误: {0}")]
  V4l2InputError(#[from] V4l2InputError),
  #[error("第 {index} 帧解码失败: {message}")]
  DecodeError { index: u64, message: String },
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 帧来源，逐帧产出；单帧的解码失败以 `Err` 返回，迭代可以继续
pub trait FrameSource: Iterator<Item = Result<Frame, InputError>> {}

impl<T> FrameSource for T where T: Iterator<Item = Result<Frame, InputError>> {}

pub enum InputWrapper {
  ImageFile(ImageFileInput),
  Ffmpeg(FfmpegInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamer(GStreamerInput),
  #[cfg(feature = "v4l2_input")]
  V4l2(V4l2Input),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_input")]
    {
      if url.scheme() == GStreamerInputPipelineBuilder::SCHEME {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        return Ok(InputWrapper::GStreamer(input));
      }
    }
    #[cfg(feature = "v4l2_input")]
    {
      if url.scheme() == V4l2Input::SCHEME {
        let input = V4l2Input::from_url(url)?;
        return Ok(InputWrapper::V4l2(input));
      }
    }

    match url.scheme() {
      ImageFileInput::SCHEME => Ok(InputWrapper::ImageFile(ImageFileInput::from_url(url)?)),
      "video" | "camera" => Ok(InputWrapper::Ffmpeg(FfmpegInput::from_url(url)?)),
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl InputWrapper {
  /// 是否为单张图片
  pub fn is_image(&self) -> bool {
    matches!(self, InputWrapper::ImageFile(_))
  }
}

impl Iterator for InputWrapper {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::ImageFile(input) => input.next().map(|r| r.map_err(InputError::from)),
      InputWrapper::Ffmpeg(input) => input.next().map(|r| {
        r.map_err(|e| match e {
          FfmpegInputError::DecodeError { index, message } => {
            InputError::DecodeError { index, message }
          }
          other => other.into(),
        })
      }),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamer(input) => input.next().map(|r| r.map_err(InputError::from)),
      #[cfg(feature = "v4l2_input")]
      InputWrapper::V4l2(input) => input.next().map(|r| r.map_err(InputError::from)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  #[test]
  fn image_url_yields_single_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.png");
    RgbImage::from_pixel(5, 4, Rgb([1, 2, 3])).save(&path).unwrap();

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file:", "image:", 1)).unwrap();
    let mut input = InputWrapper::from_url(&url).unwrap();
    assert!(input.is_image());

    let frame = input.next().unwrap().unwrap();
    assert_eq!((frame.width(), frame.height()), (5, 4));
    assert!(input.next().is_none());
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("rtmp://example.com/live").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch(_))
    ));
  }
}
