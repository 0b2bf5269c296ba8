// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/output.rs - 输出
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

/// 帧输出：接收已经标注好的帧
pub trait FrameSink {
  type Error;

  fn write_frame(&mut self, frame: &Frame) -> Result<(), Self::Error>;

  /// 结束输出（刷新、关闭编码器等），可以重复调用
  fn finish(&mut self) -> Result<(), Self::Error> {
    Ok(())
  }
}

pub mod draw;

mod mjpeg;
pub use self::mjpeg::{
  DEFAULT_JPEG_QUALITY, MJPEG_BOUNDARY, MJPEG_CONTENT_TYPE, MjpegOutput, MjpegOutputError,
  multipart_chunk,
};

mod save_image_file;
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

mod save_video_file;
pub use self::save_video_file::{DEFAULT_FPS, SaveVideoFileError, SaveVideoFileOutput};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[error("保存视频文件错误: {0}")]
  SaveVideoFileError(#[from] SaveVideoFileError),
  #[error("MJPEG 输出错误: {0}")]
  MjpegOutputError(#[from] MjpegOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl OutputError {
  /// 下游已经关闭（例如浏览器断开了视频流）
  pub fn is_closed(&self) -> bool {
    matches!(self, OutputError::MjpegOutputError(MjpegOutputError::Closed))
  }
}

pub enum OutputWrapper {
  SaveImageFileOutput(SaveImageFileOutput),
  SaveVideoFileOutput(SaveVideoFileOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      SaveVideoFileOutput::SCHEME => {
        let output = SaveVideoFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveVideoFileOutput(output))
      }
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl OutputWrapper {
  pub fn is_video(&self) -> bool {
    matches!(self, OutputWrapper::SaveVideoFileOutput(_))
  }
}

impl FrameSink for OutputWrapper {
  type Error = OutputError;

  fn write_frame(&mut self, frame: &Frame) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::SaveImageFileOutput(output) => output.write_frame(frame).map_err(OutputError::from),
      OutputWrapper::SaveVideoFileOutput(output) => output.write_frame(frame).map_err(OutputError::from),
    }
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::SaveImageFileOutput(output) => output.finish().map_err(OutputError::from),
      OutputWrapper::SaveVideoFileOutput(output) => output.finish().map_err(OutputError::from),
    }
  }
}

impl FrameSink for MjpegOutput {
  type Error = OutputError;

  fn write_frame(&mut self, frame: &Frame) -> Result<(), Self::Error> {
    self.send_frame(frame).map_err(OutputError::from)
  }
}
