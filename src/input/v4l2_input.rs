// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/input/v4l2_input.rs - V4L2 摄像头输入
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

use std::pin::Pin;

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

#[derive(Error, Debug)]
pub enum V4l2InputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无法打开设备 {device}: {source}")]
  OpenError {
    device: String,
    #[source]
    source: std::io::Error,
  },
  #[error("V4L2 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("设备不支持 YUYV 格式")]
  UnsupportedPixelFormat,
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

/// 直接通过 V4L2 采集 YUYV 帧并转换为 RGB
///
/// `Stream` 需要引用 `Device`，设备放在 `Pin<Box>` 中保证地址不变。
pub struct V4l2Input {
  device: Pin<Box<Device>>,
  stream: Option<Stream<'static>>,
  width: u32,
  height: u32,
  index: u64,
}

impl FromUrlWithScheme for V4l2Input {
  const SCHEME: &'static str = "v4l2";
}

impl FromUrl for V4l2Input {
  type Error = V4l2InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(V4l2InputError::SchemeMismatch(url.scheme().to_string()));
    }

    let device = match url.path() {
      "" | "/" => "/dev/video0",
      path => path,
    };
    let size = |k: &str, default: u32| {
      url
        .query_pairs()
        .find(|(key, _)| key == k)
        .and_then(|(_, v)| v.parse::<u32>().ok())
        .unwrap_or(default)
    };

    Self::open(device, size("width", 640), size("height", 480))
  }
}

impl V4l2Input {
  pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, V4l2InputError> {
    let device = Box::pin(Device::with_path(device_path).map_err(|source| {
      V4l2InputError::OpenError {
        device: device_path.to_string(),
        source,
      }
    })?);

    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;
    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(V4l2InputError::UnsupportedPixelFormat);
    }
    info!(
      "打开 V4L2 设备: {} ({}x{})",
      device_path, format.width, format.height
    );

    let mut input = Self {
      device,
      stream: None,
      width: format.width,
      height: format.height,
      index: 0,
    };

    // SAFETY: device 固定在堆上不会移动；stream 在 Drop 中先于 device 释放
    let device_ref: &Device = &input.device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, 4)?
    };
    input.stream = Some(stream);

    Ok(input)
  }
}

/// YUYV (4:2:2) 转 RGB，每 4 字节两个像素
pub(crate) fn yuyv_to_rgb(yuyv: &[u8]) -> Vec<u8> {
  let mut rgb = Vec::with_capacity(yuyv.len() / 2 * 3);
  let convert = |y: f32, u: f32, v: f32| {
    [
      (y + 1.402 * v).clamp(0.0, 255.0) as u8,
      (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8,
      (y + 1.772 * u).clamp(0.0, 255.0) as u8,
    ]
  };

  for chunk in yuyv.chunks_exact(4) {
    let u = chunk[1] as f32 - 128.0;
    let v = chunk[3] as f32 - 128.0;
    rgb.extend_from_slice(&convert(chunk[0] as f32, u, v));
    rgb.extend_from_slice(&convert(chunk[2] as f32, u, v));
  }
  rgb
}

impl Drop for V4l2Input {
  fn drop(&mut self) {
    self.stream.take();
  }
}

impl Iterator for V4l2Input {
  type Item = Result<Frame, V4l2InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let stream = self.stream.as_mut()?;
    let (buffer, _meta) = match stream.next() {
      Ok(captured) => captured,
      Err(e) => return Some(Err(e.into())),
    };

    let expected = self.width as usize * self.height as usize * 2;
    let index = self.index;
    self.index += 1;
    if buffer.len() < expected {
      return Some(Err(V4l2InputError::BufferSizeMismatch {
        expected,
        actual: buffer.len(),
      }));
    }

    let rgb = yuyv_to_rgb(&buffer[..expected]);
    Some(
      RgbImage::from_raw(self.width, self.height, rgb)
        .map(|image| Frame::new(image, index))
        .ok_or(V4l2InputError::BufferSizeMismatch {
          expected,
          actual: buffer.len(),
        }),
    )
  }
}
