// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! 基于 GStreamer 的视频文件与摄像头输入，需要启用 `gstreamer_input` 特性，
//! 并安装 GStreamer 开发库（`libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev`）。
//!
//! # URL 格式
//!
//! - `gst://file/path/to/video.mp4?rotate=90`
//! - `gst://camera/dev/video0?width=640&height=480&fps=15&format=YUY2`

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("找不到 appsink 元素")]
  AppSinkNotFound,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式: {0}")]
  UnsupportedFormat(String),
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("状态切换错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

enum PipelineItem {
  FileSource(String),
  CameraSource {
    camera: String,
    format: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  VideoFlip(u32),
  TargetFormat,
}

impl PipelineItem {
  fn to_pipeline(&self) -> String {
    match self {
      PipelineItem::FileSource(path) => format!("filesrc location=\"{}\" ! decodebin", path),
      PipelineItem::CameraSource {
        camera,
        format,
        width,
        height,
        fps,
      } => format!(
        "v4l2src device={} ! video/x-raw,format={},width={},height={},framerate={}/1",
        camera, format, width, height, fps
      ),
      PipelineItem::VideoFlip(method) => format!("videoflip method={}", method),
      PipelineItem::TargetFormat => "videoconvert ! video/x-raw,format=RGB".to_string(),
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  items: Vec<PipelineItem>,
}

impl GStreamerInputPipelineBuilder {
  fn camera(path: &str, query: &HashMap<String, String>) -> Self {
    let number = |k: &str, default: u32| {
      query
        .get(k)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
    };

    Self {
      items: vec![PipelineItem::CameraSource {
        camera: path.to_string(),
        format: query.get("format").cloned().unwrap_or_else(|| "YUY2".to_string()),
        width: number("width", 640),
        height: number("height", 480),
        fps: number("fps", 15),
      }],
    }
  }

  fn file(path: &str) -> Self {
    Self {
      items: vec![PipelineItem::FileSource(path.to_string())],
    }
  }

  fn video_flip(rotate: Option<&str>) -> Option<PipelineItem> {
    match rotate? {
      "90" => Some(PipelineItem::VideoFlip(1)),
      "180" => Some(PipelineItem::VideoFlip(2)),
      "270" => Some(PipelineItem::VideoFlip(3)),
      _ => None,
    }
  }

  pub fn description(&self) -> String {
    let pipeline = self
      .items
      .iter()
      .map(PipelineItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!("{} ! appsink max-buffers=2 name=sink sync=false", pipeline)
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let description = self.description();
    info!("GStreamer 管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkNotFound)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput {
      pipeline,
      appsink,
      index: 0,
    })
  }
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch(url.scheme().to_string()));
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let mut builder = match url.host_str() {
      Some("camera") => Self::camera(url.path(), &query),
      Some("file") => Self::file(url.path()),
      other => {
        return Err(GStreamerInputError::SchemeMismatch(format!(
          "gst://{}",
          other.unwrap_or_default()
        )));
      }
    };

    if let Some(flip) = Self::video_flip(query.get("rotate").map(String::as_str)) {
      builder.items.push(flip);
    }
    builder.items.push(PipelineItem::TargetFormat);

    Ok(builder)
  }
}

/// GStreamer 视频输入，析构时停止管道
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  index: u64,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 管道: {}", e);
    }
  }
}

fn sample_to_image(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;

  let info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  if info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerInputError::UnsupportedFormat(format!(
      "{:?}",
      info.format()
    )));
  }

  let (width, height) = (info.width(), info.height());
  if width == 0 || height == 0 {
    return Err(GStreamerInputError::VideoInfoError);
  }
  let stride = info.stride()[0] as usize;
  let row = width as usize * 3;

  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let expected = stride * (height as usize - 1) + row;
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  // 去掉每行末尾的对齐填充
  let mut pixels = Vec::with_capacity(row * height as usize);
  for y in 0..height as usize {
    pixels.extend_from_slice(&data[y * stride..y * stride + row]);
  }

  RgbImage::from_raw(width, height, pixels).ok_or(GStreamerInputError::BufferSizeMismatch {
    expected: row * height as usize,
    actual: data.len(),
  })
}

impl Iterator for GStreamerInput {
  type Item = Result<Frame, GStreamerInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    // 流结束（EOS）时 pull_sample 返回错误
    let sample = self.appsink.pull_sample().ok()?;
    let index = self.index;
    self.index += 1;
    Some(sample_to_image(&sample).map(|image| Frame::new(image, index)))
  }
}
