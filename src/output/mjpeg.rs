// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/output/mjpeg.rs - MJPEG 流输出
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

use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;
use tokio::sync::mpsc::Sender;
use tracing::debug;

use crate::frame::Frame;

pub const MJPEG_BOUNDARY: &str = "frame";
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Error, Debug)]
pub enum MjpegOutputError {
  #[error("JPEG 编码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("视频流已关闭")]
  Closed,
}

/// 将一张 JPEG 包装为 multipart 的一个分段
pub fn multipart_chunk(jpeg: &[u8]) -> Vec<u8> {
  let head = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", MJPEG_BOUNDARY);
  let mut chunk = Vec::with_capacity(head.len() + jpeg.len() + 4);
  chunk.extend_from_slice(head.as_bytes());
  chunk.extend_from_slice(jpeg);
  chunk.extend_from_slice(b"\r\n\r\n");
  chunk
}

/// 逐帧编码为 JPEG 并通过通道交给 HTTP 响应体
///
/// 运行在阻塞线程中；接收端被丢弃（客户端断开）时返回 `Closed`。
pub struct MjpegOutput {
  sender: Sender<Vec<u8>>,
  quality: u8,
  sent: usize,
}

impl MjpegOutput {
  pub fn new(sender: Sender<Vec<u8>>, quality: u8) -> Self {
    Self {
      sender,
      quality: quality.clamp(1, 100),
      sent: 0,
    }
  }

  pub fn sent(&self) -> usize {
    self.sent
  }

  pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>, MjpegOutputError> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode_image(&frame.image)?;
    Ok(multipart_chunk(&jpeg))
  }

  pub fn send_frame(&mut self, frame: &Frame) -> Result<(), MjpegOutputError> {
    if self.sender.is_closed() {
      return Err(MjpegOutputError::Closed);
    }
    let chunk = self.encode(frame)?;
    self
      .sender
      .blocking_send(chunk)
      .map_err(|_| MjpegOutputError::Closed)?;
    self.sent += 1;
    debug!("发送第 {} 帧", frame.index);
    Ok(())
  }
}
