// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/output/save_video_file.rs - 保存视频文件
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

//! 将标注后的帧编码为 MP4 视频文件。
//!
//! # URL 格式
//!
//! - `video:///path/to/output.mp4` - 输出路径，默认 10 fps、H.264 编码
//! - `video:///path/to/output.mp4?fps=25&codec=mpeg4` - 指定帧率与编码器
//!
//! # 依赖
//!
//! 需要系统安装 ffmpeg 命令行工具。帧以 rgb24 原始数据写入 ffmpeg 的标准输入，
//! 编码器在收到第一帧时才启动（此时才知道分辨率）。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  ffmpeg::{FfmpegPrograms, STDERR_TAIL_LINES, StderrDrain, tail},
  frame::Frame,
  output::FrameSink,
};

#[derive(Error, Debug)]
pub enum SaveVideoFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("视频编码错误: {0}")]
  EncodingError(String),
  #[error("参数验证错误: {0}")]
  ValidationError(String),
  #[error("帧尺寸变化: 期望 {expected:?}, 实际 {actual:?}")]
  FrameSizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
}

pub const DEFAULT_FPS: u32 = 10;
const DEFAULT_CODEC: &str = "libx264";
const MIN_FPS: u32 = 1;
const MAX_FPS: u32 = 120;

/// 正在运行的 ffmpeg 编码进程
struct Encoder {
  child: Child,
  stdin: Option<ChildStdin>,
  stderr: StderrDrain,
  recent: Vec<String>,
  size: (u32, u32),
}

impl Encoder {
  fn spawn(
    ffmpeg: &Path,
    path: &Path,
    fps: u32,
    codec: &str,
    size: (u32, u32),
  ) -> Result<Self, SaveVideoFileError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    info!(
      "启动视频编码: {}x{} @ {} fps ({}) -> {}",
      size.0,
      size.1,
      fps,
      codec,
      path.display()
    );

    let mut child = Command::new(ffmpeg)
      .args(encoder_args(path, fps, codec, size))
      .stdin(Stdio::piped())
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| {
        SaveVideoFileError::EncodingError(format!("无法执行 ffmpeg (请确保已安装): {}", e))
      })?;

    let stdin = child.stdin.take();
    let stderr = match child.stderr.take().map(StderrDrain::spawn) {
      Some(Ok(stderr)) => stderr,
      Some(Err(e)) => {
        let _ = child.kill();
        let _ = child.wait();
        return Err(e.into());
      }
      None => {
        let _ = child.kill();
        let _ = child.wait();
        return Err(SaveVideoFileError::EncodingError(
          "ffmpeg 标准错误不可用".to_string(),
        ));
      }
    };

    Ok(Self {
      child,
      stdin,
      stderr,
      recent: Vec::new(),
      size,
    })
  }

  fn collect_stderr(&mut self, lines: Vec<String>) {
    for line in lines {
      warn!("ffmpeg 编码: {}", line);
      self.recent.push(line);
    }
    let excess = self.recent.len().saturating_sub(STDERR_TAIL_LINES);
    self.recent.drain(..excess);
  }

  fn write(&mut self, frame: &Frame) -> Result<(), SaveVideoFileError> {
    let actual = (frame.width(), frame.height());
    if actual != self.size {
      return Err(SaveVideoFileError::FrameSizeMismatch {
        expected: self.size,
        actual,
      });
    }

    let lines = self.stderr.try_lines();
    self.collect_stderr(lines);

    let stdin = self
      .stdin
      .as_mut()
      .ok_or_else(|| SaveVideoFileError::EncodingError("编码器已关闭".to_string()))?;
    stdin.write_all(frame.image.as_raw())?;
    Ok(())
  }

  fn finish(mut self) -> Result<(), SaveVideoFileError> {
    // 关闭标准输入，ffmpeg 读到 EOF 后写出文件尾
    drop(self.stdin.take());
    let status = self.child.wait()?;
    let lines = self.stderr.finish();
    self.collect_stderr(lines);

    if status.success() {
      Ok(())
    } else {
      let message = tail(&self.recent);
      error!("ffmpeg 错误 ({}): {}", status, message);
      Err(SaveVideoFileError::EncodingError(format!(
        "ffmpeg 失败 ({}): {}",
        status, message
      )))
    }
  }
}

fn encoder_args(path: &Path, fps: u32, codec: &str, size: (u32, u32)) -> Vec<String> {
  vec![
    "-y".into(),
    "-loglevel".into(),
    "error".into(),
    "-f".into(),
    "rawvideo".into(),
    "-pix_fmt".into(),
    "rgb24".into(),
    "-s".into(),
    format!("{}x{}", size.0, size.1),
    "-framerate".into(),
    fps.to_string(),
    "-i".into(),
    "pipe:0".into(),
    // yuv420p 要求宽高为偶数
    "-vf".into(),
    "pad=ceil(iw/2)*2:ceil(ih/2)*2".into(),
    "-c:v".into(),
    codec.to_string(),
    "-pix_fmt".into(),
    "yuv420p".into(),
    path.to_string_lossy().into_owned(),
  ]
}

/// 固定帧率的视频文件输出
pub struct SaveVideoFileOutput {
  path: PathBuf,
  fps: u32,
  codec: String,
  programs: FfmpegPrograms,
  encoder: Option<Encoder>,
  frames: usize,
}

impl FromUrlWithScheme for SaveVideoFileOutput {
  const SCHEME: &'static str = "video";
}

impl FromUrl for SaveVideoFileOutput {
  type Error = SaveVideoFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveVideoFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let mut output = Self::new(uri.path(), DEFAULT_FPS)?;
    for (k, v) in uri.query_pairs() {
      match k.as_ref() {
        "fps" => {
          let fps = v
            .parse::<u32>()
            .map_err(|_| SaveVideoFileError::ValidationError(format!("无效的帧率: {}", v)))?;
          output = output.with_fps(fps)?;
        }
        "codec" => output.codec = v.into_owned(),
        _ => warn!("忽略未知参数: {}={}", k, v),
      }
    }

    Ok(output)
  }
}

impl SaveVideoFileOutput {
  pub fn new(path: impl AsRef<Path>, fps: u32) -> Result<Self, SaveVideoFileError> {
    Self {
      path: path.as_ref().to_path_buf(),
      fps: DEFAULT_FPS,
      codec: DEFAULT_CODEC.to_string(),
      programs: FfmpegPrograms::default(),
      encoder: None,
      frames: 0,
    }
    .with_fps(fps)
  }

  pub fn with_fps(mut self, fps: u32) -> Result<Self, SaveVideoFileError> {
    if !(MIN_FPS..=MAX_FPS).contains(&fps) {
      return Err(SaveVideoFileError::ValidationError(format!(
        "FPS {} 超出有效范围 [{}, {}]",
        fps, MIN_FPS, MAX_FPS
      )));
    }
    self.fps = fps;
    Ok(self)
  }

  pub fn with_programs(mut self, programs: FfmpegPrograms) -> Self {
    self.programs = programs;
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn fps(&self) -> u32 {
    self.fps
  }

  pub fn frames(&self) -> usize {
    self.frames
  }
}

impl FrameSink for SaveVideoFileOutput {
  type Error = SaveVideoFileError;

  fn write_frame(&mut self, frame: &Frame) -> Result<(), Self::Error> {
    if self.encoder.is_none() {
      let size = (frame.width(), frame.height());
      self.encoder = Some(Encoder::spawn(
        &self.programs.ffmpeg,
        &self.path,
        self.fps,
        &self.codec,
        size,
      )?);
    }

    if let Some(encoder) = self.encoder.as_mut() {
      encoder.write(frame)?;
      self.frames += 1;
    }
    Ok(())
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    match self.encoder.take() {
      Some(encoder) => {
        encoder.finish()?;
        info!("视频编码完成: {} 帧 -> {}", self.frames, self.path.display());
      }
      None => info!("没有帧可以编码为视频，跳过编码过程"),
    }
    Ok(())
  }
}

impl Drop for SaveVideoFileOutput {
  fn drop(&mut self) {
    if let Some(encoder) = self.encoder.take()
      && let Err(e) = encoder.finish()
    {
      error!("结束视频编码失败: {}", e);
    }
  }
}
