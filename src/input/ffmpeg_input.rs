// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/input/ffmpeg_input.rs - 基于 ffmpeg 的视频与摄像头输入
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

//! 通过 ffmpeg 子进程解码视频文件或采集摄像头，输出 rgb24 原始帧。
//!
//! # URL 格式
//!
//! - `video:///path/to/input.mp4` - 视频文件，分辨率由 ffprobe 探测
//! - `camera:///dev/video0?width=640&height=480&fps=30&format=v4l2` - 摄像头
//!
//! 摄像头在打开时会立即读取第一帧，设备不可用时构造失败。
//!
//! ffmpeg 在标准错误上报告的解码错误以 `DecodeError` 返回，迭代继续；
//! 进程非零退出时在流末尾返回一个 `ProcessFailed`。摄像头进程意外结束后会重新启动。

use std::collections::VecDeque;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl,
  ffmpeg::{FfmpegPrograms, STDERR_TAIL_LINES, StderrDrain, tail},
  frame::Frame,
};

/// 摄像头进程连续重启（期间没有读到任何帧）的上限
const MAX_CAMERA_RESTARTS: usize = 3;

#[derive(Error, Debug)]
pub enum FfmpegInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无法探测视频 {path}: {message}")]
  StreamInfoError { path: PathBuf, message: String },
  #[error("无法执行 {0} (请确保已安装 ffmpeg)")]
  SpawnError(String),
  #[error("无法打开摄像头 {0}")]
  CameraOpenError(String),
  #[error("参数验证错误: {0}")]
  ValidationError(String),
  #[error("第 {index} 帧附近解码出错: {message}")]
  DecodeError { index: u64, message: String },
  #[error("ffmpeg 异常退出 ({status}): {message}")]
  ProcessFailed { status: String, message: String },
  #[error("摄像头输入中断, 已读取 {0} 帧")]
  CameraInterrupted(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraOptions {
  pub device: String,
  pub format: String,
  pub width: u32,
  pub height: u32,
  pub fps: Option<u32>,
}

impl Default for CameraOptions {
  fn default() -> Self {
    Self {
      device: "/dev/video0".to_string(),
      format: "v4l2".to_string(),
      width: 640,
      height: 480,
      fps: None,
    }
  }
}

impl CameraOptions {
  fn from_url(url: &Url) -> Result<Self, FfmpegInputError> {
    let mut options = CameraOptions::default();
    if !url.path().is_empty() && url.path() != "/" {
      options.device = url.path().to_string();
    }

    let parse = |k: &str, v: &str| {
      v.parse::<u32>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| FfmpegInputError::ValidationError(format!("无效的 {}: {}", k, v)))
    };

    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "width" => options.width = parse(k.as_ref(), v.as_ref())?,
        "height" => options.height = parse(k.as_ref(), v.as_ref())?,
        "fps" => options.fps = Some(parse(k.as_ref(), v.as_ref())?),
        "format" => options.format = v.into_owned(),
        _ => warn!("忽略未知参数: {}={}", k, v),
      }
    }
    Ok(options)
  }
}

/// 解析 `ffprobe -of csv=s=x:p=0` 的输出，例如 `1920x1080`
fn parse_dimensions(output: &str) -> Option<(u32, u32)> {
  let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
  let (w, h) = line.split_once('x')?;
  let width = w.trim().parse::<u32>().ok()?;
  let height = h.trim().trim_end_matches('x').parse::<u32>().ok()?;
  (width > 0 && height > 0).then_some((width, height))
}

fn video_dimensions(ffprobe: &Path, path: &Path) -> Result<(u32, u32), FfmpegInputError> {
  let output = Command::new(ffprobe)
    .args([
      "-v",
      "error",
      "-select_streams",
      "v:0",
      "-show_entries",
      "stream=width,height",
      "-of",
      "csv=s=x:p=0",
    ])
    .arg(path)
    .output()
    .map_err(|_| FfmpegInputError::SpawnError(ffprobe.display().to_string()))?;

  let info_error = |message: String| FfmpegInputError::StreamInfoError {
    path: path.to_path_buf(),
    message,
  };

  if !output.status.success() {
    return Err(info_error(
      String::from_utf8_lossy(&output.stderr).trim().to_string(),
    ));
  }

  parse_dimensions(&String::from_utf8_lossy(&output.stdout))
    .ok_or_else(|| info_error("没有可用的视频流".to_string()))
}

fn video_args(path: &Path) -> Vec<String> {
  vec![
    "-loglevel".into(),
    "error".into(),
    "-nostdin".into(),
    "-i".into(),
    path.to_string_lossy().into_owned(),
    "-f".into(),
    "rawvideo".into(),
    "-pix_fmt".into(),
    "rgb24".into(),
    "pipe:1".into(),
  ]
}

fn camera_args(options: &CameraOptions) -> Vec<String> {
  let mut args: Vec<String> = vec![
    "-loglevel".into(),
    "error".into(),
    "-nostdin".into(),
    "-f".into(),
    options.format.clone(),
    "-video_size".into(),
    format!("{}x{}", options.width, options.height),
  ];
  if let Some(fps) = options.fps {
    args.extend(["-framerate".into(), fps.to_string()]);
  }
  args.extend([
    "-i".into(),
    options.device.clone(),
    // 设备不支持请求的分辨率时仍输出固定尺寸
    "-vf".into(),
    format!("scale={}:{}", options.width, options.height),
    "-f".into(),
    "rawvideo".into(),
    "-pix_fmt".into(),
    "rgb24".into(),
    "pipe:1".into(),
  ]);
  args
}

/// 一个运行中的 ffmpeg 解码进程
struct Decoder {
  child: Child,
  stdout: BufReader<ChildStdout>,
  stderr: StderrDrain,
}

impl Decoder {
  fn spawn(ffmpeg: &Path, args: &[String]) -> Result<Self, FfmpegInputError> {
    debug!("{} {}", ffmpeg.display(), args.join(" "));
    let mut child = Command::new(ffmpeg)
      .args(args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|_| FfmpegInputError::SpawnError(ffmpeg.display().to_string()))?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
      let _ = child.kill();
      let _ = child.wait();
      return Err(std::io::Error::other("ffmpeg 标准输出不可用").into());
    };
    let stderr = match StderrDrain::spawn(stderr) {
      Ok(stderr) => stderr,
      Err(e) => {
        let _ = child.kill();
        let _ = child.wait();
        return Err(e.into());
      }
    };

    Ok(Self {
      child,
      stdout: BufReader::new(stdout),
      stderr,
    })
  }

  /// 等待进程退出，返回剩余的标准错误与退出状态
  fn reap(&mut self) -> (Vec<String>, std::io::Result<ExitStatus>) {
    let status = self.child.wait();
    (self.stderr.finish(), status)
  }
}

impl Drop for Decoder {
  fn drop(&mut self) {
    if let Err(e) = self.child.kill()
      && e.kind() != ErrorKind::InvalidInput
    {
      warn!("无法结束 ffmpeg 进程: {}", e);
    }
    if let Err(e) = self.child.wait() {
      warn!("等待 ffmpeg 进程退出失败: {}", e);
    }
    self.stderr.finish();
  }
}

/// ffmpeg 子进程输入
pub struct FfmpegInput {
  decoder: Decoder,
  ffmpeg: PathBuf,
  args: Vec<String>,
  /// 摄像头：进程结束后重启
  live: bool,
  restarts: usize,
  /// 最近的标准错误，用于退出错误的说明
  recent: Vec<String>,
  width: u32,
  height: u32,
  index: u64,
  finished: bool,
  pending: VecDeque<Result<Frame, FfmpegInputError>>,
}

impl FromUrl for FfmpegInput {
  type Error = FfmpegInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      "video" => Self::open_video(url.path()),
      "camera" => Self::open_camera(CameraOptions::from_url(url)?),
      other => Err(FfmpegInputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl FfmpegInput {
  pub fn open_video(path: impl AsRef<Path>) -> Result<Self, FfmpegInputError> {
    Self::open_video_with(path, &FfmpegPrograms::default())
  }

  pub fn open_video_with(
    path: impl AsRef<Path>,
    programs: &FfmpegPrograms,
  ) -> Result<Self, FfmpegInputError> {
    let path = path.as_ref();
    let (width, height) = video_dimensions(&programs.ffprobe, path)?;
    info!("打开视频: {} ({}x{})", path.display(), width, height);
    Self::spawn(&programs.ffmpeg, video_args(path), width, height)
  }

  pub fn open_camera(options: CameraOptions) -> Result<Self, FfmpegInputError> {
    Self::open_camera_with(options, &FfmpegPrograms::default())
  }

  pub fn open_camera_with(
    options: CameraOptions,
    programs: &FfmpegPrograms,
  ) -> Result<Self, FfmpegInputError> {
    info!(
      "打开摄像头: {} ({}, {}x{})",
      options.device, options.format, options.width, options.height
    );
    let mut input = Self::spawn(
      &programs.ffmpeg,
      camera_args(&options),
      options.width,
      options.height,
    )?;

    // 第一帧到达前的错误输出只记录；进程退出则打开失败
    loop {
      match input.next() {
        Some(Ok(frame)) => {
          input.pending.push_front(Ok(frame));
          input.live = true;
          return Ok(input);
        }
        Some(Err(FfmpegInputError::DecodeError { message, .. })) if !input.finished => {
          warn!("摄像头 {}: {}", options.device, message);
        }
        Some(Err(e)) => {
          return Err(FfmpegInputError::CameraOpenError(format!(
            "{}: {}",
            options.device, e
          )));
        }
        None => return Err(FfmpegInputError::CameraOpenError(options.device)),
      }
    }
  }

  fn spawn(
    ffmpeg: &Path,
    args: Vec<String>,
    width: u32,
    height: u32,
  ) -> Result<Self, FfmpegInputError> {
    let decoder = Decoder::spawn(ffmpeg, &args)?;
    Ok(Self {
      decoder,
      ffmpeg: ffmpeg.to_path_buf(),
      args,
      live: false,
      restarts: 0,
      recent: Vec::new(),
      width,
      height,
      index: 0,
      finished: false,
      pending: VecDeque::new(),
    })
  }

  pub fn dimensions(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  fn decode_error(&mut self, lines: Vec<String>) -> FfmpegInputError {
    let message = tail(&lines);
    self.recent.extend(lines);
    let excess = self.recent.len().saturating_sub(STDERR_TAIL_LINES);
    self.recent.drain(..excess);
    FfmpegInputError::DecodeError {
      index: self.index,
      message,
    }
  }

  fn read_frame(&mut self) -> Option<Result<Frame, FfmpegInputError>> {
    // 上一帧之后 ffmpeg 报告的错误先于下一帧返回
    let lines = self.decoder.stderr.try_lines();
    if !lines.is_empty() {
      return Some(Err(self.decode_error(lines)));
    }

    let mut buffer = vec![0u8; self.width as usize * self.height as usize * 3];
    match self.decoder.stdout.read_exact(&mut buffer) {
      Ok(()) => {
        let index = self.index;
        self.index += 1;
        self.restarts = 0;
        // 缓冲区长度与尺寸一致，from_raw 不会失败
        RgbImage::from_raw(self.width, self.height, buffer)
          .map(|image| Ok(Frame::new(image, index)))
      }
      Err(e) => {
        self.end_of_stream(e);
        self.pending.pop_front()
      }
    }
  }

  fn end_of_stream(&mut self, read_error: std::io::Error) {
    let (lines, status) = self.decoder.reap();
    if !lines.is_empty() {
      let error = self.decode_error(lines);
      self.pending.push_back(Err(error));
    }
    if read_error.kind() != ErrorKind::UnexpectedEof {
      self.pending.push_back(Err(read_error.into()));
    }
    match status {
      Ok(status) if status.success() => {}
      Ok(status) => {
        let message = if self.recent.is_empty() {
          "没有错误输出".to_string()
        } else {
          tail(&self.recent)
        };
        self.pending.push_back(Err(FfmpegInputError::ProcessFailed {
          status: status.to_string(),
          message,
        }));
      }
      Err(e) => self.pending.push_back(Err(e.into())),
    }

    if !self.live {
      debug!("输入结束, 共 {} 帧", self.index);
      self.finished = true;
      return;
    }

    if self.pending.is_empty() {
      self.pending.push_back(Err(FfmpegInputError::CameraInterrupted(self.index)));
    }
    self.restart();
  }

  fn restart(&mut self) {
    if self.restarts >= MAX_CAMERA_RESTARTS {
      warn!("摄像头连续重启 {} 次仍无画面, 停止采集", self.restarts);
      self.finished = true;
      return;
    }
    self.restarts += 1;
    warn!("摄像头进程结束, 第 {} 次重启", self.restarts);
    match Decoder::spawn(&self.ffmpeg, &self.args) {
      Ok(decoder) => self.decoder = decoder,
      Err(e) => {
        self.pending.push_back(Err(e));
        self.finished = true;
      }
    }
  }
}

impl Iterator for FfmpegInput {
  type Item = Result<Frame, FfmpegInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if let Some(item) = self.pending.pop_front() {
      return Some(item);
    }
    if self.finished {
      return None;
    }
    self.read_frame()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dimensions_are_parsed() {
    assert_eq!(parse_dimensions("1920x1080\n"), Some((1920, 1080)));
    assert_eq!(parse_dimensions("\n 640x360x\n"), Some((640, 360)));
    assert_eq!(parse_dimensions(""), None);
    assert_eq!(parse_dimensions("0x0"), None);
    assert_eq!(parse_dimensions("N/A"), None);
  }

  #[test]
  fn camera_options_come_from_url() {
    let url = Url::parse("camera:///dev/video1?width=1280&height=720&fps=15").unwrap();
    let options = CameraOptions::from_url(&url).unwrap();
    assert_eq!(options.device, "/dev/video1");
    assert_eq!((options.width, options.height), (1280, 720));
    assert_eq!(options.fps, Some(15));
    assert_eq!(options.format, "v4l2");

    let url = Url::parse("camera:///dev/video0?width=0").unwrap();
    assert!(CameraOptions::from_url(&url).is_err());
  }

  #[test]
  fn camera_args_request_fixed_size_rgb() {
    let args = camera_args(&CameraOptions::default()).join(" ");
    assert!(args.contains("-f v4l2 -video_size 640x480 -i /dev/video0"));
    assert!(args.contains("scale=640:480"));
    assert!(args.ends_with("-f rawvideo -pix_fmt rgb24 pipe:1"));
  }

  #[test]
  fn video_args_decode_to_stdout() {
    let args = video_args(Path::new("/tmp/in.mp4"));
    assert_eq!(args[4], "/tmp/in.mp4");
    assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
  }

  #[cfg(unix)]
  fn stub(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
  }

  /// 4x4 的 rgb24 帧为 48 字节
  #[cfg(unix)]
  fn stub_programs(dir: &Path, ffmpeg: &str) -> FfmpegPrograms {
    FfmpegPrograms {
      ffprobe: stub(dir, "ffprobe", "echo 4x4"),
      ffmpeg: stub(dir, "ffmpeg", ffmpeg),
    }
  }

  #[cfg(unix)]
  #[test]
  fn clean_stream_ends_without_errors() {
    let dir = tempfile::tempdir().unwrap();
    let programs = stub_programs(dir.path(), "head -c 144 /dev/zero");
    let input = FfmpegInput::open_video_with(dir.path().join("in.mp4"), &programs).unwrap();
    assert_eq!(input.dimensions(), (4, 4));

    let indices: Vec<u64> = input.map(|item| item.unwrap().index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
  }

  #[cfg(unix)]
  #[test]
  fn decoder_failure_is_reported_after_the_last_frame() {
    let dir = tempfile::tempdir().unwrap();
    let programs = stub_programs(
      dir.path(),
      "head -c 96 /dev/zero\necho '[h264] error while decoding MB 3 2' >&2\nexit 1",
    );
    let items: Vec<_> = FfmpegInput::open_video_with(dir.path().join("in.mp4"), &programs)
      .unwrap()
      .collect();

    assert_eq!(items.iter().filter(|item| item.is_ok()).count(), 2);
    let decode_errors: Vec<_> = items
      .iter()
      .filter_map(|item| match item {
        Err(FfmpegInputError::DecodeError { message, .. }) => Some(message.as_str()),
        _ => None,
      })
      .collect();
    assert_eq!(decode_errors.len(), 1);
    assert!(decode_errors[0].contains("error while decoding MB 3 2"));
    assert!(matches!(
      items.last(),
      Some(Err(FfmpegInputError::ProcessFailed { message, .. })) if message.contains("MB 3 2")
    ));
  }

  #[cfg(unix)]
  #[test]
  fn wrapped_decode_errors_keep_their_frame_position() {
    use crate::input::{InputError, InputWrapper};

    let dir = tempfile::tempdir().unwrap();
    let programs = stub_programs(
      dir.path(),
      "head -c 48 /dev/zero\necho 'corrupt packet' >&2\nhead -c 48 /dev/zero",
    );
    let input = FfmpegInput::open_video_with(dir.path().join("in.mp4"), &programs).unwrap();
    let items: Vec<_> = InputWrapper::Ffmpeg(input).collect();

    assert_eq!(items.iter().filter(|item| item.is_ok()).count(), 2);
    let errors: Vec<_> = items.iter().filter_map(|item| item.as_ref().err()).collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
      errors[0],
      InputError::DecodeError { index, message } if *index <= 2 && message == "corrupt packet"
    ));
  }

  #[cfg(unix)]
  #[test]
  fn camera_process_is_restarted() {
    let dir = tempfile::tempdir().unwrap();
    let programs = stub_programs(dir.path(), "head -c 48 /dev/zero");
    let options = CameraOptions {
      width: 4,
      height: 4,
      ..CameraOptions::default()
    };
    let input = FfmpegInput::open_camera_with(options, &programs).unwrap();

    let items: Vec<_> = input.take(4).collect();
    assert!(matches!(items[0], Ok(ref frame) if frame.index == 0));
    assert!(matches!(items[1], Err(FfmpegInputError::CameraInterrupted(1))));
    assert!(matches!(items[2], Ok(ref frame) if frame.index == 1));
    assert!(matches!(items[3], Err(FfmpegInputError::CameraInterrupted(2))));
  }

  #[cfg(unix)]
  #[test]
  fn camera_without_frames_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let programs = stub_programs(dir.path(), "echo 'No such device' >&2\nexit 1");
    let result = FfmpegInput::open_camera_with(CameraOptions::default(), &programs);
    assert!(matches!(result, Err(FfmpegInputError::CameraOpenError(_))));
  }

  #[test]
  fn other_schemes_are_rejected() {
    let url = Url::parse("image:///tmp/a.png").unwrap();
    assert!(matches!(
      FfmpegInput::from_url(&url),
      Err(FfmpegInputError::SchemeMismatch(_))
    ));
  }
}
