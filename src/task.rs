// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/task.rs - 任务执行
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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  cascade::{Cascade, CascadeError},
  input::{FrameSource, InputError},
  output::{FrameSink, OutputError},
  report::JobReport,
};

pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: usize = 30;

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("没有输入帧")]
  NoInput,
  #[error("输入错误: {0}")]
  InputError(#[from] InputError),
  #[error("检测错误: {0}")]
  CascadeError(#[from] CascadeError),
  #[error("输出错误: {0}")]
  OutputError(#[from] OutputError),
  #[error("连续 {0} 帧处理失败, 停止任务")]
  TooManyErrors(usize),
  #[error("没有成功处理任何帧")]
  NoFramesWritten,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 输入 → 级联检测 → 输出，每帧处理完才读取下一帧
pub trait Task<I, O>: Sized {
  type Error;
  fn run_task(self, input: I, cascade: &Cascade<'_>, output: O) -> Result<JobReport, Self::Error>;
}

/// 单帧任务：任何错误都使整个任务失败
pub struct OneShotTask {
  source: String,
}

impl OneShotTask {
  pub fn new(source: impl Into<String>) -> Self {
    Self {
      source: source.into(),
    }
  }
}

impl<I: FrameSource, O: FrameSink<Error = OutputError>> Task<I, O> for OneShotTask {
  type Error = TaskError;

  fn run_task(self, mut input: I, cascade: &Cascade<'_>, mut output: O) -> Result<JobReport, Self::Error> {
    info!("开始任务: {}", self.source);
    let mut report = JobReport::new(self.source);

    let mut frame = input.next().ok_or(TaskError::NoInput)??;
    let now = Instant::now();
    let result = cascade.process_frame(&mut frame.image)?;
    info!("检测完成，耗时: {:.2?}", now.elapsed());

    output.write_frame(&frame)?;
    output.finish()?;
    report.record_frame(frame.index, result);
    report.finish();
    Ok(report)
  }
}

/// 逐帧任务（视频与摄像头）
///
/// 单帧的解码或检测失败只跳过该帧并记入报告；输出端关闭时正常结束。
#[derive(Debug)]
pub struct ContinuousTask {
  source: String,
  frame_number: Option<usize>,
  stop: Option<Arc<AtomicBool>>,
  max_consecutive_errors: usize,
  require_frames: bool,
}

impl ContinuousTask {
  pub fn new(source: impl Into<String>) -> Self {
    Self {
      source: source.into(),
      frame_number: None,
      stop: None,
      max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
      require_frames: false,
    }
  }

  /// 处理指定帧数后退出
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number.filter(|n| *n > 0);
    self
  }

  pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
    self.stop = Some(stop);
    self
  }

  pub fn with_max_consecutive_errors(mut self, max: usize) -> Self {
    self.max_consecutive_errors = max.max(1);
    self
  }

  /// 一帧都没有写出时视为失败（视频文件）
  pub fn require_frames(mut self, require: bool) -> Self {
    self.require_frames = require;
    self
  }

  fn stopped(&self) -> bool {
    self
      .stop
      .as_ref()
      .map(|stop| stop.load(Ordering::SeqCst))
      .unwrap_or(false)
  }
}

impl<I: FrameSource, O: FrameSink<Error = OutputError>> Task<I, O> for ContinuousTask {
  type Error = TaskError;

  fn run_task(self, input: I, cascade: &Cascade<'_>, mut output: O) -> Result<JobReport, Self::Error> {
    info!("开始任务: {}", self.source);
    let mut report = JobReport::new(self.source.clone());
    let mut position: u64 = 0;
    let mut consecutive_errors = 0;
    let mut closed = false;

    for item in input {
      if self.stopped() {
        warn!("中断信号接收，退出任务循环");
        break;
      }

      let current = position;
      position += 1;

      match item {
        Err(e) => {
          report.record_failure(current, "decode", e.to_string());
          consecutive_errors += 1;
        }
        Ok(mut frame) => {
          let now = Instant::now();
          match cascade.process_frame(&mut frame.image) {
            Err(e) => {
              report.record_failure(frame.index, e.stage(), e.to_string());
              consecutive_errors += 1;
            }
            Ok(result) => match output.write_frame(&frame) {
              Ok(()) => {
                debug!("第 {} 帧完成，耗时: {:.2?}", frame.index, now.elapsed());
                report.record_frame(frame.index, result);
                consecutive_errors = 0;
              }
              Err(e) if e.is_closed() => {
                info!("输出端已关闭, 结束任务");
                closed = true;
                break;
              }
              Err(e) => {
                error!("写出第 {} 帧失败: {}", frame.index, e);
                return Err(e.into());
              }
            },
          }
        }
      }

      if consecutive_errors >= self.max_consecutive_errors {
        error!("连续 {} 帧处理失败", consecutive_errors);
        return Err(TaskError::TooManyErrors(consecutive_errors));
      }

      if self.frame_number.is_some_and(|n| position as usize >= n) {
        info!("达到指定帧数 {}, 退出任务循环", position);
        break;
      }
    }

    if !closed {
      output.finish()?;
    }

    if self.require_frames && report.frames_processed == 0 {
      return Err(TaskError::NoFramesWritten);
    }

    report.finish();
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    frame::Frame,
    model::{DetectResult, DetectorService, Model, ModelError},
    output::{MjpegOutputError, draw::Draw},
  };
  use image::RgbImage;

  struct Empty;

  impl Model for Empty {
    type Input = RgbImage;
    type Output = DetectResult;
    type Error = ModelError;

    fn infer(&self, _input: &RgbImage) -> Result<DetectResult, ModelError> {
      Ok(DetectResult::default())
    }
  }

  #[derive(Default)]
  struct Collect {
    frames: Vec<u64>,
    close_after: Option<usize>,
    finished: bool,
  }

  impl FrameSink for &mut Collect {
    type Error = OutputError;

    fn write_frame(&mut self, frame: &Frame) -> Result<(), OutputError> {
      if self.close_after.is_some_and(|n| self.frames.len() >= n) {
        return Err(MjpegOutputError::Closed.into());
      }
      self.frames.push(frame.index);
      Ok(())
    }

    fn finish(&mut self) -> Result<(), OutputError> {
      self.finished = true;
      Ok(())
    }
  }

  fn frames(n: u64) -> impl Iterator<Item = Result<Frame, InputError>> {
    (0..n).map(|i| Ok(Frame::new(RgbImage::new(8, 8), i)))
  }

  fn service() -> DetectorService {
    DetectorService::new(Box::new(Empty), Box::new(Empty))
  }

  #[test]
  fn one_shot_without_input_fails() {
    let service = service();
    let draw = Draw::default();
    let cascade = Cascade::new(&service, &draw);
    let mut sink = Collect::default();
    let result = OneShotTask::new("empty").run_task(frames(0), &cascade, &mut sink);
    assert!(matches!(result, Err(TaskError::NoInput)));
  }

  #[test]
  fn frame_limit_stops_the_loop() {
    let service = service();
    let draw = Draw::default();
    let cascade = Cascade::new(&service, &draw);
    let mut sink = Collect::default();
    let report = ContinuousTask::new("camera")
      .with_frame_number(Some(3))
      .run_task(frames(10), &cascade, &mut sink)
      .unwrap();
    assert_eq!(report.frames_processed, 3);
    assert_eq!(sink.frames, vec![0, 1, 2]);
    assert!(sink.finished);
  }

  #[test]
  fn closed_sink_ends_task_gracefully() {
    let service = service();
    let draw = Draw::default();
    let cascade = Cascade::new(&service, &draw);
    let mut sink = Collect {
      close_after: Some(2),
      ..Default::default()
    };
    let report = ContinuousTask::new("camera")
      .run_task(frames(10), &cascade, &mut sink)
      .unwrap();
    assert_eq!(report.frames_processed, 2);
    assert!(!sink.finished);
  }

  #[test]
  fn stop_flag_is_honoured() {
    let service = service();
    let draw = Draw::default();
    let cascade = Cascade::new(&service, &draw);
    let stop = Arc::new(AtomicBool::new(true));
    let mut sink = Collect::default();
    let report = ContinuousTask::new("camera")
      .with_stop_flag(stop)
      .run_task(frames(5), &cascade, &mut sink)
      .unwrap();
    assert_eq!(report.frames_processed, 0);
  }

  #[test]
  fn consecutive_failures_abort() {
    let service = service();
    let draw = Draw::default();
    let cascade = Cascade::new(&service, &draw);
    let broken = (0..10).map(|i| {
      Err(InputError::DecodeError {
        index: i,
        message: "corrupt".into(),
      })
    });
    let mut sink = Collect::default();
    let result = ContinuousTask::new("camera")
      .with_max_consecutive_errors(3)
      .run_task(broken, &cascade, &mut sink);
    assert!(matches!(result, Err(TaskError::TooManyErrors(3))));
  }

  #[test]
  fn empty_video_is_an_error_when_frames_are_required() {
    let service = service();
    let draw = Draw::default();
    let cascade = Cascade::new(&service, &draw);
    let mut sink = Collect::default();
    let result = ContinuousTask::new("clip.mp4")
      .require_frames(true)
      .run_task(frames(0), &cascade, &mut sink);
    assert!(matches!(result, Err(TaskError::NoFramesWritten)));
  }
}
