// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/job.rs - 图片、视频与直播任务入口
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

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::{
  cascade::Cascade,
  input::{FfmpegInput, FrameSource, ImageFileInput, InputError, InputWrapper},
  output::{MjpegOutput, OutputError, OutputWrapper, SaveImageFileOutput, SaveVideoFileOutput},
  report::JobReport,
  task::{ContinuousTask, OneShotTask, Task, TaskError},
};

pub const OUTPUT_IMAGE: &str = "output.png";
pub const OUTPUT_VIDEO: &str = "output.mp4";
pub const OUTPUT_REPORT: &str = "output.json";

/// 固定的输出文件，每次任务都会覆盖
#[derive(Debug, Clone)]
pub struct JobOutputs {
  pub image: PathBuf,
  pub video: PathBuf,
  pub report: PathBuf,
}

impl JobOutputs {
  pub fn in_dir(dir: impl AsRef<Path>) -> Self {
    let dir = dir.as_ref();
    Self {
      image: dir.join(OUTPUT_IMAGE),
      video: dir.join(OUTPUT_VIDEO),
      report: dir.join(OUTPUT_REPORT),
    }
  }
}

/// 逐帧任务的可调参数
#[derive(Debug, Clone)]
pub struct StreamSettings {
  pub fps: u32,
  pub max_consecutive_errors: usize,
}

/// 处理一张上传的图片，结果写入 `output.png` 与 `output.json`
pub fn run_image_job(
  cascade: &Cascade<'_>,
  path: &Path,
  outputs: &JobOutputs,
) -> Result<JobReport, TaskError> {
  let input = ImageFileInput::open(path).map_err(InputError::from)?;
  let output = SaveImageFileOutput::new(&outputs.image);

  let report = OneShotTask::new(path.display().to_string()).run_task(
    InputWrapper::ImageFile(input),
    cascade,
    OutputWrapper::SaveImageFileOutput(output),
  )?;
  report.save(&outputs.report)?;
  Ok(report)
}

/// 处理一段上传的视频，结果写入 `output.mp4` 与 `output.json`
pub fn run_video_job(
  cascade: &Cascade<'_>,
  path: &Path,
  outputs: &JobOutputs,
  settings: &StreamSettings,
) -> Result<JobReport, TaskError> {
  let input = FfmpegInput::open_video(path).map_err(InputError::from)?;
  let output = SaveVideoFileOutput::new(&outputs.video, settings.fps).map_err(OutputError::from)?;

  let report = ContinuousTask::new(path.display().to_string())
    .with_max_consecutive_errors(settings.max_consecutive_errors)
    .require_frames(true)
    .run_task(
      InputWrapper::Ffmpeg(input),
      cascade,
      OutputWrapper::SaveVideoFileOutput(output),
    )?;
  report.save(&outputs.report)?;
  Ok(report)
}

/// 摄像头直播，直到客户端断开、`stop` 被置位或摄像头失败
pub fn run_live_stream<I: FrameSource>(
  cascade: &Cascade<'_>,
  input: I,
  output: MjpegOutput,
  settings: &StreamSettings,
  stop: Arc<AtomicBool>,
) -> Result<JobReport, TaskError> {
  ContinuousTask::new("camera")
    .with_max_consecutive_errors(settings.max_consecutive_errors)
    .with_stop_flag(stop)
    .run_task(input, cascade, output)
}

/// 命令行任务：图片到图片为单帧任务，其余为逐帧任务
pub fn run_url_job(
  cascade: &Cascade<'_>,
  source: &str,
  input: InputWrapper,
  output: OutputWrapper,
  frame_number: Option<usize>,
  stop: Arc<AtomicBool>,
) -> Result<JobReport, TaskError> {
  if input.is_image() && !output.is_video() {
    return OneShotTask::new(source).run_task(input, cascade, output);
  }

  let require_frames = output.is_video();
  ContinuousTask::new(source)
    .with_frame_number(frame_number)
    .with_stop_flag(stop)
    .require_frames(require_frames)
    .run_task(input, cascade, output)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::{DetectResult, DetectorService, Model, ModelError},
    output::draw::Draw,
  };
  use image::{Rgb, RgbImage};

  struct Empty;

  impl Model for Empty {
    type Input = RgbImage;
    type Output = DetectResult;
    type Error = ModelError;

    fn infer(&self, _input: &RgbImage) -> Result<DetectResult, ModelError> {
      Ok(DetectResult::default())
    }
  }

  #[test]
  fn image_job_writes_fixed_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let upload = dir.path().join("upload.jpg");
    RgbImage::from_pixel(12, 10, Rgb([40, 80, 120]))
      .save(&upload)
      .unwrap();

    let service = DetectorService::new(Box::new(Empty), Box::new(Empty));
    let draw = Draw::default();
    let cascade = Cascade::new(&service, &draw);
    let outputs = JobOutputs::in_dir(dir.path());

    let report = run_image_job(&cascade, &upload, &outputs).unwrap();
    assert_eq!(report.frames_processed, 1);
    assert!(outputs.image.exists());
    assert!(outputs.report.exists());
    assert_eq!(image::open(&outputs.image).unwrap().width(), 12);
  }

  #[test]
  fn unreadable_image_is_a_structured_failure() {
    let dir = tempfile::tempdir().unwrap();
    let upload = dir.path().join("upload.png");
    std::fs::write(&upload, b"garbage").unwrap();

    let service = DetectorService::new(Box::new(Empty), Box::new(Empty));
    let draw = Draw::default();
    let cascade = Cascade::new(&service, &draw);
    let outputs = JobOutputs::in_dir(dir.path());

    let result = run_image_job(&cascade, &upload, &outputs);
    assert!(matches!(result, Err(TaskError::InputError(_))));
    assert!(!outputs.image.exists());
  }

  #[test]
  fn live_stream_stops_when_flag_is_set() {
    use crate::frame::Frame;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    let service = DetectorService::new(Box::new(Empty), Box::new(Empty));
    let draw = Draw::default();
    let settings = StreamSettings {
      fps: 10,
      max_consecutive_errors: 3,
    };
    let stop = Arc::new(AtomicBool::new(false));
    let (tx, mut rx) = mpsc::channel(2);

    let flag = stop.clone();
    let report = std::thread::scope(|scope| {
      let live = scope.spawn(|| {
        let cascade = Cascade::new(&service, &draw);
        let mut index = 0;
        let camera = std::iter::repeat_with(move || {
          index += 1;
          Ok::<_, InputError>(Frame::new(RgbImage::new(8, 8), index - 1))
        });
        run_live_stream(&cascade, camera, MjpegOutput::new(tx, 80), &settings, flag)
      });

      for _ in 0..3 {
        assert!(rx.blocking_recv().is_some());
      }
      stop.store(true, Ordering::SeqCst);
      // 发送端释放后流结束，接收端仍然存活
      while rx.blocking_recv().is_some() {}
      live.join().unwrap()
    });

    let report = report.unwrap();
    assert!(report.frames_processed >= 3);
    assert!(report.failures.is_empty());
  }
}
