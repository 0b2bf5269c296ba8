// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/web/state.rs - 网页服务共享状态
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

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use url::Url;

use crate::{
  config::ServeArgs,
  job::{JobOutputs, StreamSettings},
  model::DetectorService,
  output::draw::Draw,
};

#[derive(Debug, Clone)]
pub struct WebSettings {
  pub uploads: PathBuf,
  pub camera: Url,
  pub fps: u32,
  pub jpeg_quality: u8,
  pub max_upload_bytes: usize,
  pub max_frame_errors: usize,
}

impl From<&ServeArgs> for WebSettings {
  fn from(args: &ServeArgs) -> Self {
    Self {
      uploads: args.uploads.clone(),
      camera: args.camera.clone(),
      fps: args.fps,
      jpeg_quality: args.jpeg_quality,
      max_upload_bytes: args.max_upload_bytes(),
      max_frame_errors: args.max_frame_errors,
    }
  }
}

impl WebSettings {
  pub fn outputs(&self) -> JobOutputs {
    JobOutputs::in_dir(&self.uploads)
  }

  pub fn stream_settings(&self) -> StreamSettings {
    StreamSettings {
      fps: self.fps,
      max_consecutive_errors: self.max_frame_errors,
    }
  }
}

/// 共享状态：模型只读共享；输出文件名固定，上传任务通过 `job_lock` 串行执行；
/// `shutdown` 在服务退出时置位，直播任务据此结束
#[derive(Clone)]
pub struct AppState {
  pub detectors: Arc<DetectorService>,
  pub draw: Arc<Draw>,
  pub settings: Arc<WebSettings>,
  pub job_lock: Arc<Mutex<()>>,
  pub shutdown: Arc<AtomicBool>,
}

impl AppState {
  pub fn new(detectors: DetectorService, draw: Draw, settings: WebSettings) -> Self {
    Self {
      detectors: Arc::new(detectors),
      draw: Arc::new(draw),
      settings: Arc::new(settings),
      job_lock: Arc::new(Mutex::new(())),
      shutdown: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn request_shutdown(&self) {
    self.shutdown.store(true, Ordering::SeqCst);
  }
}
