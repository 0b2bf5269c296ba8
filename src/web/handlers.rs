// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/web/handlers.rs - 路由处理
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

use std::convert::Infallible;

use axum::{
  body::Body,
  extract::{Multipart, State},
  http::{Uri, header},
  response::{Html, IntoResponse, Response},
};
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tracing::{info, warn};

use crate::{
  FromUrl,
  cascade::Cascade,
  input::InputWrapper,
  job::{OUTPUT_IMAGE, OUTPUT_VIDEO, run_image_job, run_live_stream, run_video_job},
  output::{MJPEG_CONTENT_TYPE, MjpegOutput},
  web::{
    error::{WebError, WebResult},
    pages,
    state::AppState,
    upload::{ALLOWED_EXTENSIONS, MediaKind, media_kind, sanitize_filename},
  },
};

/// 直播通道容量，客户端跟不上时推理线程阻塞等待
const LIVE_CHANNEL_CAPACITY: usize = 2;

pub async fn index() -> Html<String> {
  Html(pages::index())
}

pub async fn use_webcam() -> Html<String> {
  Html(pages::webcam())
}

pub async fn upload_form() -> Html<String> {
  Html(pages::upload_form(None))
}

pub async fn not_found(uri: Uri) -> WebError {
  WebError::NotFound(uri.path().to_string())
}

struct Upload {
  filename: String,
  data: axum::body::Bytes,
}

async fn read_upload(mut multipart: Multipart) -> WebResult<Upload> {
  while let Some(field) = multipart
    .next_field()
    .await
    .map_err(|e| WebError::bad_request(format!("表单解析失败: {}", e)))?
  {
    if field.name() != Some("file") {
      continue;
    }
    let filename = field.file_name().unwrap_or_default().to_string();
    let data = field
      .bytes()
      .await
      .map_err(|e| WebError::bad_request(format!("读取上传文件失败: {}", e)))?;
    return Ok(Upload { filename, data });
  }
  Err(WebError::bad_request("没有选择文件"))
}

pub async fn upload_files(
  State(state): State<AppState>,
  multipart: Multipart,
) -> WebResult<Html<String>> {
  let upload = read_upload(multipart).await?;
  if upload.filename.is_empty() || upload.data.is_empty() {
    return Err(WebError::bad_request("没有选择文件"));
  }

  let filename = sanitize_filename(&upload.filename)
    .ok_or_else(|| WebError::bad_request(format!("文件名无效: {}", upload.filename)))?;
  let kind = media_kind(&filename).ok_or_else(|| {
    WebError::bad_request(format!(
      "不支持的文件类型: {}，允许的类型: {}",
      filename,
      ALLOWED_EXTENSIONS.join(", ")
    ))
  })?;

  let settings = state.settings.clone();
  tokio::fs::create_dir_all(&settings.uploads)
    .await
    .map_err(|e| WebError::internal(format!("创建上传目录失败: {}", e)))?;
  let path = settings.uploads.join(&filename);

  // 输出文件名固定，同一时间只运行一个上传任务；锁随任务移入阻塞线程，
  // 客户端断开后任务仍持有锁直到写完
  let guard = state.job_lock.clone().lock_owned().await;

  tokio::fs::write(&path, &upload.data)
    .await
    .map_err(|e| WebError::internal(format!("保存上传文件失败: {}", e)))?;
  info!("收到上传文件: {} ({} 字节, {:?})", path.display(), upload.data.len(), kind);

  let job_state = state.clone();
  let job_path = path.clone();
  let report = tokio::task::spawn_blocking(move || {
    let _guard = guard;
    let cascade = Cascade::new(&job_state.detectors, &job_state.draw);
    let outputs = job_state.settings.outputs();
    match kind {
      MediaKind::Image => run_image_job(&cascade, &job_path, &outputs),
      MediaKind::Video => run_video_job(
        &cascade,
        &job_path,
        &outputs,
        &job_state.settings.stream_settings(),
      ),
    }
  })
  .await??;

  let output = match kind {
    MediaKind::Image => OUTPUT_IMAGE,
    MediaKind::Video => OUTPUT_VIDEO,
  };
  let output_url = format!(
    "/uploads/{}?t={}",
    output,
    chrono::Utc::now().timestamp_millis()
  );
  info!("任务完成: {}", report.summary());
  Ok(Html(pages::upload_result(kind, &filename, &output_url, &report)))
}

pub async fn video_feed(State(state): State<AppState>) -> WebResult<Response> {
  let camera = state.settings.camera.clone();
  let input = tokio::task::spawn_blocking(move || InputWrapper::from_url(&camera))
    .await?
    .map_err(|e| WebError::CameraUnavailable(e.to_string()))?;
  info!("摄像头已打开: {}", state.settings.camera);

  let (tx, rx) = mpsc::channel::<Vec<u8>>(LIVE_CHANNEL_CAPACITY);
  let output = MjpegOutput::new(tx, state.settings.jpeg_quality);

  let job_state = state.clone();
  tokio::task::spawn_blocking(move || {
    let cascade = Cascade::new(&job_state.detectors, &job_state.draw);
    let settings = job_state.settings.stream_settings();
    let stop = job_state.shutdown.clone();
    match run_live_stream(&cascade, input, output, &settings, stop) {
      Ok(report) => info!("直播结束: {}", report.summary()),
      Err(e) => warn!("直播异常结束: {}", e),
    }
  });

  let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
  Ok(
    (
      [
        (header::CONTENT_TYPE, MJPEG_CONTENT_TYPE),
        (header::CACHE_CONTROL, "no-cache"),
      ],
      Body::from_stream(stream),
    )
      .into_response(),
  )
}
