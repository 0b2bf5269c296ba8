// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/web.rs - 网页服务
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

use axum::{
  Router,
  extract::DefaultBodyLimit,
  routing::get,
};
use tower_http::{services::ServeDir, trace::TraceLayer};

mod error;
mod handlers;
mod pages;
mod state;
mod upload;

pub use self::error::{WebError, WebResult};
pub use self::state::{AppState, WebSettings};
pub use self::upload::{ALLOWED_EXTENSIONS, MediaKind, media_kind, sanitize_filename};

/// 创建路由
///
/// | 路径              | 说明                         |
/// |-------------------|------------------------------|
/// | `/`               | 首页                         |
/// | `/use_webcam`     | 摄像头直播页面               |
/// | `/upload_files`   | 上传表单 (GET) 与上传 (POST) |
/// | `/video_feed`     | MJPEG 直播流                 |
/// | `/uploads/*`      | 输出文件                     |
pub fn router(state: AppState) -> Router {
  let uploads = ServeDir::new(&state.settings.uploads);
  let body_limit = state.settings.max_upload_bytes;

  Router::new()
    .route("/", get(handlers::index))
    .route("/use_webcam", get(handlers::use_webcam))
    .route(
      "/upload_files",
      get(handlers::upload_form).post(handlers::upload_files),
    )
    .route("/video_feed", get(handlers::video_feed))
    .nest_service("/uploads", uploads)
    .fallback(handlers::not_found)
    .layer(DefaultBodyLimit::max(body_limit))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}
