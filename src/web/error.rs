// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/web/error.rs - 网页错误
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

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::{task::TaskError, web::pages};

pub type WebResult<T> = Result<T, WebError>;

#[derive(Error, Debug)]
pub enum WebError {
  /// 表单错误，重新显示上传表单
  #[error("{0}")]
  BadRequest(String),
  #[error("无法处理文件: {0}")]
  Unprocessable(String),
  #[error("摄像头不可用: {0}")]
  CameraUnavailable(String),
  #[error("页面不存在: {0}")]
  NotFound(String),
  #[error("内部错误: {0}")]
  Internal(String),
}

impl WebError {
  pub fn bad_request(msg: impl Into<String>) -> Self {
    Self::BadRequest(msg.into())
  }

  pub fn internal(msg: impl Into<String>) -> Self {
    Self::Internal(msg.into())
  }

  pub fn status_code(&self) -> StatusCode {
    match self {
      WebError::BadRequest(_) => StatusCode::BAD_REQUEST,
      WebError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
      WebError::CameraUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
      WebError::NotFound(_) => StatusCode::NOT_FOUND,
      WebError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl From<TaskError> for WebError {
  fn from(err: TaskError) -> Self {
    match err {
      TaskError::NoInput
      | TaskError::InputError(_)
      | TaskError::NoFramesWritten
      | TaskError::CascadeError(_)
      | TaskError::TooManyErrors(_) => WebError::Unprocessable(err.to_string()),
      TaskError::OutputError(_) | TaskError::IoError(_) => WebError::Internal(err.to_string()),
    }
  }
}

impl From<tokio::task::JoinError> for WebError {
  fn from(err: tokio::task::JoinError) -> Self {
    WebError::Internal(format!("任务异常退出: {}", err))
  }
}

impl IntoResponse for WebError {
  fn into_response(self) -> Response {
    let status = self.status_code();
    if status.is_server_error() {
      error!("{}", self);
    }

    let body = match &self {
      WebError::BadRequest(message) => pages::upload_form(Some(message)),
      other => pages::error_page(status, &other.to_string()),
    };
    (status, Html(body)).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::InputError;

  #[test]
  fn task_errors_map_to_status() {
    let err: WebError = TaskError::InputError(InputError::SchemeMismatch("x".into())).into();
    assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

    let err: WebError = TaskError::IoError(std::io::Error::other("disk")).into();
    assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
  }

  #[test]
  fn bad_request_renders_the_form() {
    let response = WebError::bad_request("没有选择文件").into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  }
}
