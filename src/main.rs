// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/main.rs - 网页服务入口
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use helmwatch::{
  config::ServeArgs,
  model::DetectorService,
  output::draw::Draw,
  web::{AppState, WebSettings, router},
};

#[tokio::main]
async fn main() -> Result<()> {
  helmwatch::init_tracing();

  let args = ServeArgs::parse();

  info!("主检测模型: {}", args.primary_model);
  info!("车牌检测模型: {}", args.plate_model);
  info!("上传目录: {}", args.uploads.display());
  info!("摄像头: {}", args.camera);

  // 模型加载失败直接退出
  let (primary, plate) = (args.primary_model.clone(), args.plate_model.clone());
  let detectors = tokio::task::spawn_blocking(move || DetectorService::load(&primary, &plate))
    .await?
    .context("加载检测模型失败")?;
  let draw = Draw::discover(args.font.as_deref());

  tokio::fs::create_dir_all(&args.uploads)
    .await
    .with_context(|| format!("创建上传目录失败: {}", args.uploads.display()))?;

  let state = AppState::new(detectors, draw, WebSettings::from(&args));
  let app = router(state.clone());

  let listener = tokio::net::TcpListener::bind(args.bind)
    .await
    .with_context(|| format!("无法监听 {}", args.bind))?;
  info!("服务已启动: http://{}", args.bind);

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal(state.clone()))
    .await?;

  info!("服务已停止");
  Ok(())
}

/// 等待 Ctrl+C，随后通知直播任务结束，让未完成的 MJPEG 响应可以关闭
async fn shutdown_signal(state: AppState) {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!("无法监听 Ctrl+C: {}", e);
    std::future::pending::<()>().await;
  }
  info!("收到退出信号");
  state.request_shutdown();
}
