// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/report.rs - 任务报告
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

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::cascade::{FrameReport, PlateRecord};

#[derive(Debug, Clone, Serialize)]
pub struct FrameFailure {
  pub frame: u64,
  pub stage: String,
  pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlateEntry {
  pub frame: u64,
  #[serde(flatten)]
  pub plate: PlateRecord,
}

/// 一次任务（一张图片、一段视频或一次直播）的汇总
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
  pub source: String,
  pub started_at: DateTime<Utc>,
  pub finished_at: Option<DateTime<Utc>>,
  pub frames_processed: u64,
  pub frames_skipped: u64,
  pub vehicles: usize,
  pub violations: usize,
  pub annotations: usize,
  pub primary_calls: usize,
  pub secondary_calls: usize,
  pub plates: Vec<PlateEntry>,
  pub failures: Vec<FrameFailure>,
}

impl JobReport {
  pub fn new(source: impl Into<String>) -> Self {
    Self {
      source: source.into(),
      started_at: Utc::now(),
      finished_at: None,
      frames_processed: 0,
      frames_skipped: 0,
      vehicles: 0,
      violations: 0,
      annotations: 0,
      primary_calls: 0,
      secondary_calls: 0,
      plates: Vec::new(),
      failures: Vec::new(),
    }
  }

  pub fn record_frame(&mut self, frame: u64, report: FrameReport) {
    self.frames_processed += 1;
    self.vehicles += report.vehicles;
    self.violations += report.violations;
    self.annotations += report.annotations.len();
    self.primary_calls += report.primary_calls;
    self.secondary_calls += report.secondary_calls;
    self
      .plates
      .extend(report.plates.into_iter().map(|plate| PlateEntry { frame, plate }));
  }

  /// 记录被跳过的帧
  pub fn record_failure(&mut self, frame: u64, stage: &str, message: impl Into<String>) {
    let message = message.into();
    warn!("跳过第 {} 帧 ({}): {}", frame, stage, message);
    self.frames_skipped += 1;
    self.failures.push(FrameFailure {
      frame,
      stage: stage.to_string(),
      message,
    });
  }

  pub fn finish(&mut self) {
    self.finished_at = Some(Utc::now());
    info!("{}", self.summary());
  }

  pub fn summary(&self) -> String {
    format!(
      "处理 {} 帧, 跳过 {} 帧, 车辆 {} 个, 未戴头盔 {} 次, 车牌 {} 个",
      self.frames_processed,
      self.frames_skipped,
      self.vehicles,
      self.violations,
      self.plates.len()
    )
  }

  pub fn to_json(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(self)
  }

  pub fn save(&self, path: impl AsRef<Path>) -> Result<(), std::io::Error> {
    let path = path.as_ref();
    let json = self.to_json().map_err(std::io::Error::other)?;
    std::fs::write(path, json)?;
    info!("保存任务报告: {}", path.display());
    Ok(())
  }
}
