// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/config.rs - 命令行与环境变量配置
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

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use url::Url;

use crate::{output::DEFAULT_JPEG_QUALITY, task::DEFAULT_MAX_CONSECUTIVE_ERRORS};

/// Helmwatch 网页服务参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ServeArgs {
  /// 监听地址
  #[arg(long, env = "HELMWATCH_BIND", default_value = "127.0.0.1:5000")]
  pub bind: SocketAddr,

  /// 上传与输出文件目录
  #[arg(long, env = "HELMWATCH_UPLOADS", default_value = "static/uploads")]
  pub uploads: PathBuf,

  /// 主检测模型（车辆 + 头盔），例如 onnx:///models/helmet.onnx?labels=labels/primary.toml
  #[arg(long, env = "HELMWATCH_PRIMARY_MODEL", value_name = "MODEL")]
  pub primary_model: Url,

  /// 车牌检测模型，例如 onnx:///models/plate.onnx?labels=labels/plate.toml
  #[arg(long, env = "HELMWATCH_PLATE_MODEL", value_name = "MODEL")]
  pub plate_model: Url,

  /// 直播使用的摄像头
  #[arg(long, env = "HELMWATCH_CAMERA", default_value = "camera:///dev/video0")]
  pub camera: Url,

  /// 标签字体（TTF/OTF），缺省时尝试系统字体
  #[arg(long, env = "HELMWATCH_FONT", value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 输出视频帧率
  #[arg(long, env = "HELMWATCH_FPS", default_value_t = crate::output::DEFAULT_FPS)]
  pub fps: u32,

  /// 直播 JPEG 质量 (1 - 100)
  #[arg(long, env = "HELMWATCH_JPEG_QUALITY", default_value_t = DEFAULT_JPEG_QUALITY)]
  pub jpeg_quality: u8,

  /// 上传文件大小上限（MiB）
  #[arg(long, env = "HELMWATCH_MAX_UPLOAD_MB", default_value_t = 512)]
  pub max_upload_mb: usize,

  /// 连续失败多少帧后放弃视频或直播任务
  #[arg(long, env = "HELMWATCH_MAX_FRAME_ERRORS", default_value_t = DEFAULT_MAX_CONSECUTIVE_ERRORS)]
  pub max_frame_errors: usize,
}

impl ServeArgs {
  pub fn max_upload_bytes(&self) -> usize {
    self.max_upload_mb.saturating_mul(1024 * 1024)
  }
}

/// Helmwatch 命令行检测参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct DetectArgs {
  /// 主检测模型（车辆 + 头盔）
  #[arg(long, env = "HELMWATCH_PRIMARY_MODEL", value_name = "MODEL")]
  pub primary_model: Url,

  /// 车牌检测模型
  #[arg(long, env = "HELMWATCH_PLATE_MODEL", value_name = "MODEL")]
  pub plate_model: Url,

  /// 输入来源
  /// 支持格式:
  /// - 图片: image:///path/to/photo.jpg
  /// - 视频: video:///path/to/clip.mp4
  /// - 摄像头: camera:///dev/video0
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出
  /// 支持格式:
  /// - 图片: image:///path/to/output.png
  /// - 视频: video:///path/to/output.mp4?fps=10
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 最大处理帧数（仅对视频/摄像头有效，0 表示无限制）
  #[arg(long, default_value_t = 0, value_name = "COUNT")]
  pub frame_number: usize,

  /// 标签字体
  #[arg(long, env = "HELMWATCH_FONT", value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 任务报告（JSON）写入的文件，缺省时打印到标准输出
  #[arg(long, value_name = "FILE")]
  pub report: Option<PathBuf>,
}
