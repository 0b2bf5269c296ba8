// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/web/upload.rs - 上传文件名检查
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

use crate::job::{OUTPUT_IMAGE, OUTPUT_REPORT, OUTPUT_VIDEO};

pub const ALLOWED_EXTENSIONS: [&str; 8] = ["png", "jpg", "jpeg", "gif", "mp4", "avi", "mov", "wmv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
  Image,
  Video,
}

/// 按扩展名（不区分大小写）判断文件类型，不在允许列表内返回 `None`
pub fn media_kind(filename: &str) -> Option<MediaKind> {
  let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
  match ext.as_str() {
    "png" | "jpg" | "jpeg" | "gif" => Some(MediaKind::Image),
    "mp4" | "avi" | "mov" | "wmv" => Some(MediaKind::Video),
    _ => None,
  }
}

/// 清理上传文件名
///
/// 路径分隔符视为空白，空白合并为 `_`，只保留 ASCII 字母数字与 `._-`，
/// 去掉首尾的 `.` 与 `_`。与输出文件同名时加前缀，避免被结果覆盖。
pub fn sanitize_filename(name: &str) -> Option<String> {
  let spaced = name.replace(['/', '\\'], " ");
  let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
  let kept: String = joined
    .chars()
    .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    .collect();
  let trimmed = kept.trim_matches(|c| c == '.' || c == '_');

  if trimmed.is_empty() {
    return None;
  }
  if [OUTPUT_IMAGE, OUTPUT_VIDEO, OUTPUT_REPORT].contains(&trimmed) {
    return Some(format!("upload_{}", trimmed));
  }
  Some(trimmed.to_string())
}
