// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/web/pages.rs - 页面
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

use crate::{report::JobReport, web::upload::MediaKind};

pub fn escape_html(text: &str) -> String {
  let mut escaped = String::with_capacity(text.len());
  for c in text.chars() {
    match c {
      '&' => escaped.push_str("&amp;"),
      '<' => escaped.push_str("&lt;"),
      '>' => escaped.push_str("&gt;"),
      '"' => escaped.push_str("&quot;"),
      '\'' => escaped.push_str("&#39;"),
      c => escaped.push(c),
    }
  }
  escaped
}

fn layout(title: &str, body: &str) -> String {
  format!(
    r#"<!DOCTYPE html>
<html lang="zh">
<head>
<meta charset="utf-8">
<title>{title} - Helmwatch</title>
<style>
body {{ font-family: sans-serif; margin: 2em auto; max-width: 960px; }}
nav a {{ margin-right: 1em; }}
.error {{ color: #b00020; }}
.warning {{ color: #8a6d00; }}
img, video {{ max-width: 100%; }}
</style>
</head>
<body>
<nav><a href="/">首页</a><a href="/upload_files">上传</a><a href="/use_webcam">摄像头</a></nav>
<h1>{title}</h1>
{body}
</body>
</html>
"#,
    title = escape_html(title),
    body = body
  )
}

pub fn index() -> String {
  layout(
    "头盔与车牌检测",
    r#"<p>上传图片或视频，检测未佩戴头盔的骑行者并识别其车牌；也可以使用摄像头实时检测。</p>
<ul>
<li><a href="/upload_files">上传图片或视频</a></li>
<li><a href="/use_webcam">使用摄像头</a></li>
</ul>"#,
  )
}

pub fn webcam() -> String {
  layout(
    "摄像头实时检测",
    r#"<img src="/video_feed" alt="实时检测画面">"#,
  )
}

pub fn upload_form(error: Option<&str>) -> String {
  let error = error
    .map(|e| format!(r#"<p class="error">{}</p>"#, escape_html(e)))
    .unwrap_or_default();
  layout(
    "上传文件",
    &format!(
      r#"{error}
<form method="post" action="/upload_files" enctype="multipart/form-data">
<input type="file" name="file" accept=".png,.jpg,.jpeg,.gif,.mp4,.avi,.mov,.wmv">
<button type="submit">上传并检测</button>
</form>"#
    ),
  )
}

/// 检测结果页，`output_url` 指向 `/uploads/` 下的输出文件
pub fn upload_result(kind: MediaKind, filename: &str, output_url: &str, report: &JobReport) -> String {
  let media = match kind {
    MediaKind::Image => format!(r#"<img src="{}" alt="检测结果">"#, escape_html(output_url)),
    MediaKind::Video => format!(
      r#"<video src="{}" controls></video>"#,
      escape_html(output_url)
    ),
  };

  let plates = report
    .plates
    .iter()
    .map(|entry| {
      let rect = entry.plate.global;
      format!(
        "<li>第 {} 帧: ({}, {}) {}x{}, 置信度 {:.2}</li>",
        entry.frame, rect.x, rect.y, rect.width, rect.height, entry.plate.score
      )
    })
    .collect::<String>();

  let warnings = report
    .failures
    .iter()
    .map(|f| {
      format!(
        r#"<li class="warning">第 {} 帧 ({}): {}</li>"#,
        f.frame,
        escape_html(&f.stage),
        escape_html(&f.message)
      )
    })
    .collect::<String>();

  layout(
    "检测结果",
    &format!(
      r#"<p>文件: {filename}</p>
<p>{summary}</p>
{media}
<h2>车牌</h2>
<ul>{plates}</ul>
<h2>警告</h2>
<ul>{warnings}</ul>
<p><a href="/uploads/output.json">任务报告 (JSON)</a> | <a href="/upload_files">继续上传</a></p>"#,
      filename = escape_html(filename),
      summary = escape_html(&report.summary()),
    ),
  )
}

pub fn error_page(status: StatusCode, message: &str) -> String {
  layout(
    &format!("错误 {}", status.as_u16()),
    &format!(
      r#"<p class="error">{}</p>
<p><a href="/upload_files">返回上传</a></p>"#,
      escape_html(message)
    ),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn html_is_escaped() {
    assert_eq!(
      escape_html(r#"<script>alert("x & y")</script>"#),
      "&lt;script&gt;alert(&quot;x &amp; y&quot;)&lt;/script&gt;"
    );
  }

  #[test]
  fn form_shows_error_message() {
    let page = upload_form(Some("不支持的文件类型 <exe>"));
    assert!(page.contains("不支持的文件类型 &lt;exe&gt;"));
    assert!(page.contains(r#"name="file""#));
  }

  #[test]
  fn result_page_references_output() {
    let mut report = JobReport::new("clip.mp4");
    report.record_failure(2, "decode", "corrupt");
    let page = upload_result(MediaKind::Video, "clip.mp4", "/uploads/output.mp4?t=1", &report);
    assert!(page.contains(r#"<video src="/uploads/output.mp4?t=1""#));
    assert!(page.contains("第 2 帧 (decode): corrupt"));
  }
}
