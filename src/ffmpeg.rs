// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/ffmpeg.rs - ffmpeg 子进程公共部分
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

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::ChildStderr;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

/// 错误信息中保留的标准错误行数
pub const STDERR_TAIL_LINES: usize = 8;

/// ffmpeg 与 ffprobe 可执行文件，默认从 `PATH` 查找
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegPrograms {
  pub ffmpeg: PathBuf,
  pub ffprobe: PathBuf,
}

impl Default for FfmpegPrograms {
  fn default() -> Self {
    Self {
      ffmpeg: PathBuf::from("ffmpeg"),
      ffprobe: PathBuf::from("ffprobe"),
    }
  }
}

/// 后台线程持续读取子进程的标准错误，管道不会因写满而阻塞子进程
pub struct StderrDrain {
  lines: Receiver<String>,
  handle: Option<JoinHandle<()>>,
}

impl StderrDrain {
  pub fn spawn(stderr: ChildStderr) -> std::io::Result<Self> {
    let (tx, rx) = mpsc::channel();
    let handle = thread::Builder::new()
      .name("ffmpeg-stderr".to_string())
      .spawn(move || {
        for line in BufReader::new(stderr).split(b'\n') {
          let Ok(line) = line else { break };
          let line = String::from_utf8_lossy(&line).trim().to_string();
          if line.is_empty() {
            continue;
          }
          debug!("ffmpeg: {}", line);
          // 接收端已释放时继续读，直到管道关闭
          let _ = tx.send(line);
        }
      })?;

    Ok(Self {
      lines: rx,
      handle: Some(handle),
    })
  }

  /// 取出目前已经到达的行，不阻塞
  pub fn try_lines(&self) -> Vec<String> {
    self.lines.try_iter().collect()
  }

  /// 等待标准错误关闭并取出剩余的行，须在子进程退出后调用
  pub fn finish(&mut self) -> Vec<String> {
    if let Some(handle) = self.handle.take()
      && handle.join().is_err()
    {
      warn!("ffmpeg 标准错误读取线程异常退出");
    }
    self.try_lines()
  }
}

/// 最后几行标准错误，以 `; ` 连接
pub fn tail(lines: &[String]) -> String {
  let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
  lines[start..].join("; ")
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::process::{Command, Stdio};

  #[test]
  fn tail_keeps_the_last_lines() {
    let lines: Vec<String> = (0..12).map(|i| format!("line {}", i)).collect();
    let text = tail(&lines);
    assert!(text.starts_with("line 4; "));
    assert!(text.ends_with("line 11"));
    assert_eq!(tail(&[]), "");
  }

  #[cfg(unix)]
  #[test]
  fn drain_collects_every_line() {
    let mut child = Command::new("sh")
      .args(["-c", "echo first >&2; printf '\\n' >&2; echo second >&2"])
      .stderr(Stdio::piped())
      .spawn()
      .unwrap();
    let mut drain = StderrDrain::spawn(child.stderr.take().unwrap()).unwrap();
    child.wait().unwrap();
    assert_eq!(drain.finish(), vec!["first", "second"]);
  }
}
