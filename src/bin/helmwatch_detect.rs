// 该文件是 Helmwatch （头盔守望） 项目的一部分。
// src/bin/helmwatch_detect.rs - 命令行检测
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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use helmwatch::{
  FromUrl,
  cascade::Cascade,
  config::DetectArgs,
  input::InputWrapper,
  job::run_url_job,
  model::DetectorService,
  output::{OutputWrapper, draw::Draw},
};

fn main() -> Result<()> {
  helmwatch::init_tracing();

  let args = DetectArgs::parse();

  info!("主检测模型: {}", args.primary_model);
  info!("车牌检测模型: {}", args.plate_model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let detectors = DetectorService::load(&args.primary_model, &args.plate_model)
    .context("加载检测模型失败")?;
  let draw = Draw::discover(args.font.as_deref());
  let cascade = Cascade::new(&detectors, &draw);

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let stop = Arc::new(AtomicBool::new(false));
  let flag = stop.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    flag.store(true, Ordering::SeqCst);
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置 Ctrl-C 处理")?;

  let frame_number = (args.frame_number > 0).then_some(args.frame_number);
  let report = run_url_job(
    &cascade,
    args.input.as_str(),
    input,
    output,
    frame_number,
    stop,
  )?;
  info!("{}", report.summary());

  match &args.report {
    Some(path) => {
      report.save(path)?;
      info!("任务报告已保存: {}", path.display());
    }
    None => println!("{}", report.to_json()?),
  }

  Ok(())
}
