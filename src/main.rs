// 该文件是 Xunying （寻影） 项目的一部分。
// src/main.rs - 交互式标注程序入口
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

mod args;
mod console;

use std::{
  io::BufRead,
  sync::{Arc, mpsc},
  thread,
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use xunying::{
  FromUrl,
  input::{InputWrapper, SourceKind},
  model::{Labels, Yolov8Seg, Yolov8SegBuilder},
  output::{Annotator, OutputWrapper},
  task::{RunConfig, RunLoop, StartError},
};

use console::{Controls, ConsoleObserver, Event, HELP, UiCommand};

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();

  info!("模型文件路径: {}", args.model.display());
  info!("显示输出: {}", args.output);
  info!("摄像头设备: {}", args.camera);

  let mut builder = Yolov8SegBuilder::new(&args.model)
    .confidence(args.confidence)
    .iou(args.iou);
  if let Some(path) = &args.labels {
    builder = builder.labels(Labels::from_toml_file(path)?);
  }
  let model = builder.build().context("模型加载失败")?;

  let mut annotator = Annotator::new(model.labels().clone())?;
  if let Some(path) = &args.font {
    annotator = annotator.with_font_file(path)?;
  }

  let output = OutputWrapper::from_url(&args.output)?;

  let (tx, rx) = mpsc::channel();
  let observer = Arc::new(ConsoleObserver::new(tx.clone(), output));
  let opener = Arc::new(InputWrapper::default().with_camera_device(args.camera.clone()));
  let mut run_loop = RunLoop::new(opener, model, annotator, observer);

  {
    let tx = tx.clone();
    ctrlc::set_handler(move || {
      let _ = tx.send(Event::Interrupt);
    })
    .context("无法设置 Ctrl-C 处理")?;
  }

  {
    let tx = tx.clone();
    thread::Builder::new()
      .name("xunying-stdin".to_string())
      .spawn(move || {
        for line in std::io::stdin().lock().lines() {
          let Ok(line) = line else { break };
          match console::parse_command(&line) {
            Ok(Some(command)) => {
              if tx.send(Event::Command(command)).is_err() {
                return;
              }
            }
            Ok(None) => {}
            Err(e) => println!("{}", e),
          }
        }
        let _ = tx.send(Event::Command(UiCommand::Quit));
      })
      .context("无法创建输入线程")?;
  }

  if let Some(source) = &args.source {
    let kind = console::parse_source(source)?;
    tx.send(Event::Command(UiCommand::Start(kind)))?;
  } else {
    println!("{}", HELP);
  }
  drop(tx);

  let mut controls = Controls::idle();
  let mut frame_skip = args.frame_skip;

  for event in rx {
    match event {
      Event::Command(UiCommand::Start(kind)) => {
        if !controls.start_enabled {
          println!("任务正在运行, 请先 stop");
          continue;
        }
        controls = start_run(&mut run_loop, kind, frame_skip);
      }
      Event::Command(UiCommand::Stop) => {
        if !controls.stop_enabled || !run_loop.stop() {
          println!("没有正在运行的任务");
        }
      }
      Event::Command(UiCommand::Skip(n)) => {
        frame_skip = n;
        println!("跳帧间隔设为 {}, 下次启动生效", n);
      }
      Event::Command(UiCommand::Status) => {
        println!(
          "运行中: {}, 已读取帧数: {}, 跳帧间隔: {}",
          run_loop.is_running(),
          run_loop.state().frame_counter(),
          frame_skip
        );
      }
      Event::Command(UiCommand::Help) => println!("{}", HELP),
      Event::Command(UiCommand::Quit) | Event::Interrupt => {
        info!("收到退出请求");
        run_loop.stop();
        run_loop.wait();
        break;
      }
      Event::Status(text) => println!("[状态] {}", text),
      Event::Finished(reason) => {
        run_loop.wait();
        controls = Controls::idle();
        info!("任务结束: {}", reason);
        if args.once {
          break;
        }
      }
    }
  }

  info!("程序退出");
  Ok(())
}

fn start_run(run_loop: &mut RunLoop<Yolov8Seg>, kind: SourceKind, frame_skip: u32) -> Controls {
  let config = RunConfig::new(kind).with_frame_skip(frame_skip);
  match run_loop.start(&config) {
    Ok(()) => Controls::running(),
    // 终止状态已经通过回调发出
    Err(StartError::Source(_)) => Controls::idle(),
    Err(e) => {
      println!("{}", e);
      Controls::idle()
    }
  }
}
