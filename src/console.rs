// 该文件是 Xunying （寻影） 项目的一部分。
// src/console.rs - 交互式控制台
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

use std::{fmt, path::PathBuf, sync::mpsc::Sender};

use thiserror::Error;
use tracing::{error, warn};
use url::Url;
use xunying::{
  FromUrl,
  frame::CanonicalFrame,
  input::SourceKind,
  output::Render,
  task::{RunObserver, RunStatus, StopReason},
};

pub const HELP: &str = "\
命令:
  start camera          启动摄像头
  start video <路径>    处理视频文件 (mp4, avi, mov)
  start image <路径>    处理图片文件 (jpg, jpeg, png, bmp)
  start <路径|URL>      按扩展名或 URL 方案识别输入
  stop                  停止当前任务
  skip <N>              设置跳帧间隔 (下次启动生效)
  status                查看当前状态
  help                  显示帮助
  quit                  退出";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
  Start(SourceKind),
  Stop,
  Skip(u32),
  Status,
  Help,
  Quit,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
  #[error("未知命令: {0}")]
  Unknown(String),
  #[error("缺少参数: {0}")]
  MissingArgument(&'static str),
  #[error("无法识别的文件类型: {0}")]
  UnknownFileType(String),
  #[error("无效的输入 URL: {0}")]
  InvalidSource(String),
  #[error("跳帧间隔必须是正整数: {0}")]
  InvalidSkip(String),
}

/// 解析一行输入，空行返回 `None`
pub fn parse_command(line: &str) -> Result<Option<UiCommand>, CommandError> {
  let line = line.trim();
  if line.is_empty() {
    return Ok(None);
  }

  let (verb, rest) = match line.split_once(char::is_whitespace) {
    Some((verb, rest)) => (verb, rest.trim()),
    None => (line, ""),
  };

  let command = match verb.to_ascii_lowercase().as_str() {
    "start" => UiCommand::Start(parse_start(rest)?),
    "stop" => UiCommand::Stop,
    "skip" => {
      if rest.is_empty() {
        return Err(CommandError::MissingArgument("跳帧间隔"));
      }
      match rest.parse::<u32>() {
        Ok(n) if n >= 1 => UiCommand::Skip(n),
        _ => return Err(CommandError::InvalidSkip(rest.to_string())),
      }
    }
    "status" => UiCommand::Status,
    "help" | "?" => UiCommand::Help,
    "quit" | "exit" | "q" => UiCommand::Quit,
    other => return Err(CommandError::Unknown(other.to_string())),
  };
  Ok(Some(command))
}

fn parse_start(rest: &str) -> Result<SourceKind, CommandError> {
  let (mode, path) = match rest.split_once(char::is_whitespace) {
    Some((mode, path)) => (mode, path.trim()),
    None => (rest, ""),
  };

  match mode.to_ascii_lowercase().as_str() {
    "" => Err(CommandError::MissingArgument("输入源")),
    "camera" | "webcam" => Ok(SourceKind::Webcam),
    // 路径交给运行循环校验，空路径在那里报配置错误
    "video" => Ok(SourceKind::VideoFile(PathBuf::from(path))),
    "image" => Ok(SourceKind::ImageFile(PathBuf::from(path))),
    _ => parse_source(rest),
  }
}

/// 解析输入源：`camera://`、`video:///路径`、`image:///路径` 或按扩展名识别的文件路径
pub fn parse_source(source: &str) -> Result<SourceKind, CommandError> {
  if source.contains("://") {
    let url = Url::parse(source).map_err(|_| CommandError::InvalidSource(source.to_string()))?;
    return SourceKind::from_url(&url).map_err(|_| CommandError::InvalidSource(source.to_string()));
  }
  SourceKind::from_path(source).ok_or_else(|| CommandError::UnknownFileType(source.to_string()))
}

/// 开始、停止按钮的可用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
  pub start_enabled: bool,
  pub stop_enabled: bool,
}

impl Controls {
  pub fn idle() -> Self {
    Self {
      start_enabled: true,
      stop_enabled: false,
    }
  }

  pub fn running() -> Self {
    Self {
      start_enabled: false,
      stop_enabled: true,
    }
  }
}

/// 主事件循环处理的消息
pub enum Event {
  Command(UiCommand),
  Status(String),
  Finished(StopReason),
  Interrupt,
}

/// 运行循环的回调：状态转成消息交给主线程，帧直接交给显示端
///
/// `on_frame` 在显示完成后才返回，工作线程随后才读取下一帧。
pub struct ConsoleObserver<R> {
  tx: Sender<Event>,
  output: R,
}

impl<R> ConsoleObserver<R> {
  pub fn new(tx: Sender<Event>, output: R) -> Self {
    Self { tx, output }
  }

  fn send(&self, event: Event) {
    if self.tx.send(event).is_err() {
      warn!("主事件循环已退出, 丢弃消息");
    }
  }
}

impl<R> RunObserver for ConsoleObserver<R>
where
  R: Render<CanonicalFrame> + Send + Sync,
  R::Error: fmt::Display,
{
  fn on_status(&self, status: &RunStatus) {
    self.send(Event::Status(status.to_string()));
  }

  fn on_frame(&self, position: u64, frame: &CanonicalFrame) {
    if let Err(e) = self.output.render(position, frame) {
      error!("显示第 {} 帧失败: {}", position, e);
    }
  }

  fn on_finished(&self, reason: &StopReason) {
    self.send(Event::Finished(reason.clone()));
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::{Arc, Mutex, mpsc},
    thread,
    time::Duration,
  };

  use xunying::{
    input::{FrameSource, InputError, OpenSource},
    model::{Detection, Labels, Model},
    output::Annotator,
    task::{RunConfig, RunLoop},
  };

  use super::*;

  /// 记录显示位置的慢速显示端
  #[derive(Clone, Default)]
  struct SlowSink {
    shown: Arc<Mutex<Vec<u64>>>,
  }

  impl SlowSink {
    fn shown(&self) -> Vec<u64> {
      self.shown.lock().unwrap().clone()
    }
  }

  impl Render<CanonicalFrame> for SlowSink {
    type Error = String;

    fn render(&self, position: u64, _frame: &CanonicalFrame) -> Result<(), Self::Error> {
      thread::sleep(Duration::from_millis(2));
      self.shown.lock().unwrap().push(position);
      Ok(())
    }
  }

  struct CountdownSource(usize);

  impl Iterator for CountdownSource {
    type Item = CanonicalFrame;

    fn next(&mut self) -> Option<Self::Item> {
      if self.0 == 0 {
        return None;
      }
      self.0 -= 1;
      Some(CanonicalFrame::default())
    }
  }

  impl FrameSource for CountdownSource {
    fn close(&mut self) {}
  }

  struct CountdownOpener(usize);

  impl OpenSource for CountdownOpener {
    fn open(&self, _kind: &SourceKind) -> Result<Box<dyn FrameSource>, InputError> {
      Ok(Box::new(CountdownSource(self.0)))
    }
  }

  struct NothingFound;

  impl Model for NothingFound {
    type Input = CanonicalFrame;
    type Output = Vec<Detection>;
    type Error = String;

    fn infer(&mut self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
      Ok(Vec::new())
    }
  }

  #[test]
  fn parses_start_variants() {
    assert_eq!(
      parse_command("start camera").unwrap(),
      Some(UiCommand::Start(SourceKind::Webcam))
    );
    assert_eq!(
      parse_command("  START video /data/my clip.mp4 ").unwrap(),
      Some(UiCommand::Start(SourceKind::VideoFile(PathBuf::from(
        "/data/my clip.mp4"
      ))))
    );
    assert_eq!(
      parse_command("start /data/street.PNG").unwrap(),
      Some(UiCommand::Start(SourceKind::ImageFile(PathBuf::from(
        "/data/street.PNG"
      ))))
    );
    assert_eq!(
      parse_command("start image:///data/a.jpg").unwrap(),
      Some(UiCommand::Start(SourceKind::ImageFile(PathBuf::from(
        "/data/a.jpg"
      ))))
    );
  }

  #[test]
  fn video_without_path_is_left_for_validation() {
    assert_eq!(
      parse_command("start video").unwrap(),
      Some(UiCommand::Start(SourceKind::VideoFile(PathBuf::new())))
    );
  }

  #[test]
  fn rejects_bad_input() {
    assert_eq!(parse_command("   ").unwrap(), None);
    assert_eq!(
      parse_command("start").unwrap_err(),
      CommandError::MissingArgument("输入源")
    );
    assert_eq!(
      parse_command("start notes.txt").unwrap_err(),
      CommandError::UnknownFileType("notes.txt".to_string())
    );
    assert_eq!(
      parse_command("skip 0").unwrap_err(),
      CommandError::InvalidSkip("0".to_string())
    );
    assert_eq!(
      parse_command("dance").unwrap_err(),
      CommandError::Unknown("dance".to_string())
    );
  }

  #[test]
  fn parses_simple_commands() {
    assert_eq!(parse_command("skip 5").unwrap(), Some(UiCommand::Skip(5)));
    assert_eq!(parse_command("stop").unwrap(), Some(UiCommand::Stop));
    assert_eq!(parse_command("q").unwrap(), Some(UiCommand::Quit));
    assert_eq!(parse_command("status").unwrap(), Some(UiCommand::Status));
  }

  #[test]
  fn observer_forwards_status_and_renders_frames() {
    let (tx, rx) = mpsc::channel();
    let sink = SlowSink::default();
    let observer = ConsoleObserver::new(tx, sink.clone());
    observer.on_status(&RunStatus::Starting(SourceKind::Webcam));
    observer.on_frame(3, &CanonicalFrame::default());
    observer.on_finished(&StopReason::UserRequested);

    assert_eq!(sink.shown(), vec![3]);
    assert!(matches!(rx.recv().unwrap(), Event::Status(s) if s == "正在启动摄像头..."));
    assert!(matches!(
      rx.recv().unwrap(),
      Event::Finished(StopReason::UserRequested)
    ));
  }

  #[test]
  fn every_frame_is_shown_before_the_run_ends() {
    let (tx, rx) = mpsc::channel();
    let sink = SlowSink::default();
    let observer = Arc::new(ConsoleObserver::new(tx, sink.clone()));
    let annotator = Annotator::new(Labels::new(["person"]).unwrap()).unwrap();
    let mut run_loop = RunLoop::new(
      Arc::new(CountdownOpener(40)),
      NothingFound,
      annotator,
      observer,
    );

    let config = RunConfig::new(SourceKind::VideoFile(PathBuf::from("/data/clip.mp4")))
      .with_frame_skip(1);
    run_loop.start(&config).unwrap();
    assert_eq!(run_loop.wait(), Some(StopReason::Completed));

    // 运行结束时没有积压的帧
    assert_eq!(sink.shown(), (1..=40).collect::<Vec<u64>>());
    let finished = rx
      .try_iter()
      .filter(|e| matches!(e, Event::Finished(StopReason::Completed)))
      .count();
    assert_eq!(finished, 1);
  }
}
