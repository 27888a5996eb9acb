// 该文件是 Xunying （寻影） 项目的一部分。
// src/task.rs - 运行循环
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

use std::{
  any::Any,
  fmt,
  panic::{self, AssertUnwindSafe},
  sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
  thread::{self, JoinHandle},
  time::Instant,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::CanonicalFrame,
  input::{FrameSource, InputError, OpenSource, SourceKind},
  model::{Detection, Model},
  output::Annotator,
};

/// 默认每 3 帧处理 1 帧
pub const DEFAULT_FRAME_SKIP: u32 = 3;

pub trait Task<I, M, O>: Sized {
  type Output;
  fn run_task(self, input: I, model: M, output: O) -> Self::Output;
}

/// 一次运行的配置，运行期间不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
  pub source: SourceKind,
  pub frame_skip: u32,
}

impl RunConfig {
  pub fn new(source: SourceKind) -> Self {
    Self {
      source,
      frame_skip: DEFAULT_FRAME_SKIP,
    }
  }

  pub fn with_frame_skip(mut self, frame_skip: u32) -> Self {
    self.frame_skip = frame_skip;
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.frame_skip == 0 {
      return Err(ConfigError::ZeroFrameSkip);
    }
    match &self.source {
      SourceKind::Webcam => Ok(()),
      SourceKind::VideoFile(path) if path.as_os_str().is_empty() => {
        Err(ConfigError::MissingPath("视频"))
      }
      SourceKind::ImageFile(path) if path.as_os_str().is_empty() => {
        Err(ConfigError::MissingPath("图片"))
      }
      _ => Ok(()),
    }
  }

  /// 单张图片不参与跳帧
  fn effective_frame_skip(&self) -> u32 {
    match self.source {
      SourceKind::ImageFile(_) => 1,
      _ => self.frame_skip,
    }
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
  #[error("未选择{0}文件")]
  MissingPath(&'static str),
  #[error("跳帧间隔必须不小于 1")]
  ZeroFrameSkip,
}

#[derive(Error, Debug)]
pub enum StartError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("已有任务在运行")]
  AlreadyRunning,
  #[error("打开输入源失败: {0}")]
  Source(#[from] InputError),
  #[error("无法创建工作线程: {0}")]
  Spawn(std::io::Error),
}

/// 运行结束的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
  /// 文件读完
  Completed,
  /// 用户停止
  UserRequested,
  /// 摄像头读不到帧
  DeviceError,
  /// 输入源打开失败，或文件读到一半无法解码
  SourceError(String),
  /// 推理或标注失败
  InferenceError(String),
}

impl fmt::Display for StopReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StopReason::Completed => write!(f, "处理完成"),
      StopReason::UserRequested => write!(f, "已停止"),
      StopReason::DeviceError => write!(f, "读取摄像头出错"),
      StopReason::SourceError(msg) => write!(f, "输入源出错: {}", msg),
      StopReason::InferenceError(msg) => write!(f, "推理出错: {}", msg),
    }
  }
}

/// 推送给界面的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
  Starting(SourceKind),
  Finished(StopReason),
}

impl fmt::Display for RunStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RunStatus::Starting(SourceKind::Webcam) => write!(f, "正在启动摄像头..."),
      RunStatus::Starting(source) => write!(f, "正在处理{}", source),
      RunStatus::Finished(reason) => write!(f, "{}", reason),
    }
  }
}

/// 界面回调，均在工作线程上调用（启动状态除外）
pub trait RunObserver: Send + Sync {
  fn on_status(&self, status: &RunStatus);
  /// 返回后工作线程才读取下一帧
  fn on_frame(&self, position: u64, frame: &CanonicalFrame);
  /// 终止状态之后调用，用于恢复界面控件
  fn on_finished(&self, _reason: &StopReason) {}
}

/// 运行循环与界面共享的状态
#[derive(Debug, Default)]
pub struct RunState {
  running: AtomicBool,
  frame_counter: AtomicU64,
}

impl RunState {
  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::SeqCst)
  }

  pub fn frame_counter(&self) -> u64 {
    self.frame_counter.load(Ordering::SeqCst)
  }

  fn begin(&self) {
    self.frame_counter.store(0, Ordering::SeqCst);
    self.running.store(true, Ordering::SeqCst);
  }

  fn next_position(&self) -> u64 {
    self.frame_counter.fetch_add(1, Ordering::SeqCst) + 1
  }

  /// 返回调用前是否在运行
  fn halt(&self) -> bool {
    self.running.swap(false, Ordering::SeqCst)
  }
}

fn lock_model<M>(model: &Mutex<M>) -> MutexGuard<'_, M> {
  model.lock().unwrap_or_else(|poisoned| {
    warn!("模型锁在上次运行中被污染，继续使用");
    poisoned.into_inner()
  })
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(msg) = payload.downcast_ref::<&str>() {
    format!("模型崩溃: {}", msg)
  } else if let Some(msg) = payload.downcast_ref::<String>() {
    format!("模型崩溃: {}", msg)
  } else {
    "模型崩溃".to_string()
  }
}

/// 按跳帧间隔处理输入源直到结束或被停止
pub struct FrameSkipTask {
  state: Arc<RunState>,
  annotator: Arc<Annotator>,
  frame_skip: u32,
  finite: bool,
}

impl FrameSkipTask {
  pub fn new(state: Arc<RunState>, annotator: Arc<Annotator>, config: &RunConfig) -> Self {
    Self {
      state,
      annotator,
      frame_skip: config.effective_frame_skip().max(1),
      finite: config.source.is_finite(),
    }
  }

  fn process<M>(&self, model: &Mutex<M>, frame: &mut CanonicalFrame) -> Result<usize, String>
  where
    M: Model<Input = CanonicalFrame, Output = Vec<Detection>>,
    M::Error: fmt::Display,
  {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
      let detections = lock_model(model)
        .infer(&*frame)
        .map_err(|e| e.to_string())?;
      self
        .annotator
        .annotate(frame, &detections)
        .map_err(|e| e.to_string())?;
      Ok(detections.len())
    }));
    outcome.unwrap_or_else(|payload| Err(panic_message(payload)))
  }
}

impl<M> Task<Box<dyn FrameSource>, Arc<Mutex<M>>, Arc<dyn RunObserver>> for FrameSkipTask
where
  M: Model<Input = CanonicalFrame, Output = Vec<Detection>>,
  M::Error: fmt::Display,
{
  type Output = StopReason;

  fn run_task(
    self,
    mut input: Box<dyn FrameSource>,
    model: Arc<Mutex<M>>,
    output: Arc<dyn RunObserver>,
  ) -> StopReason {
    info!("开始任务, 跳帧间隔 {}", self.frame_skip);

    let reason = loop {
      if !self.state.is_running() {
        info!("收到停止请求, 退出任务循环");
        break StopReason::UserRequested;
      }

      let Some(mut frame) = input.next() else {
        if self.finite
          && let Some(e) = input.take_error()
        {
          error!("读取输入源失败: {}", e);
          break StopReason::SourceError(e.to_string());
        }
        if self.finite {
          info!("输入源读取完毕");
          break StopReason::Completed;
        }
        error!("摄像头读取失败");
        break StopReason::DeviceError;
      };

      let position = self.state.next_position();
      if position % self.frame_skip as u64 != 0 {
        debug!("跳过第 {} 帧", position);
        continue;
      }

      let now = Instant::now();
      match self.process(&model, &mut frame) {
        Ok(count) => {
          info!(
            "第 {} 帧处理完成, {} 个实例, 耗时: {:.2?}",
            position,
            count,
            now.elapsed()
          );
          output.on_frame(position, &frame);
        }
        Err(msg) => {
          error!("第 {} 帧推理失败: {}", position, msg);
          break StopReason::InferenceError(msg);
        }
      }
    };

    input.close();
    self.state.halt();
    output.on_status(&RunStatus::Finished(reason.clone()));
    output.on_finished(&reason);
    info!("任务结束: {}", reason);
    reason
  }
}

/// 运行循环：空闲 → 运行 → 空闲
///
/// 同一时刻最多一个工作线程。`start` 只能在空闲时调用，`stop` 在空闲时无操作。
pub struct RunLoop<M> {
  opener: Arc<dyn OpenSource>,
  model: Arc<Mutex<M>>,
  annotator: Arc<Annotator>,
  observer: Arc<dyn RunObserver>,
  state: Arc<RunState>,
  worker: Option<JoinHandle<StopReason>>,
}

impl<M> RunLoop<M>
where
  M: Model<Input = CanonicalFrame, Output = Vec<Detection>> + Send + 'static,
  M::Error: fmt::Display,
{
  pub fn new(
    opener: Arc<dyn OpenSource>,
    model: M,
    annotator: Annotator,
    observer: Arc<dyn RunObserver>,
  ) -> Self {
    Self {
      opener,
      model: Arc::new(Mutex::new(model)),
      annotator: Arc::new(annotator),
      observer,
      state: Arc::new(RunState::default()),
      worker: None,
    }
  }

  pub fn state(&self) -> &Arc<RunState> {
    &self.state
  }

  pub fn is_running(&self) -> bool {
    self.state.is_running()
  }

  pub fn start(&mut self, config: &RunConfig) -> Result<(), StartError> {
    config.validate()?;

    if self.state.is_running() {
      warn!("已有任务在运行, 忽略启动请求");
      return Err(StartError::AlreadyRunning);
    }
    self.reap();

    let source = match self.opener.open(&config.source) {
      Ok(source) => source,
      Err(e) => {
        error!("打开输入源 {} 失败: {}", config.source, e);
        let reason = StopReason::SourceError(e.to_string());
        self.observer.on_status(&RunStatus::Finished(reason.clone()));
        self.observer.on_finished(&reason);
        return Err(StartError::Source(e));
      }
    };

    self.state.begin();
    self
      .observer
      .on_status(&RunStatus::Starting(config.source.clone()));

    let task = FrameSkipTask::new(self.state.clone(), self.annotator.clone(), config);
    let model = self.model.clone();
    let observer = self.observer.clone();
    let spawned = thread::Builder::new()
      .name("xunying-run".to_string())
      .spawn(move || task.run_task(source, model, observer));

    match spawned {
      Ok(handle) => {
        self.worker = Some(handle);
        Ok(())
      }
      Err(e) => {
        self.state.halt();
        error!("无法创建工作线程: {}", e);
        Err(StartError::Spawn(e))
      }
    }
  }

  /// 请求停止，返回是否确有任务被通知
  pub fn stop(&self) -> bool {
    let was_running = self.state.halt();
    if was_running {
      info!("请求停止任务");
    }
    was_running
  }

  /// 等待工作线程退出，返回结束原因；没有工作线程时返回 `None`
  pub fn wait(&mut self) -> Option<StopReason> {
    let handle = self.worker.take()?;
    match handle.join() {
      Ok(reason) => Some(reason),
      Err(payload) => {
        let msg = panic_message(payload);
        error!("工作线程异常退出: {}", msg);
        Some(StopReason::InferenceError(msg))
      }
    }
  }

  fn reap(&mut self) {
    if let Some(reason) = self.wait() {
      debug!("回收上一次运行的工作线程: {}", reason);
    }
  }
}

impl<M> Drop for RunLoop<M> {
  fn drop(&mut self) {
    self.state.halt();
    if let Some(handle) = self.worker.take() {
      let _ = handle.join();
    }
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use super::*;

  #[test]
  fn validation_rejects_zero_skip_and_missing_paths() {
    assert_eq!(
      RunConfig::new(SourceKind::Webcam)
        .with_frame_skip(0)
        .validate(),
      Err(ConfigError::ZeroFrameSkip)
    );
    assert_eq!(
      RunConfig::new(SourceKind::VideoFile(PathBuf::new())).validate(),
      Err(ConfigError::MissingPath("视频"))
    );
    assert_eq!(
      RunConfig::new(SourceKind::ImageFile(PathBuf::new())).validate(),
      Err(ConfigError::MissingPath("图片"))
    );
    assert!(RunConfig::new(SourceKind::Webcam).validate().is_ok());
  }

  #[test]
  fn images_ignore_frame_skip() {
    let image = RunConfig::new(SourceKind::ImageFile(PathBuf::from("a.png"))).with_frame_skip(5);
    assert_eq!(image.effective_frame_skip(), 1);
    let video = RunConfig::new(SourceKind::VideoFile(PathBuf::from("a.mp4"))).with_frame_skip(5);
    assert_eq!(video.effective_frame_skip(), 5);
  }

  #[test]
  fn status_texts() {
    assert_eq!(
      RunStatus::Starting(SourceKind::Webcam).to_string(),
      "正在启动摄像头..."
    );
    assert_eq!(
      RunStatus::Starting(SourceKind::VideoFile(PathBuf::from("/x/clip.mp4"))).to_string(),
      "正在处理视频 clip.mp4"
    );
    assert_eq!(
      RunStatus::Finished(StopReason::Completed).to_string(),
      "处理完成"
    );
  }

  #[test]
  fn state_counts_positions_from_one() {
    let state = RunState::default();
    state.begin();
    assert!(state.is_running());
    assert_eq!(state.next_position(), 1);
    assert_eq!(state.next_position(), 2);
    assert!(state.halt());
    assert!(!state.halt());
    state.begin();
    assert_eq!(state.frame_counter(), 0);
  }
}
