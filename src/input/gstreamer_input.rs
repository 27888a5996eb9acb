// 该文件是 Xunying （寻影） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 基于 GStreamer 的视频文件与摄像头输入。解码后的画面在管道内
//! 统一转换为 RGB 并缩放到标准帧尺寸，下游无需处理可变几何。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## 基本用法
//!
//! ```no_run
//! use xunying::input::GStreamerInputPipelineBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let input = GStreamerInputPipelineBuilder::new()
//!     .file("video.mp4")
//!     .build()?;
//!
//! for frame in input {
//!     println!("处理帧: {}x{}", frame.width(), frame.height());
//! }
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  frame::{CanonicalFrame, FRAME_HEIGHT, FRAME_WIDTH},
  input::{FrameSource, InputError},
};

/// 打开管道时等待状态切换的最长时间（秒）
const STATE_CHANGE_TIMEOUT_SECS: u64 = 5;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// 未指定输入
  #[error("No source configured")]
  NoSource,
  /// 文件不存在
  #[error("File not found: {0}")]
  FileNotFound(PathBuf),
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

impl From<GStreamerInputError> for InputError {
  fn from(err: GStreamerInputError) -> Self {
    match err {
      GStreamerInputError::FileNotFound(path) => InputError::NotFound {
        path,
        reason: "文件不存在".to_string(),
      },
      other => InputError::DeviceUnavailable(other.to_string()),
    }
  }
}

enum GStreamerInputBuilderItem {
  FileSource(PathBuf),
  CameraSource(String),
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path.display())
      }
      GStreamerInputBuilderItem::CameraSource(device) => {
        format!("v4l2src device={}", device)
      }
    }
  }

  fn is_live(&self) -> bool {
    matches!(self, GStreamerInputBuilderItem::CameraSource(_))
  }
}

/// GStreamer 输入管道构建器
///
/// 文件输入按顺序交付每一帧；摄像头输入在下游处理不过来时丢弃旧帧。
#[derive(Default)]
pub struct GStreamerInputPipelineBuilder {
  source: Option<GStreamerInputBuilderItem>,
}

impl GStreamerInputPipelineBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn file(mut self, path: impl AsRef<Path>) -> Self {
    self.source = Some(GStreamerInputBuilderItem::FileSource(
      path.as_ref().to_path_buf(),
    ));
    self
  }

  pub fn camera(mut self, device: &str) -> Self {
    self.source = Some(GStreamerInputBuilderItem::CameraSource(device.to_string()));
    self
  }

  fn describe(source: &GStreamerInputBuilderItem) -> String {
    let drop = if source.is_live() { "true" } else { "false" };
    format!(
      "{} ! videoconvert ! videoscale ! video/x-raw,format=RGB,width={},height={},pixel-aspect-ratio=1/1 ! appsink name=sink sync=false max-buffers=2 drop={}",
      source.to_pipeline(),
      FRAME_WIDTH,
      FRAME_HEIGHT,
      drop
    )
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    let source = self.source.ok_or(GStreamerInputError::NoSource)?;
    if let GStreamerInputBuilderItem::FileSource(path) = &source
      && !path.exists()
    {
      error!("视频文件不存在: {}", path.display());
      return Err(GStreamerInputError::FileNotFound(path.clone()));
    }

    gst::init()?;

    let description = Self::describe(&source);
    info!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    let input = GStreamerInput {
      pipeline,
      appsink,
      failure: None,
    };
    input.pipeline.set_state(gst::State::Playing)?;

    // 等待预滚完成，设备打不开或文件无法解码会在这里暴露
    let (result, _, _) = input
      .pipeline
      .state(gst::ClockTime::from_seconds(STATE_CHANGE_TIMEOUT_SECS));
    result?;

    Ok(input)
  }
}

/// GStreamer 视频输入
///
/// 管理 GStreamer 管道和 appsink，按顺序迭代标准尺寸帧。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  failure: Option<GStreamerInputError>,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerInput {
  fn pull_sample(&mut self) -> Option<gst::Sample> {
    match self.appsink.pull_sample() {
      Ok(sample) => Some(sample),
      Err(e) => {
        if self.appsink.is_eos() {
          info!("输入流结束");
        } else {
          let reason = self.bus_error().unwrap_or_else(|| e.to_string());
          error!("Failed to pull sample: {}", reason);
          self.failure = Some(GStreamerInputError::PipelineError(reason));
        }
        None
      }
    }
  }

  /// 取出管道总线上的错误消息
  fn bus_error(&self) -> Option<String> {
    let message = self.pipeline.bus()?.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
      gst::MessageView::Error(err) => Some(match err.debug() {
        Some(debug) => format!("{} ({})", err.error(), debug),
        None => err.error().to_string(),
      }),
      _ => None,
    }
  }
}

impl Iterator for GStreamerInput {
  type Item = CanonicalFrame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.failure.is_some() {
      return None;
    }
    let sample = self.pull_sample()?;
    match convert_sample(sample) {
      Ok(frame) => Some(frame),
      Err(e) => {
        error!("Failed to fetch sample: {}", e);
        self.failure = Some(e);
        None
      }
    }
  }
}

impl FrameSource for GStreamerInput {
  fn close(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }

  fn take_error(&mut self) -> Option<InputError> {
    self
      .failure
      .take()
      .map(|e| InputError::ReadFailed(e.to_string()))
  }
}

fn convert_sample(sample: gst::Sample) -> Result<CanonicalFrame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected_size = stride * (height.saturating_sub(1)) + width * 3;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(width * height * 3);
  match video_info.format() {
    gst_video::VideoFormat::Rgb => {
      for row in 0..height {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + width * 3]);
      }
    }
    gst_video::VideoFormat::Bgr => {
      for row in 0..height {
        let start = row * stride;
        for bgr in data[start..start + width * 3].chunks_exact(3) {
          pixels.extend_from_slice(&[bgr[2], bgr[1], bgr[0]]);
        }
      }
    }
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  }

  let image = image::RgbImage::from_raw(width as u32, height as u32, pixels).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: width * height * 3,
      actual: data.len(),
    },
  )?;
  Ok(CanonicalFrame::from_rgb_image(image))
}
