// 该文件是 Xunying （寻影） 项目的一部分。
// src/output/gstreamer_display.rs - GStreamer 窗口显示
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

//! # GStreamer 显示输出
//!
//! 通过 `appsrc ! videoconvert ! <视频接收端>` 把标注后的帧显示在窗口中。
//!
//! ## URL Scheme
//!
//! `gst://display`，可用 `sink` 参数替换默认的 `autovideosink`：
//!
//! ```no_run
//! use xunying::{FromUrl, output::GStreamerDisplayOutput};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("gst://display?sink=ximagesink")?;
//! let output = GStreamerDisplayOutput::from_url(&url)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Mutex;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{CanonicalFrame, FRAME_HEIGHT, FRAME_WIDTH},
  output::Render,
};

const DEFAULT_VIDEO_SINK: &str = "autovideosink";
const DISPLAY_FPS: i32 = 30;

#[derive(Error, Debug)]
pub enum GStreamerDisplayOutputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Buffer creation error")]
  BufferCreationError,
}

/// GStreamer 窗口显示
pub struct GStreamerDisplayOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  frame_count: Mutex<u64>,
}

impl FromUrlWithScheme for GStreamerDisplayOutput {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerDisplayOutput {
  type Error = GStreamerDisplayOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerDisplayOutputError::SchemeMismatch);
    }

    gst::init()?;

    let sink = url
      .query_pairs()
      .find(|(k, _)| k == "sink")
      .map(|(_, v)| v.into_owned())
      .unwrap_or_else(|| DEFAULT_VIDEO_SINK.to_string());

    let description = format!(
      "appsrc name=src is-live=true ! videoconvert ! {} sync=false",
      sink
    );
    info!("Creating display pipeline: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerDisplayOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerDisplayOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerDisplayOutputError::AppSrcConversionFailed)?;

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", FRAME_WIDTH as i32)
      .field("height", FRAME_HEIGHT as i32)
      .field("framerate", gst::Fraction::new(DISPLAY_FPS, 1))
      .build();
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;
    info!("显示窗口已打开: {}x{}", FRAME_WIDTH, FRAME_HEIGHT);

    Ok(GStreamerDisplayOutput {
      pipeline,
      appsrc,
      frame_count: Mutex::new(0),
    })
  }
}

impl Drop for GStreamerDisplayOutput {
  fn drop(&mut self) {
    let _ = self.appsrc.end_of_stream();
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer display pipeline: {}", e);
    }
  }
}

impl GStreamerDisplayOutput {
  fn push_frame(&self, data: &[u8]) -> Result<(), GStreamerDisplayOutputError> {
    let mut buffer = gst::Buffer::from_mut_slice(data.to_vec());

    let index = {
      let mut count = self
        .frame_count
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
      let index = *count;
      *count += 1;
      index
    };

    let duration = 1_000_000_000 / DISPLAY_FPS as u64;
    let buffer_ref = buffer
      .get_mut()
      .ok_or(GStreamerDisplayOutputError::BufferCreationError)?;
    buffer_ref.set_pts(gst::ClockTime::from_nseconds(index * duration));
    buffer_ref.set_duration(gst::ClockTime::from_nseconds(duration));

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerDisplayOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;
    Ok(())
  }
}

impl Render<CanonicalFrame> for GStreamerDisplayOutput {
  type Error = GStreamerDisplayOutputError;

  fn render(&self, _position: u64, frame: &CanonicalFrame) -> Result<(), Self::Error> {
    self.push_frame(frame.as_nhwc())
  }
}
