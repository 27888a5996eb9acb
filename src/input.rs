// 该文件是 Xunying （寻影） 项目的一部分。
// src/input.rs - 视频/图像输入
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
  fmt,
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, frame::CanonicalFrame};

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder};

/// 可选视频文件扩展名
pub const VIDEO_EXTENSIONS: [&str; 3] = ["mp4", "avi", "mov"];
/// 可选图片文件扩展名
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

const CAMERA_SCHEME: &str = "camera";
const VIDEO_SCHEME: &str = "video";
const IMAGE_SCHEME: &str = "image";

/// 输入源种类
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
  /// 摄像头，设备由打开器配置
  Webcam,
  /// 视频文件
  VideoFile(PathBuf),
  /// 单张图片
  ImageFile(PathBuf),
}

impl SourceKind {
  /// 按扩展名识别文件类型，无法识别时返回 `None`
  pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
    let path = path.as_ref();
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
      Some(SourceKind::VideoFile(path.to_path_buf()))
    } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
      Some(SourceKind::ImageFile(path.to_path_buf()))
    } else {
      None
    }
  }

  /// 文件路径；摄像头没有路径
  pub fn path(&self) -> Option<&Path> {
    match self {
      SourceKind::Webcam => None,
      SourceKind::VideoFile(path) | SourceKind::ImageFile(path) => Some(path),
    }
  }

  /// 有限长度的输入源（读完即正常结束）
  pub fn is_finite(&self) -> bool {
    match self {
      SourceKind::Webcam => false,
      SourceKind::VideoFile(_) | SourceKind::ImageFile(_) => true,
    }
  }

  fn file_name(&self) -> String {
    self
      .path()
      .and_then(Path::file_name)
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_default()
  }
}

impl fmt::Display for SourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SourceKind::Webcam => write!(f, "摄像头"),
      SourceKind::VideoFile(_) => write!(f, "视频 {}", self.file_name()),
      SourceKind::ImageFile(_) => write!(f, "图片 {}", self.file_name()),
    }
  }
}

impl FromUrl for SourceKind {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      CAMERA_SCHEME => Ok(SourceKind::Webcam),
      VIDEO_SCHEME => Ok(SourceKind::VideoFile(url_path(url))),
      IMAGE_SCHEME => Ok(SourceKind::ImageFile(url_path(url))),
      other => {
        error!("未知的输入方案: {}", other);
        Err(InputError::SchemeMismatch)
      }
    }
  }
}

/// URL 路径转换为本地路径（解码百分号转义）
pub(crate) fn url_path(url: &Url) -> PathBuf {
  match urlencoding::decode(url.path()) {
    Ok(path) => PathBuf::from(path.into_owned()),
    Err(_) => PathBuf::from(url.path()),
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("找不到输入: {path} ({reason})")]
  NotFound { path: PathBuf, reason: String },
  #[error("设备不可用: {0}")]
  DeviceUnavailable(String),
  #[error("未启用的输入类型: {0}")]
  Unsupported(&'static str),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("读取输入失败: {0}")]
  ReadFailed(String),
}

impl From<ImageFileInputError> for InputError {
  fn from(err: ImageFileInputError) -> Self {
    match err {
      ImageFileInputError::IoError { path, source } => InputError::NotFound {
        path,
        reason: source.to_string(),
      },
      ImageFileInputError::ImageLoadError { path, source } => InputError::NotFound {
        path,
        reason: source.to_string(),
      },
    }
  }
}

/// 帧输入源
///
/// 迭代结束（`None`）即输入结束；对摄像头而言设备读取失败也表现为结束。
/// 因读取或解码失败而结束时，`take_error` 返回失败原因。
/// `close` 由运行循环在退出时恰好调用一次。
pub trait FrameSource: Iterator<Item = CanonicalFrame> + Send {
  fn close(&mut self);

  fn take_error(&mut self) -> Option<InputError> {
    None
  }
}

/// 根据输入源种类打开输入
pub trait OpenSource: Send + Sync {
  fn open(&self, kind: &SourceKind) -> Result<Box<dyn FrameSource>, InputError>;
}

/// 默认输入打开器，按种类分派到具体实现
pub struct InputWrapper {
  camera_device: String,
}

impl Default for InputWrapper {
  fn default() -> Self {
    Self {
      camera_device: "/dev/video0".to_string(),
    }
  }
}

impl InputWrapper {
  pub fn with_camera_device(mut self, device: impl Into<String>) -> Self {
    self.camera_device = device.into();
    self
  }

  pub fn camera_device(&self) -> &str {
    &self.camera_device
  }
}

impl OpenSource for InputWrapper {
  fn open(&self, kind: &SourceKind) -> Result<Box<dyn FrameSource>, InputError> {
    debug!("打开输入源: {}", kind);
    match kind {
      SourceKind::ImageFile(path) => Ok(Box::new(ImageFileInput::open(path)?)),
      #[cfg(feature = "gstreamer_input")]
      SourceKind::VideoFile(path) => {
        let input = GStreamerInputPipelineBuilder::new().file(path).build()?;
        Ok(Box::new(input))
      }
      #[cfg(feature = "gstreamer_input")]
      SourceKind::Webcam => {
        let input = GStreamerInputPipelineBuilder::new()
          .camera(&self.camera_device)
          .build()?;
        Ok(Box::new(input))
      }
      #[cfg(not(feature = "gstreamer_input"))]
      SourceKind::VideoFile(_) => Err(InputError::Unsupported("视频文件 (需要 gstreamer_input 特性)")),
      #[cfg(not(feature = "gstreamer_input"))]
      SourceKind::Webcam => Err(InputError::Unsupported("摄像头 (需要 gstreamer_input 特性)")),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn classifies_paths_by_extension() {
    assert_eq!(
      SourceKind::from_path("/data/clip.MP4"),
      Some(SourceKind::VideoFile(PathBuf::from("/data/clip.MP4")))
    );
    assert_eq!(
      SourceKind::from_path("street.jpeg"),
      Some(SourceKind::ImageFile(PathBuf::from("street.jpeg")))
    );
    assert_eq!(SourceKind::from_path("notes.txt"), None);
    assert_eq!(SourceKind::from_path("no_extension"), None);
  }

  #[test]
  fn parses_source_urls() {
    let camera = SourceKind::from_url(&Url::parse("camera:///dev/video0").unwrap()).unwrap();
    assert_eq!(camera, SourceKind::Webcam);

    let video = SourceKind::from_url(&Url::parse("video:///tmp/a.avi").unwrap()).unwrap();
    assert_eq!(video, SourceKind::VideoFile(PathBuf::from("/tmp/a.avi")));

    let image = SourceKind::from_url(&Url::parse("image:///tmp/b.png").unwrap()).unwrap();
    assert_eq!(image, SourceKind::ImageFile(PathBuf::from("/tmp/b.png")));

    assert!(matches!(
      SourceKind::from_url(&Url::parse("rtsp://host/stream").unwrap()),
      Err(InputError::SchemeMismatch)
    ));
  }

  #[test]
  fn only_webcam_is_unbounded() {
    assert!(!SourceKind::Webcam.is_finite());
    assert!(SourceKind::VideoFile(PathBuf::from("a.mp4")).is_finite());
    assert!(SourceKind::ImageFile(PathBuf::from("a.png")).is_finite());
  }

  #[test]
  fn missing_image_is_reported_as_not_found() {
    let result = InputWrapper::default().open(&SourceKind::ImageFile(PathBuf::from(
      "/definitely/not/here.png",
    )));
    assert!(matches!(result, Err(InputError::NotFound { .. })));
  }
}
