// 该文件是 Xunying （寻影） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::{Path, PathBuf};

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::CanonicalFrame,
  input::{FrameSource, InputError, url_path},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("I/O error: {path}: {source}")]
  IoError {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("Image loading error: {path}: {source}")]
  ImageLoadError {
    path: PathBuf,
    source: image::ImageError,
  },
}

/// 单帧图片输入：第一次 `next` 返回图片，之后即结束
pub struct ImageFileInput {
  frame: Option<CanonicalFrame>,
}

impl ImageFileInput {
  /// 打开并解码图片，同时缩放到标准尺寸
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let image = ImageReader::open(path)
      .map_err(|source| {
        error!("无法打开图片文件 {}: {}", path.display(), source);
        ImageFileInputError::IoError {
          path: path.to_path_buf(),
          source,
        }
      })?
      .with_guessed_format()
      .map_err(|source| ImageFileInputError::IoError {
        path: path.to_path_buf(),
        source,
      })?
      .decode()
      .map_err(|source| {
        error!("无法解码图片文件 {}: {}", path.display(), source);
        ImageFileInputError::ImageLoadError {
          path: path.to_path_buf(),
          source,
        }
      })?
      .to_rgb8();

    debug!(
      "图片 {} 原始尺寸 {}x{}",
      path.display(),
      image.width(),
      image.height()
    );

    Ok(ImageFileInput {
      frame: Some(CanonicalFrame::from_rgb_image(image)),
    })
  }
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch);
    }
    Ok(Self::open(url_path(url))?)
  }
}

impl Iterator for ImageFileInput {
  type Item = CanonicalFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.frame.take()
  }
}

impl FrameSource for ImageFileInput {
  fn close(&mut self) {
    self.frame = None;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::{FRAME_HEIGHT, FRAME_WIDTH};
  use image::{Rgb, RgbImage};

  #[test]
  fn yields_exactly_one_canonical_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiny.png");
    RgbImage::from_pixel(32, 16, Rgb([200, 10, 10]))
      .save(&path)
      .unwrap();

    let mut input = ImageFileInput::open(&path).unwrap();
    let frame = input.next().expect("第一帧应当存在");
    assert_eq!(frame.image().dimensions(), (FRAME_WIDTH, FRAME_HEIGHT));
    assert_eq!(frame.image().get_pixel(0, 0), &Rgb([200, 10, 10]));
    assert!(input.next().is_none());
  }

  #[test]
  fn undecodable_file_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.png");
    std::fs::write(&path, b"definitely not a png").unwrap();

    let err = ImageFileInput::open(&path).err().unwrap();
    assert!(matches!(err, ImageFileInputError::ImageLoadError { .. }));
    assert!(matches!(InputError::from(err), InputError::NotFound { .. }));
  }

  #[test]
  fn opens_from_image_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("from url.bmp");
    RgbImage::new(8, 8).save(&path).unwrap();

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file:", "image:", 1)).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    assert!(input.next().is_some());
  }
}
