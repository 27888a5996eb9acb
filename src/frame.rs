// 该文件是 Xunying （寻影） 项目的一部分。
// src/frame.rs - NHWC 帧定义
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

use image::{Rgb, RgbImage, imageops::FilterType};
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

/// 标准帧宽度，所有输入源都会缩放到该尺寸
pub const FRAME_WIDTH: u32 = 1020;
/// 标准帧高度
pub const FRAME_HEIGHT: u32 = 500;

/// 流水线中流转的标准帧
pub type CanonicalFrame = RgbNhwcFrame<FRAME_WIDTH, FRAME_HEIGHT>;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 固定尺寸的 RGB 帧，按 NHWC（行优先、通道交错）存储
///
/// 尺寸由类型参数决定，构造时保证图像尺寸恒为 `W x H`。
#[derive(Debug, Clone, PartialEq)]
pub struct RgbNhwcFrame<const W: u32, const H: u32> {
  image: RgbImage,
}

impl<const W: u32, const H: u32> TryFrom<Vec<u8>> for RgbNhwcFrame<W, H> {
  type Error = FrameError;

  fn try_from(data: Vec<u8>) -> Result<Self, Self::Error> {
    let expected = RGB_CHANNELS * W as usize * H as usize;
    let actual = data.len();
    RgbImage::from_raw(W, H, data)
      .map(|image| Self { image })
      .ok_or(FrameError::LengthMismatch { expected, actual })
  }
}

impl<const W: u32, const H: u32> Default for RgbNhwcFrame<W, H> {
  fn default() -> Self {
    Self {
      image: RgbImage::new(W, H),
    }
  }
}

impl<const W: u32, const H: u32> RgbNhwcFrame<W, H> {
  /// 使用单一颜色填充整帧
  pub fn filled(color: [u8; 3]) -> Self {
    Self {
      image: RgbImage::from_pixel(W, H, Rgb(color)),
    }
  }

  /// 从任意尺寸的图像构造帧，尺寸不符时以双线性插值缩放
  pub fn from_rgb_image(image: RgbImage) -> Self {
    if image.dimensions() == (W, H) {
      return Self { image };
    }
    Self {
      image: image::imageops::resize(&image, W, H, FilterType::Triangle),
    }
  }

  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[u8] {
    self.image.as_raw()
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  /// 仅供标注器原地绘制，外部不得替换图像
  pub(crate) fn image_mut(&mut self) -> &mut RgbImage {
    &mut self.image
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    self.image.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_wrong_buffer_length() {
    let err = RgbNhwcFrame::<4, 2>::try_from(vec![0u8; 10]).unwrap_err();
    match err {
      FrameError::LengthMismatch { expected, actual } => {
        assert_eq!(expected, 24);
        assert_eq!(actual, 10);
      }
    }
  }

  #[test]
  fn resizes_foreign_geometry_to_canonical() {
    let image = RgbImage::from_pixel(640, 480, Rgb([10, 20, 30]));
    let frame = CanonicalFrame::from_rgb_image(image);
    assert_eq!(frame.image().dimensions(), (FRAME_WIDTH, FRAME_HEIGHT));
    assert_eq!(frame.as_nhwc().len(), 1020 * 500 * 3);
    assert_eq!(frame.image().get_pixel(500, 250), &Rgb([10, 20, 30]));
  }

  #[test]
  fn keeps_matching_geometry_untouched() {
    let mut image = RgbImage::new(4, 2);
    image.put_pixel(3, 1, Rgb([1, 2, 3]));
    let frame = RgbNhwcFrame::<4, 2>::from_rgb_image(image.clone());
    assert_eq!(frame.image(), &image);
  }
}
