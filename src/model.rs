// 该文件是 Xunying （寻影） 项目的一部分。
// src/model.rs - 模型
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

use image::{GrayImage, Luma, imageops::FilterType};
use thiserror::Error;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 前景像素值
pub const MASK_FOREGROUND: u8 = 255;
/// 重采样后判定为前景的阈值
const MASK_THRESHOLD: u8 = 128;

/// 边界框，像素坐标 (x, y, width, height)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl BoundingBox {
  pub fn from_corners(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
    Self {
      x: x_min,
      y: y_min,
      width: (x_max - x_min).max(0.0),
      height: (y_max - y_min).max(0.0),
    }
  }

  pub fn x_max(&self) -> f32 {
    self.x + self.width
  }

  pub fn y_max(&self) -> f32 {
    self.y + self.height
  }

  pub fn area(&self) -> f32 {
    self.width * self.height
  }

  pub fn iou(&self, other: &BoundingBox) -> f32 {
    let ix = (self.x_max().min(other.x_max()) - self.x.max(other.x)).max(0.0);
    let iy = (self.y_max().min(other.y_max()) - self.y.max(other.y)).max(0.0);
    let inter = ix * iy;
    if inter == 0.0 {
      return 0.0;
    }
    inter / (self.area() + other.area() - inter)
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MaskError {
  #[error("掩码尺寸无效: {width}x{height}")]
  EmptyGeometry { width: u32, height: u32 },
}

/// 实例二值掩码（0 为背景，255 为前景），分辨率为模型原生分辨率
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
  grid: GrayImage,
}

impl Mask {
  /// 由灰度图构造，非零像素视为前景
  pub fn new(grid: GrayImage) -> Result<Self, MaskError> {
    let (width, height) = grid.dimensions();
    if width == 0 || height == 0 {
      return Err(MaskError::EmptyGeometry { width, height });
    }
    let mut grid = grid;
    for pixel in grid.pixels_mut() {
      pixel.0[0] = if pixel.0[0] > 0 { MASK_FOREGROUND } else { 0 };
    }
    Ok(Self { grid })
  }

  pub fn from_fn(
    width: u32,
    height: u32,
    mut foreground: impl FnMut(u32, u32) -> bool,
  ) -> Result<Self, MaskError> {
    Self::new(GrayImage::from_fn(width, height, |x, y| {
      Luma([if foreground(x, y) { MASK_FOREGROUND } else { 0 }])
    }))
  }

  pub fn width(&self) -> u32 {
    self.grid.width()
  }

  pub fn height(&self) -> u32 {
    self.grid.height()
  }

  pub fn is_foreground(&self, x: u32, y: u32) -> bool {
    self.grid.get_pixel(x, y).0[0] > 0
  }

  pub fn as_gray(&self) -> &GrayImage {
    &self.grid
  }

  /// 双线性重采样到目标尺寸，再按阈值恢复二值语义
  pub fn resample(&self, width: u32, height: u32) -> Mask {
    if self.grid.dimensions() == (width, height) {
      return self.clone();
    }
    let mut grid = image::imageops::resize(&self.grid, width, height, FilterType::Triangle);
    for pixel in grid.pixels_mut() {
      pixel.0[0] = if pixel.0[0] >= MASK_THRESHOLD {
        MASK_FOREGROUND
      } else {
        0
      };
    }
    Mask { grid }
  }
}

/// 单个检测实例
#[derive(Debug, Clone)]
pub struct Detection {
  pub class_id: u32,
  pub score: f32,
  pub bbox: BoundingBox,
  pub mask: Option<Mask>,
}

impl Detection {
  /// 通过标签表解析类别名称
  pub fn label<'a>(&self, labels: &'a Labels) -> Option<&'a str> {
    labels.get(self.class_id)
  }
}

mod labels;
pub use self::labels::{Labels, LabelsError};

mod segment;
pub use self::segment::{SegmentDecoder, SegmentError, SegmentOutputs};

#[cfg(feature = "model_yolov8_seg")]
mod yolov8_seg;
#[cfg(feature = "model_yolov8_seg")]
pub use self::yolov8_seg::{Yolov8Seg, Yolov8SegBuilder, Yolov8SegError};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mask_binarizes_input() {
    let mask = Mask::new(GrayImage::from_fn(3, 1, |x, _| Luma([x as u8]))).unwrap();
    assert!(!mask.is_foreground(0, 0));
    assert!(mask.is_foreground(1, 0));
    assert_eq!(mask.as_gray().get_pixel(2, 0).0[0], MASK_FOREGROUND);
  }

  #[test]
  fn mask_rejects_empty_geometry() {
    assert_eq!(
      Mask::new(GrayImage::new(0, 4)).unwrap_err(),
      MaskError::EmptyGeometry {
        width: 0,
        height: 4
      }
    );
  }

  #[test]
  fn resample_matches_target_geometry_and_stays_binary() {
    // 左半部分为前景
    let mask = Mask::from_fn(160, 160, |x, _| x < 80).unwrap();
    let frame_sized = mask.resample(1020, 500);
    assert_eq!((frame_sized.width(), frame_sized.height()), (1020, 500));
    assert!(
      frame_sized
        .as_gray()
        .pixels()
        .all(|p| p.0[0] == 0 || p.0[0] == MASK_FOREGROUND)
    );
    assert!(frame_sized.is_foreground(100, 250));
    assert!(!frame_sized.is_foreground(900, 250));
  }

  #[test]
  fn iou_of_disjoint_and_identical_boxes() {
    let a = BoundingBox::from_corners(0.0, 0.0, 10.0, 10.0);
    let b = BoundingBox::from_corners(20.0, 20.0, 30.0, 30.0);
    assert_eq!(a.iou(&b), 0.0);
    assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    let c = BoundingBox::from_corners(5.0, 0.0, 15.0, 10.0);
    assert!((a.iou(&c) - 50.0 / 150.0).abs() < 1e-6);
  }
}
