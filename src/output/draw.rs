// 该文件是 Xunying （寻影） 项目的一部分。
// src/output/draw.rs - 检测结果标注
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_line_segment_mut, draw_text_mut};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  frame::RgbNhwcFrame,
  model::{Detection, Labels},
  output::contour::{Contour, external_contours},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 14.0;
const LABEL_OFFSET_Y: i32 = 10;
const LABEL_COLOR: [u8; 3] = [255, 255, 255]; // 白色
const OUTLINE_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const OUTLINE_THICKNESS: i32 = 2;

/// 内置默认字体
static DEFAULT_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

#[derive(Error, Debug)]
pub enum AnnotateError {
  #[error("类别编号 {class_id} 超出标签表范围 (共 {known} 个类别)")]
  UnknownClass { class_id: u32, known: usize },
  #[error("字体文件读取失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 标注样式
#[derive(Debug, Clone, Copy)]
pub struct AnnotateStyle {
  pub outline_color: [u8; 3],
  pub outline_thickness: i32,
  pub label_color: [u8; 3],
  pub font_size: f32,
  pub label_offset_y: i32,
}

impl Default for AnnotateStyle {
  fn default() -> Self {
    Self {
      outline_color: OUTLINE_COLOR,
      outline_thickness: OUTLINE_THICKNESS,
      label_color: LABEL_COLOR,
      font_size: LABEL_FONT_SIZE,
      label_offset_y: LABEL_OFFSET_Y,
    }
  }
}

/// 把检测实例的轮廓和类别名称画到帧上
///
/// 没有掩码的实例不绘制。未指定字体时使用内置的 DejaVu Sans。
pub struct Annotator {
  labels: Labels,
  font: FontArc,
  style: AnnotateStyle,
}

impl Annotator {
  pub fn new(labels: Labels) -> Result<Self, AnnotateError> {
    Ok(Self {
      labels,
      font: FontArc::try_from_slice(DEFAULT_FONT)?,
      style: AnnotateStyle::default(),
    })
  }

  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = font;
    self
  }

  pub fn with_font_file(self, path: impl AsRef<Path>) -> Result<Self, AnnotateError> {
    let data = std::fs::read(path.as_ref())?;
    let font = FontArc::try_from_vec(data)?;
    info!("加载字体: {}", path.as_ref().display());
    Ok(self.with_font(font))
  }

  pub fn with_style(mut self, style: AnnotateStyle) -> Self {
    self.style = style;
    self
  }

  pub fn labels(&self) -> &Labels {
    &self.labels
  }

  pub fn font(&self) -> &FontArc {
    &self.font
  }

  pub fn style(&self) -> &AnnotateStyle {
    &self.style
  }

  /// 就地标注；类别越界时不修改帧
  pub fn annotate<const W: u32, const H: u32>(
    &self,
    frame: &mut RgbNhwcFrame<W, H>,
    detections: &[Detection],
  ) -> Result<(), AnnotateError> {
    let mut resolved = Vec::with_capacity(detections.len());
    for detection in detections {
      let Some(mask) = &detection.mask else {
        continue;
      };
      let label = detection
        .label(&self.labels)
        .ok_or(AnnotateError::UnknownClass {
          class_id: detection.class_id,
          known: self.labels.len(),
        })?;
      resolved.push((mask, label));
    }

    let image = frame.image_mut();
    for (mask, label) in resolved {
      let mask = mask.resample(W, H);
      let contours = external_contours(&mask);
      debug!("类别 {} 提取到 {} 条轮廓", label, contours.len());
      for contour in contours.iter() {
        self.draw_contour(image, contour);
        self.draw_label(image, contour, label);
      }
    }
    Ok(())
  }

  fn draw_contour(&self, image: &mut RgbImage, contour: &Contour) {
    let color = Rgb(self.style.outline_color);
    let points = contour.points();
    if points.len() == 1 {
      let p = points[0];
      self.stroke(image, (p.x, p.y), (p.x, p.y), color);
      return;
    }
    for (i, start) in points.iter().enumerate() {
      let end = points[(i + 1) % points.len()];
      self.stroke(image, (start.x, start.y), (end.x, end.y), color);
    }
  }

  /// 加粗线段：以轮廓为中心平移绘制多次
  fn stroke(&self, image: &mut RgbImage, start: (i32, i32), end: (i32, i32), color: Rgb<u8>) {
    let thickness = self.style.outline_thickness.max(1);
    let offsets = -(thickness / 2)..thickness - thickness / 2;
    for dx in offsets.clone() {
      for dy in offsets.clone() {
        draw_line_segment_mut(
          image,
          ((start.0 + dx) as f32, (start.1 + dy) as f32),
          ((end.0 + dx) as f32, (end.1 + dy) as f32),
          color,
        );
      }
    }
  }

  fn draw_label(&self, image: &mut RgbImage, contour: &Contour, label: &str) {
    let Some((x, y, _, _)) = contour.bounding_rect() else {
      return;
    };
    draw_text_mut(
      image,
      Rgb(self.style.label_color),
      x,
      y - self.style.label_offset_y,
      PxScale::from(self.style.font_size),
      &self.font,
      label,
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BoundingBox, Mask};

  type SmallFrame = RgbNhwcFrame<40, 20>;
  type TallFrame = RgbNhwcFrame<60, 60>;

  const BLACK: [u8; 3] = [0, 0, 0];

  fn labels() -> Labels {
    Labels::new(["person", "car"]).unwrap()
  }

  fn annotator() -> Annotator {
    Annotator::new(labels()).unwrap()
  }

  fn detection(class_id: u32, mask: Option<Mask>) -> Detection {
    Detection {
      class_id,
      score: 0.9,
      bbox: BoundingBox::from_corners(0.0, 0.0, 1.0, 1.0),
      mask,
    }
  }

  /// 60x60 帧中 x 10..=20, y 25..=50 的方块，标签位于 y = 15
  fn tall_box() -> Mask {
    Mask::from_fn(60, 60, |x, y| (10..=20).contains(&x) && (25..=50).contains(&y)).unwrap()
  }

  #[test]
  fn no_detections_leave_frame_untouched() {
    let mut frame = SmallFrame::filled([10, 20, 30]);
    let before = frame.clone();
    annotator().annotate(&mut frame, &[]).unwrap();
    assert_eq!(frame, before);
  }

  #[test]
  fn maskless_detections_are_skipped() {
    let mut frame = SmallFrame::filled([10, 20, 30]);
    let before = frame.clone();
    annotator()
      .annotate(&mut frame, &[detection(1, None), detection(7, None)])
      .unwrap();
    assert_eq!(frame, before);
  }

  #[test]
  fn outline_is_centred_on_mask_boundary() {
    let mut frame = TallFrame::filled(BLACK);
    annotator()
      .annotate(&mut frame, &[detection(0, Some(tall_box()))])
      .unwrap();

    let image = frame.image();
    assert_eq!(image.get_pixel(10, 50).0, OUTLINE_COLOR);
    assert_eq!(image.get_pixel(20, 50).0, OUTLINE_COLOR);
    // 两像素宽的描边向内外各延伸
    assert_eq!(image.get_pixel(9, 40).0, OUTLINE_COLOR);
    assert_eq!(image.get_pixel(10, 40).0, OUTLINE_COLOR);
    assert_eq!(image.get_pixel(11, 40).0, BLACK);
    assert_eq!(image.get_pixel(19, 40).0, OUTLINE_COLOR);
    assert_eq!(image.get_pixel(21, 40).0, BLACK);
    // 内部与远处像素不受影响
    assert_eq!(image.get_pixel(15, 45).0, BLACK);
    assert_eq!(image.get_pixel(55, 55).0, BLACK);
  }

  #[test]
  fn label_is_drawn_above_the_contour() {
    let mut frame = TallFrame::filled(BLACK);
    let annotator = annotator();
    annotator
      .annotate(&mut frame, &[detection(0, Some(tall_box()))])
      .unwrap();

    let (width, _) = imageproc::drawing::text_size(
      PxScale::from(LABEL_FONT_SIZE),
      annotator.font(),
      "person",
    );
    let image = frame.image();
    let inked = (15..24)
      .flat_map(|y| (10..(10 + width).min(60)).map(move |x| (x, y)))
      .filter(|&(x, y)| image.get_pixel(x, y).0 != BLACK)
      .count();
    assert!(inked > 0);
    // 标签左侧保持原样
    assert!((0..60).all(|y| image.get_pixel(2, y).0 == BLACK));
  }

  #[test]
  fn unknown_class_fails_without_touching_frame() {
    let mut frame = SmallFrame::filled([1, 2, 3]);
    let before = frame.clone();
    let good = Mask::from_fn(40, 20, |x, y| x < 5 && y < 5).unwrap();
    let result = annotator().annotate(
      &mut frame,
      &[detection(0, Some(good.clone())), detection(9, Some(good))],
    );
    assert!(matches!(
      result,
      Err(AnnotateError::UnknownClass {
        class_id: 9,
        known: 2
      })
    ));
    assert_eq!(frame, before);
  }

  #[test]
  fn missing_font_file_is_an_error() {
    assert!(matches!(
      annotator().with_font_file("/nonexistent/font.ttf"),
      Err(AnnotateError::IoError(_))
    ));
  }
}
