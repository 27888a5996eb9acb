// 该文件是 Xunying （寻影） 项目的一部分。
// src/output/contour.rs - 掩码轮廓提取
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

use image::{GrayImage, imageops};
use imageproc::{
  contours::{BorderType, find_contours},
  point::Point,
};

use crate::model::Mask;

/// 闭合轮廓，顶点按描边顺序排列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contour {
  points: Vec<Point<i32>>,
}

impl Contour {
  pub fn points(&self) -> &[Point<i32>] {
    &self.points
  }

  /// 外接矩形 (x_min, y_min, x_max, y_max)
  pub fn bounding_rect(&self) -> Option<(i32, i32, i32, i32)> {
    let first = self.points.first()?;
    Some(self.points.iter().fold(
      (first.x, first.y, first.x, first.y),
      |(x0, y0, x1, y1), p| (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y)),
    ))
  }
}

/// 提取最外层轮廓（不描绘孔洞及孔洞内的岛），并压缩共线的点
///
/// 贴着图像边缘的区域同样有外轮廓，坐标落在图像范围内。
pub fn external_contours(mask: &Mask) -> Vec<Contour> {
  let grid = mask.as_gray();
  let (width, height) = grid.dimensions();
  if width == 0 || height == 0 {
    return Vec::new();
  }

  // 四周补一圈背景，否则贴边区域没有外边界
  let mut padded = GrayImage::new(width + 2, height + 2);
  imageops::replace(&mut padded, grid, 1, 1);

  let (max_x, max_y) = (width as i32 - 1, height as i32 - 1);
  find_contours::<i32>(&padded)
    .into_iter()
    .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
    .map(|c| {
      let points: Vec<Point<i32>> = c
        .points
        .iter()
        .map(|p| Point::new((p.x - 1).clamp(0, max_x), (p.y - 1).clamp(0, max_y)))
        .collect();
      Contour {
        points: compress_chain(&points),
      }
    })
    .filter(|c| !c.points.is_empty())
    .collect()
}

fn step(from: &Point<i32>, to: &Point<i32>) -> (i32, i32) {
  ((to.x - from.x).signum(), (to.y - from.y).signum())
}

/// 链式压缩：进入方向与离开方向相同的点被去掉，只保留线段端点
pub fn compress_chain(points: &[Point<i32>]) -> Vec<Point<i32>> {
  let n = points.len();
  if n <= 2 {
    return points.to_vec();
  }

  let kept: Vec<Point<i32>> = (0..n)
    .filter(|&i| {
      let prev = &points[(i + n - 1) % n];
      let next = &points[(i + 1) % n];
      step(prev, &points[i]) != step(&points[i], next)
    })
    .map(|i| points[i])
    .collect();

  if kept.is_empty() {
    points.to_vec()
  } else {
    kept
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sorted(points: &[Point<i32>]) -> Vec<(i32, i32)> {
    let mut v: Vec<(i32, i32)> = points.iter().map(|p| (p.x, p.y)).collect();
    v.sort();
    v
  }

  #[test]
  fn rectangle_collapses_to_corners() {
    let mask = Mask::from_fn(10, 8, |x, y| (2..=5).contains(&x) && (1..=3).contains(&y)).unwrap();
    let contours = external_contours(&mask);
    assert_eq!(contours.len(), 1);
    assert_eq!(
      sorted(contours[0].points()),
      vec![(2, 1), (2, 3), (5, 1), (5, 3)]
    );
    assert_eq!(contours[0].bounding_rect(), Some((2, 1, 5, 3)));
  }

  #[test]
  fn holes_are_not_outlined() {
    let mask = Mask::from_fn(12, 12, |x, y| {
      let ring = (1..=10).contains(&x) && (1..=10).contains(&y);
      let hole = (4..=7).contains(&x) && (4..=7).contains(&y);
      ring && !hole
    })
    .unwrap();
    let contours = external_contours(&mask);
    assert_eq!(contours.len(), 1);
    assert_eq!(contours[0].bounding_rect(), Some((1, 1, 10, 10)));
  }

  #[test]
  fn separate_blobs_give_separate_contours() {
    let mask = Mask::from_fn(20, 6, |x, y| (1..=3).contains(&y) && (x <= 4 || x >= 12)).unwrap();
    assert_eq!(external_contours(&mask).len(), 2);
  }

  #[test]
  fn blob_touching_the_edge_is_outlined() {
    let mask = Mask::from_fn(10, 8, |x, y| x <= 3 && (2..=5).contains(&y)).unwrap();
    let contours = external_contours(&mask);
    assert_eq!(contours.len(), 1);
    assert_eq!(contours[0].bounding_rect(), Some((0, 2, 3, 5)));
  }

  #[test]
  fn full_mask_is_outlined_along_the_border() {
    let mask = Mask::from_fn(6, 4, |_, _| true).unwrap();
    let contours = external_contours(&mask);
    assert_eq!(contours.len(), 1);
    assert_eq!(
      sorted(contours[0].points()),
      vec![(0, 0), (0, 3), (5, 0), (5, 3)]
    );
  }

  #[test]
  fn empty_mask_has_no_contours() {
    let mask = Mask::from_fn(5, 5, |_, _| false).unwrap();
    assert!(external_contours(&mask).is_empty());
  }

  #[test]
  fn short_chains_are_untouched() {
    let points = vec![Point::new(1, 1), Point::new(2, 1)];
    assert_eq!(compress_chain(&points), points);
  }
}
