// 该文件是 Xunying （寻影） 项目的一部分。
// src/model/segment.rs - YOLOv8 实例分割输出解码
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

use thiserror::Error;
use tracing::debug;

use crate::model::{BoundingBox, Detection, Mask, MaskError};

const CXYWH_OFFSET: usize = 4;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;
const MAX_DETECTIONS: usize = 300;

#[derive(Error, Debug)]
pub enum SegmentError {
  #[error("输出张量形状不匹配: {0}")]
  ShapeMismatch(String),
  #[error("掩码错误: {0}")]
  MaskError(#[from] MaskError),
}

/// 分割模型的两路原始输出
///
/// - `predictions`: `[1, 4 + nc + nm, anchors]`，每列为 `cx, cy, w, h, 类别分数..., 掩码系数...`
/// - `prototypes`: `[1, nm, ph, pw]`，掩码原型
pub struct SegmentOutputs<'a> {
  pub predictions: &'a [f32],
  pub prediction_shape: [usize; 3],
  pub prototypes: &'a [f32],
  pub prototype_shape: [usize; 4],
}

struct Candidate {
  class_id: u32,
  score: f32,
  bbox: BoundingBox,
  anchor: usize,
}

/// 将模型输入空间的输出解码为帧坐标下的检测结果，掩码保持原型分辨率
#[derive(Debug, Clone)]
pub struct SegmentDecoder {
  input_size: (u32, u32),
  frame_size: (u32, u32),
  confidence: f32,
  iou: f32,
}

impl SegmentDecoder {
  pub fn new(input_size: (u32, u32), frame_size: (u32, u32)) -> Self {
    Self {
      input_size,
      frame_size,
      confidence: DEFAULT_CONFIDENCE,
      iou: DEFAULT_IOU,
    }
  }

  pub fn with_confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn with_iou(mut self, iou: f32) -> Self {
    self.iou = iou;
    self
  }

  pub fn decode(&self, outputs: &SegmentOutputs) -> Result<Vec<Detection>, SegmentError> {
    let [batch, channels, anchors] = outputs.prediction_shape;
    let [proto_batch, num_masks, proto_h, proto_w] = outputs.prototype_shape;

    if batch != 1 || proto_batch != 1 {
      return Err(SegmentError::ShapeMismatch(format!(
        "仅支持批大小 1, 实际为 {} / {}",
        batch, proto_batch
      )));
    }
    if channels <= CXYWH_OFFSET + num_masks {
      return Err(SegmentError::ShapeMismatch(format!(
        "通道数 {} 不足以容纳 4 个框参数和 {} 个掩码系数",
        channels, num_masks
      )));
    }
    if outputs.predictions.len() != channels * anchors {
      return Err(SegmentError::ShapeMismatch(format!(
        "预测张量长度 {} 与形状 {:?} 不符",
        outputs.predictions.len(),
        outputs.prediction_shape
      )));
    }
    if outputs.prototypes.len() != num_masks * proto_h * proto_w {
      return Err(SegmentError::ShapeMismatch(format!(
        "原型张量长度 {} 与形状 {:?} 不符",
        outputs.prototypes.len(),
        outputs.prototype_shape
      )));
    }

    let num_classes = channels - CXYWH_OFFSET - num_masks;
    let preds = outputs.predictions;
    let at = |c: usize, a: usize| preds[c * anchors + a];

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
      let (class_id, score) = (0..num_classes)
        .map(|c| (c, at(CXYWH_OFFSET + c, anchor)))
        .fold((0usize, f32::MIN), |best, x| if x.1 > best.1 { x } else { best });

      if score < self.confidence {
        continue;
      }

      let cx = at(0, anchor);
      let cy = at(1, anchor);
      let w = at(2, anchor);
      let h = at(3, anchor);
      candidates.push(Candidate {
        class_id: class_id as u32,
        score,
        bbox: BoundingBox::from_corners(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0),
        anchor,
      });
    }

    let kept = self.non_max_suppression(candidates);
    debug!("NMS 后保留 {} 个实例", kept.len());

    let (input_w, input_h) = (self.input_size.0 as f32, self.input_size.1 as f32);
    let (frame_w, frame_h) = (self.frame_size.0 as f32, self.frame_size.1 as f32);
    let proto_scale_x = proto_w as f32 / input_w;
    let proto_scale_y = proto_h as f32 / input_h;
    let plane = proto_h * proto_w;

    let mut detections = Vec::with_capacity(kept.len());
    for candidate in kept {
      let coefs: Vec<f32> = (0..num_masks)
        .map(|k| at(CXYWH_OFFSET + num_classes + k, candidate.anchor))
        .collect();

      let b = candidate.bbox;
      let (px0, py0) = (b.x * proto_scale_x, b.y * proto_scale_y);
      let (px1, py1) = (b.x_max() * proto_scale_x, b.y_max() * proto_scale_y);

      // sigmoid(v) > 0.5 等价于 v > 0
      let mask = Mask::from_fn(proto_w as u32, proto_h as u32, |x, y| {
        let (cx, cy) = (x as f32 + 0.5, y as f32 + 0.5);
        if cx < px0 || cx > px1 || cy < py0 || cy > py1 {
          return false;
        }
        let idx = y as usize * proto_w + x as usize;
        let logit: f32 = coefs
          .iter()
          .enumerate()
          .map(|(k, coef)| coef * outputs.prototypes[k * plane + idx])
          .sum();
        logit > 0.0
      })?;

      let sx = frame_w / input_w;
      let sy = frame_h / input_h;
      detections.push(Detection {
        class_id: candidate.class_id,
        score: candidate.score,
        bbox: BoundingBox::from_corners(
          (b.x * sx).clamp(0.0, frame_w),
          (b.y * sy).clamp(0.0, frame_h),
          (b.x_max() * sx).clamp(0.0, frame_w),
          (b.y_max() * sy).clamp(0.0, frame_h),
        ),
        mask: Some(mask),
      });
    }

    Ok(detections)
  }

  /// 按类别做非极大值抑制
  fn non_max_suppression(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
      let suppressed = kept
        .iter()
        .any(|k| k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > self.iou);
      if !suppressed {
        kept.push(candidate);
        if kept.len() >= MAX_DETECTIONS {
          break;
        }
      }
    }
    kept
  }
}
