// 该文件是 Xunying （寻影） 项目的一部分。
// src/model/yolov8_seg.rs - YOLOv8 实例分割模型（ONNX Runtime）
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

use image::imageops::FilterType;
use ort::{session::Session, value::Tensor};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{CanonicalFrame, FRAME_HEIGHT, FRAME_WIDTH},
  input::url_path,
  model::{Detection, Labels, LabelsError, Model, SegmentDecoder, SegmentError, SegmentOutputs},
};

const YOLOV8_SEG_INPUT_W: u32 = 640;
const YOLOV8_SEG_INPUT_H: u32 = 640;
const YOLOV8_SEG_INPUT_NAME: &str = "images";
const YOLOV8_SEG_PRED_NAME: &str = "output0";
const YOLOV8_SEG_PROTO_NAME: &str = "output1";
const YOLOV8_SEG_NAMES_KEY: &str = "names";

#[derive(Error, Debug)]
pub enum Yolov8SegError {
  #[error("模型文件不存在: {0}")]
  ModelNotFound(PathBuf),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("标签错误: {0}")]
  LabelsError(#[from] LabelsError),
  #[error("输出解码错误: {0}")]
  SegmentError(#[from] SegmentError),
  #[error("输出张量形状无效: {0:?}")]
  InvalidShape(Vec<i64>),
}

pub struct Yolov8SegBuilder {
  model_path: PathBuf,
  labels: Option<Labels>,
  confidence: Option<f32>,
  iou: Option<f32>,
}

impl FromUrlWithScheme for Yolov8SegBuilder {
  const SCHEME: &'static str = "yolov8-seg";
}

impl FromUrl for Yolov8SegBuilder {
  type Error = Yolov8SegError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(Yolov8SegError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }
    Ok(Self::new(url_path(url)))
  }
}

impl Yolov8SegBuilder {
  pub fn new(model_path: impl AsRef<Path>) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
      labels: None,
      confidence: None,
      iou: None,
    }
  }

  /// 指定标签表，未指定时从模型元数据读取
  pub fn labels(mut self, labels: Labels) -> Self {
    self.labels = Some(labels);
    self
  }

  pub fn confidence(mut self, confidence: f32) -> Self {
    self.confidence = Some(confidence);
    self
  }

  pub fn iou(mut self, iou: f32) -> Self {
    self.iou = Some(iou);
    self
  }

  pub fn build(self) -> Result<Yolov8Seg, Yolov8SegError> {
    if !self.model_path.exists() {
      return Err(Yolov8SegError::ModelNotFound(self.model_path));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let session = Session::builder()?.commit_from_file(&self.model_path)?;
    debug!(
      "模型输入: {:?}",
      session.inputs.iter().map(|i| &i.name).collect::<Vec<_>>()
    );
    debug!(
      "模型输出: {:?}",
      session.outputs.iter().map(|o| &o.name).collect::<Vec<_>>()
    );

    let labels = match self.labels {
      Some(labels) => labels,
      None => {
        let names = session
          .metadata()?
          .custom(YOLOV8_SEG_NAMES_KEY)?
          .ok_or_else(|| {
            LabelsError::MetadataError("模型元数据中没有 names 字段".to_string())
          })?;
        Labels::from_ultralytics_metadata(&names)?
      }
    };
    info!("模型加载完成, 共 {} 个类别", labels.len());

    let mut decoder = SegmentDecoder::new(
      (YOLOV8_SEG_INPUT_W, YOLOV8_SEG_INPUT_H),
      (FRAME_WIDTH, FRAME_HEIGHT),
    );
    if let Some(confidence) = self.confidence {
      decoder = decoder.with_confidence(confidence);
    }
    if let Some(iou) = self.iou {
      decoder = decoder.with_iou(iou);
    }

    Ok(Yolov8Seg {
      session,
      labels,
      decoder,
    })
  }
}

/// YOLOv8 实例分割模型
///
/// 输入帧直接拉伸到 640x640，原型掩码因此与整帧一一对应。
pub struct Yolov8Seg {
  session: Session,
  labels: Labels,
  decoder: SegmentDecoder,
}

impl Yolov8Seg {
  pub fn labels(&self) -> &Labels {
    &self.labels
  }

  fn preprocess(frame: &CanonicalFrame) -> Result<Tensor<f32>, Yolov8SegError> {
    let resized = image::imageops::resize(
      frame.image(),
      YOLOV8_SEG_INPUT_W,
      YOLOV8_SEG_INPUT_H,
      FilterType::Triangle,
    );

    let plane = (YOLOV8_SEG_INPUT_W * YOLOV8_SEG_INPUT_H) as usize;
    let mut data = vec![0f32; 3 * plane];
    for (idx, pixel) in resized.pixels().enumerate() {
      data[idx] = pixel.0[0] as f32 / 255.0;
      data[plane + idx] = pixel.0[1] as f32 / 255.0;
      data[2 * plane + idx] = pixel.0[2] as f32 / 255.0;
    }

    let shape = [
      1usize,
      3,
      YOLOV8_SEG_INPUT_H as usize,
      YOLOV8_SEG_INPUT_W as usize,
    ];
    Ok(Tensor::from_array((shape, data.into_boxed_slice()))?)
  }
}

fn shape_array<const N: usize>(shape: &[i64]) -> Result<[usize; N], Yolov8SegError> {
  if shape.len() != N || shape.iter().any(|d| *d <= 0) {
    return Err(Yolov8SegError::InvalidShape(shape.to_vec()));
  }
  let mut dims = [0usize; N];
  for (dim, value) in dims.iter_mut().zip(shape) {
    *dim = *value as usize;
  }
  Ok(dims)
}

impl Model for Yolov8Seg {
  type Input = CanonicalFrame;
  type Output = Vec<Detection>;
  type Error = Yolov8SegError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let tensor = Self::preprocess(input)?;

    debug!("执行模型推理");
    let outputs = self
      .session
      .run(ort::inputs![YOLOV8_SEG_INPUT_NAME => tensor])?;

    let (pred_shape, predictions) =
      outputs[YOLOV8_SEG_PRED_NAME].try_extract_tensor::<f32>()?;
    let (proto_shape, prototypes) =
      outputs[YOLOV8_SEG_PROTO_NAME].try_extract_tensor::<f32>()?;

    let detections = self.decoder.decode(&SegmentOutputs {
      predictions,
      prediction_shape: shape_array(pred_shape)?,
      prototypes,
      prototype_shape: shape_array(proto_shape)?,
    })?;

    if let Some(unknown) = detections
      .iter()
      .find(|d| self.labels.get(d.class_id).is_none())
    {
      warn!("模型输出的类别 {} 不在标签表中", unknown.class_id);
    }
    debug!("检测到 {} 个实例", detections.len());
    Ok(detections)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builder_rejects_foreign_scheme() {
    let url = Url::parse("yolo26:///models/a.rknn").unwrap();
    assert!(matches!(
      Yolov8SegBuilder::from_url(&url),
      Err(Yolov8SegError::ModelPathError(_))
    ));
  }

  #[test]
  fn missing_model_file_is_reported() {
    let url = Url::parse("yolov8-seg:///nonexistent/yolov8n-seg.onnx").unwrap();
    let result = Yolov8SegBuilder::from_url(&url).unwrap().build();
    assert!(matches!(result, Err(Yolov8SegError::ModelNotFound(_))));
  }

  #[test]
  fn shape_conversion_checks_rank() {
    assert_eq!(shape_array::<3>(&[1, 38, 8400]).unwrap(), [1, 38, 8400]);
    assert!(shape_array::<4>(&[1, 32, 160]).is_err());
    assert!(shape_array::<3>(&[1, -1, 8400]).is_err());
  }
}
