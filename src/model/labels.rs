// 该文件是 Xunying （寻影） 项目的一部分。
// src/model/labels.rs - 类别标签表
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

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum LabelsError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件格式错误: {0}")]
  TomlError(#[from] toml::de::Error),
  #[error("模型元数据中的类别表无法解析: {0}")]
  MetadataError(String),
  #[error("标签表为空")]
  Empty,
}

#[derive(Deserialize)]
struct LabelFile {
  names: Vec<String>,
}

/// 类别编号到名称的映射，编号即下标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
  names: Vec<String>,
}

impl Labels {
  pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Result<Self, LabelsError> {
    let names: Vec<String> = names.into_iter().map(Into::into).collect();
    if names.is_empty() {
      return Err(LabelsError::Empty);
    }
    Ok(Self { names })
  }

  /// 读取 TOML 标签文件，格式为 `names = ["person", ...]`
  pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, LabelsError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let labels = Self::from_toml_str(&content)?;
    info!(
      "从 {} 加载 {} 个类别",
      path.as_ref().display(),
      labels.len()
    );
    Ok(labels)
  }

  pub fn from_toml_str(content: &str) -> Result<Self, LabelsError> {
    let file: LabelFile = toml::from_str(content)?;
    Self::new(file.names)
  }

  /// 解析 Ultralytics 导出模型元数据中的 `names` 字段，
  /// 形如 `{0: 'person', 1: 'bicycle'}`
  pub fn from_ultralytics_metadata(names: &str) -> Result<Self, LabelsError> {
    let body = names
      .trim()
      .strip_prefix('{')
      .and_then(|s| s.strip_suffix('}'))
      .ok_or_else(|| LabelsError::MetadataError(names.to_string()))?;

    let mut entries: Vec<(u32, String)> = Vec::new();
    let mut rest = body.trim();
    while !rest.is_empty() {
      let (id, after) = rest
        .split_once(':')
        .ok_or_else(|| LabelsError::MetadataError(names.to_string()))?;
      let id: u32 = id
        .trim()
        .parse()
        .map_err(|_| LabelsError::MetadataError(names.to_string()))?;

      let after = after.trim_start();
      let quote = after
        .chars()
        .next()
        .filter(|c| *c == '\'' || *c == '"')
        .ok_or_else(|| LabelsError::MetadataError(names.to_string()))?;
      let after = &after[1..];
      let end = after
        .find(quote)
        .ok_or_else(|| LabelsError::MetadataError(names.to_string()))?;
      entries.push((id, after[..end].to_string()));

      rest = after[end + 1..].trim_start();
      rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
    }

    entries.sort_by_key(|(id, _)| *id);
    for (expected, (id, _)) in entries.iter().enumerate() {
      if *id as usize != expected {
        return Err(LabelsError::MetadataError(format!("类别编号不连续: {}", id)));
      }
    }
    Self::new(entries.into_iter().map(|(_, name)| name))
  }

  pub fn get(&self, class_id: u32) -> Option<&str> {
    self.names.get(class_id as usize).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}
