// 该文件是 Xunying （寻影） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

/// Xunying 实例分割标注演示
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// YOLOv8 分割模型 (ONNX) 文件路径
  #[arg(long, value_name = "MODEL")]
  pub model: PathBuf,

  /// 类别标签文件 (TOML, `names = [...]`)，缺省时读取模型元数据
  #[arg(long, value_name = "LABELS")]
  pub labels: Option<PathBuf>,

  /// 标签文字使用的 TrueType 字体，缺省使用内置的 DejaVu Sans
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 显示输出
  /// 支持:
  /// - folder:///目录   按日期保存每一帧
  /// - image:///文件    覆盖保存最新一帧
  /// - gst://display    GStreamer 窗口
  #[arg(long, value_name = "OUTPUT", default_value = "folder:///tmp/xunying")]
  pub output: Url,

  /// 摄像头设备
  #[arg(long, value_name = "DEVICE", default_value = "/dev/video0")]
  pub camera: String,

  /// 启动后立即处理的输入（路径或 camera://、video:///、image:/// URL）
  #[arg(long, value_name = "SOURCE")]
  pub source: Option<String>,

  /// 跳帧间隔，每 N 帧处理 1 帧
  #[arg(long, value_name = "N", default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
  pub frame_skip: u32,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.25, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.45, value_name = "THRESHOLD")]
  pub iou: f32,

  /// 第一次运行结束后退出
  #[arg(long)]
  pub once: bool,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults() {
    let args = Args::try_parse_from(["xunying", "--model", "yolov8n-seg.onnx"]).unwrap();
    assert_eq!(args.frame_skip, 3);
    assert_eq!(args.camera, "/dev/video0");
    assert_eq!(args.output.scheme(), "folder");
    assert!(args.source.is_none());
    assert!(!args.once);
  }

  #[test]
  fn zero_frame_skip_is_rejected() {
    assert!(
      Args::try_parse_from(["xunying", "--model", "m.onnx", "--frame-skip", "0"]).is_err()
    );
  }
}
