// 该文件是 Qianli （千里眼） 项目的一部分。
// src/lib.rs - 库主文件
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

pub mod fps;
pub mod frame;
pub mod input;
pub mod model;
pub mod output;
pub mod provision;
pub mod task;

/// 模型文件的默认下载地址（YOLOv8 ONNX 导出）
pub const DEFAULT_MODEL_URL: &str =
  "https://cdn.pyke.io/0/pyke:ort-rs/example-models@0.0.0/yolov8m.onnx";

/// 模型文件存放目录
pub const DEFAULT_MODEL_DIR: &str = "models";

/// 模型文件名
pub const DEFAULT_MODEL_NAME: &str = "yolov8m.onnx";

/// 模型文件的默认保存路径 `<DEFAULT_MODEL_DIR>/<DEFAULT_MODEL_NAME>`
pub fn default_model_path() -> PathBuf {
  Path::new(DEFAULT_MODEL_DIR).join(DEFAULT_MODEL_NAME)
}

/// 显示窗口标题
pub const WINDOW_TITLE: &str = "YOLOv8 Webcam Detection";

/// 退出按键
pub const QUIT_KEY: char = 'q';
