// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use tracing::info;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem<T> {
  pub kind: T,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，归一化坐标
}

#[derive(Debug, Clone)]
pub struct DetectResult<T> {
  pub items: Box<[DetectItem<T>]>,
}

impl<T> DetectResult<T> {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Self;
}

/// 模型文件的来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelLocation {
  /// 已由下载程序放在模型目录中
  Provisioned(PathBuf),
  /// 当前目录下找到的文件
  WorkingDirectory(PathBuf),
  /// 都不存在，加载前需要先下载到该路径
  Default(PathBuf),
}

impl ModelLocation {
  pub fn path(&self) -> &Path {
    match self {
      ModelLocation::Provisioned(path)
      | ModelLocation::WorkingDirectory(path)
      | ModelLocation::Default(path) => path,
    }
  }

  pub fn needs_provision(&self) -> bool {
    matches!(self, ModelLocation::Default(_))
  }
}

/// 依次查找 `<model_dir>/<name>`、`<working_dir>/<name>`，都不存在时返回默认路径
pub fn resolve_model_location(model_dir: &Path, name: &str, working_dir: &Path) -> ModelLocation {
  let provisioned = model_dir.join(name);
  if provisioned.is_file() {
    info!("找到已下载的模型: {}", provisioned.display());
    return ModelLocation::Provisioned(provisioned);
  }

  let local = working_dir.join(name);
  if local.is_file() {
    info!("在当前目录找到模型: {}", local.display());
    return ModelLocation::WorkingDirectory(local);
  }

  info!("未找到模型文件，加载时将自动下载到 {}", provisioned.display());
  ModelLocation::Default(provisioned)
}

mod coco;
pub use self::coco::{COCO_CLASSES, CocoLabel};

mod yolov8;
pub use self::yolov8::{Yolov8, Yolov8Builder, Yolov8Error, decode_output};

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;

  #[test]
  fn prefers_model_directory() {
    let dir = tempfile::tempdir().unwrap();
    let models = dir.path().join("models");
    fs::create_dir_all(&models).unwrap();
    fs::write(models.join("m.onnx"), b"a").unwrap();
    fs::write(dir.path().join("m.onnx"), b"b").unwrap();

    let location = resolve_model_location(&models, "m.onnx", dir.path());
    assert_eq!(location, ModelLocation::Provisioned(models.join("m.onnx")));
    assert!(!location.needs_provision());
  }

  #[test]
  fn falls_back_to_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    let models = dir.path().join("models");
    fs::write(dir.path().join("m.onnx"), b"b").unwrap();

    let location = resolve_model_location(&models, "m.onnx", dir.path());
    assert_eq!(
      location,
      ModelLocation::WorkingDirectory(dir.path().join("m.onnx"))
    );
  }

  #[test]
  fn missing_everywhere_defaults_to_model_directory() {
    let dir = tempfile::tempdir().unwrap();
    let models = dir.path().join("models");

    let location = resolve_model_location(&models, "m.onnx", dir.path());
    assert!(location.needs_provision());
    assert_eq!(location.path(), models.join("m.onnx"));
    // 解析过程不创建目录
    assert!(!models.exists());
  }
}
