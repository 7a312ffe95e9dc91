// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 ONNX 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  marker::PhantomData,
  path::{Path, PathBuf},
};

use image::{
  RgbImage,
  imageops::{self, FilterType},
};
use ndarray::{ArrayView2, s};
use ort::{session::Session, value::Tensor};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  frame::RgbFrame,
  model::{DetectItem, DetectResult, Model, ModelLocation, WithLabel},
  provision::{ConsoleProgress, HttpFetch, ModelArtifact, ProvisionError, Provisioner},
};

const YOLOV8_INPUT_SIZE: u32 = 640;
const YOLOV8_BOX_ROWS: usize = 4;
const YOLOV8_DEFAULT_CONFIDENCE: f32 = 0.25;
const YOLOV8_DEFAULT_IOU: f32 = 0.45;
const YOLOV8_DEFAULT_THREADS: usize = 4;

#[derive(Error, Debug)]
pub enum Yolov8Error {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型下载失败: {0}")]
  ProvisionError(#[from] ProvisionError),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型输出形状无效: {0:?}")]
  InvalidOutputShape(Vec<usize>),
}

fn ort_error(e: impl std::fmt::Display) -> Yolov8Error {
  Yolov8Error::OrtError(e.to_string())
}

pub struct Yolov8<T> {
  session: Session,
  confidence: f32,
  iou_threshold: f32,
  _phantom: PhantomData<T>,
}

pub struct Yolov8Builder {
  model_path: PathBuf,
  source: Option<Url>,
  confidence: f32,
  iou_threshold: f32,
  intra_threads: usize,
}

impl Yolov8Builder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Yolov8Builder {
      model_path: model_path.into(),
      source: None,
      confidence: YOLOV8_DEFAULT_CONFIDENCE,
      iou_threshold: YOLOV8_DEFAULT_IOU,
      intra_threads: YOLOV8_DEFAULT_THREADS,
    }
  }

  /// 默认路径上的模型在 `build` 时从 `source` 下载
  pub fn from_location(location: &ModelLocation, source: Url) -> Self {
    let builder = Self::new(location.path());
    if location.needs_provision() {
      builder.provision_from(source)
    } else {
      builder
    }
  }

  pub fn provision_from(mut self, source: Url) -> Self {
    self.source = Some(source);
    self
  }

  pub fn confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn iou_threshold(mut self, iou_threshold: f32) -> Self {
    self.iou_threshold = iou_threshold;
    self
  }

  pub fn intra_threads(mut self, intra_threads: usize) -> Self {
    self.intra_threads = intra_threads.max(1);
    self
  }

  pub fn model_path(&self) -> &Path {
    &self.model_path
  }

  pub fn build<T: WithLabel>(self) -> Result<Yolov8<T>, Yolov8Error> {
    if !self.model_path.exists() {
      let Some(source) = self.source else {
        return Err(Yolov8Error::ModelPathError(format!(
          "模型文件不存在: {}",
          self.model_path.display()
        )));
      };
      info!("模型文件不存在，开始下载: {}", source);
      let artifact = ModelArtifact::new(source, &self.model_path);
      Provisioner::new(HttpFetch::default(), ConsoleProgress::stderr()).provision(&artifact)?;
    }

    info!("加载模型文件: {}", self.model_path.display());
    let size = std::fs::metadata(&self.model_path)?.len();
    debug!("模型文件大小: {:.2} MB", size as f64 / (1024.0 * 1024.0));

    let session = Session::builder()
      .map_err(ort_error)?
      .with_intra_threads(self.intra_threads)
      .map_err(ort_error)?
      .commit_from_file(&self.model_path)
      .map_err(ort_error)?;
    info!("模型加载完成");

    Ok(Yolov8 {
      session,
      confidence: self.confidence,
      iou_threshold: self.iou_threshold,
      _phantom: PhantomData,
    })
  }
}

impl<T: WithLabel> Model for Yolov8<T> {
  type Input = RgbFrame;
  type Output = DetectResult<T>;
  type Error = Yolov8Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("预处理第 {} 帧", input.index());
    let size = YOLOV8_INPUT_SIZE as i64;
    let tensor = Tensor::from_array((vec![1i64, 3, size, size], preprocess(input.image())))
      .map_err(ort_error)?;

    debug!("执行模型推理");
    let outputs = self
      .session
      .run(ort::inputs![tensor])
      .map_err(ort_error)?;
    let (shape, data) = outputs[0]
      .try_extract_tensor::<f32>()
      .map_err(ort_error)?;

    // 期望输出为 [1, 4 + 类别数, 锚点数]
    let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
    if dims.len() != 3 || dims[0] != 1 || dims[1] <= YOLOV8_BOX_ROWS {
      return Err(Yolov8Error::InvalidOutputShape(dims));
    }
    let view = ArrayView2::from_shape((dims[1], dims[2]), data)
      .map_err(|_| Yolov8Error::InvalidOutputShape(dims.clone()))?;

    let items = decode_output(view, self.confidence, self.iou_threshold);
    debug!("检测到 {} 个物体", items.len());

    Ok(DetectResult {
      items: items.into_boxed_slice(),
    })
  }
}

/// 拉伸到 640x640，转为 CHW 排列并归一化到 [0, 1]
fn preprocess(image: &RgbImage) -> Vec<f32> {
  let resized = imageops::resize(
    image,
    YOLOV8_INPUT_SIZE,
    YOLOV8_INPUT_SIZE,
    FilterType::Triangle,
  );
  let plane = (YOLOV8_INPUT_SIZE * YOLOV8_INPUT_SIZE) as usize;
  let mut data = vec![0f32; plane * 3];
  for (idx, pixel) in resized.pixels().enumerate() {
    data[idx] = pixel[0] as f32 / 255.0;
    data[plane + idx] = pixel[1] as f32 / 255.0;
    data[2 * plane + idx] = pixel[2] as f32 / 255.0;
  }
  data
}

/// 解码 `[4 + 类别数, 锚点数]` 的输出
///
/// 每个锚点取得分最高的类别，低于 `confidence` 的丢弃，
/// 框坐标由 640 像素空间的 (cx, cy, w, h) 转为归一化的角点，再做按类别的 NMS。
pub fn decode_output<T: WithLabel>(
  output: ArrayView2<'_, f32>,
  confidence: f32,
  iou_threshold: f32,
) -> Vec<DetectItem<T>> {
  let (rows, anchors) = output.dim();
  if rows <= YOLOV8_BOX_ROWS {
    return Vec::new();
  }

  let scale = YOLOV8_INPUT_SIZE as f32;
  let mut candidates = Vec::new();
  for i in 0..anchors {
    let column = output.column(i);
    let (class_id, score) = column
      .slice(s![YOLOV8_BOX_ROWS..])
      .iter()
      .copied()
      .enumerate()
      .fold((0usize, f32::MIN), |best, (c, score)| {
        if score > best.1 { (c, score) } else { best }
      });

    if score <= confidence {
      continue;
    }

    let (cx, cy, w, h) = (column[0], column[1], column[2], column[3]);
    candidates.push(DetectItem {
      kind: T::from_label_id(class_id as u32),
      score,
      bbox: [
        ((cx - w / 2.0) / scale).clamp(0.0, 1.0),
        ((cy - h / 2.0) / scale).clamp(0.0, 1.0),
        ((cx + w / 2.0) / scale).clamp(0.0, 1.0),
        ((cy + h / 2.0) / scale).clamp(0.0, 1.0),
      ],
    });
  }

  non_max_suppression(candidates, iou_threshold)
}

fn non_max_suppression<T: WithLabel>(
  mut candidates: Vec<DetectItem<T>>,
  iou_threshold: f32,
) -> Vec<DetectItem<T>> {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<DetectItem<T>> = Vec::new();
  for candidate in candidates {
    let suppressed = kept.iter().any(|k| {
      k.kind.to_label_id() == candidate.kind.to_label_id()
        && iou(&k.bbox, &candidate.bbox) > iou_threshold
    });
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = ix * iy;
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - inter;
  if union > 0.0 { inter / union } else { 0.0 }
}
