// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use crate::{
  frame::RgbFrame,
  model::{DetectItem, DetectResult, WithLabel},
  output::{FpsOverlay, Render},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_PADDING: i32 = 2;
const LABEL_TEXT_COLOR: [u8; 3] = [255, 255, 255];
const BOX_THICKNESS: i32 = 2;
const FPS_FONT_SIZE: f32 = 32.0;
// 文字基线位置
const FPS_BASELINE: (i32, i32) = (20, 70);
const FPS_COLOR: [u8; 3] = [0, 255, 0];

// 按类别编号循环取色
const PALETTE: [[u8; 3]; 20] = [
  [0xFF, 0x38, 0x38],
  [0xFF, 0x9D, 0x97],
  [0xFF, 0x70, 0x1F],
  [0xFF, 0xB2, 0x1D],
  [0xCF, 0xD2, 0x31],
  [0x48, 0xF9, 0x0A],
  [0x92, 0xCC, 0x17],
  [0x3D, 0xDB, 0x86],
  [0x1A, 0x93, 0x34],
  [0x00, 0xD4, 0xBB],
  [0x2C, 0x99, 0xA8],
  [0x00, 0xC2, 0xFF],
  [0x34, 0x45, 0x93],
  [0x64, 0x73, 0xFF],
  [0x00, 0x18, 0xEC],
  [0x84, 0x38, 0xFF],
  [0x52, 0x00, 0x85],
  [0xCB, 0x38, 0xFF],
  [0xFF, 0x95, 0xC8],
  [0xFF, 0x37, 0xC7],
];

// 内置字体（DejaVu Sans）
const DEFAULT_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(String),
  #[error("帧为空，无法绘制")]
  EmptyFrame,
}

/// 绘制检测框、类别标签和帧率
///
/// 默认使用内置字体，可用 [`Draw::with_font_file`] 替换。
pub struct Draw {
  font: FontArc,
  label_font_size: f32,
  fps_font_size: f32,
}

impl Draw {
  pub fn new() -> Result<Self, DrawError> {
    let font =
      FontArc::try_from_slice(DEFAULT_FONT).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    Ok(Self {
      font,
      label_font_size: LABEL_FONT_SIZE,
      fps_font_size: FPS_FONT_SIZE,
    })
  }

  pub fn with_font_file(mut self, path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    self.font = FontArc::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    info!("已加载字体: {}", path.display());
    Ok(self)
  }

  pub fn draw_detections_on_image<T: WithLabel>(&self, image: &mut RgbImage, result: &DetectResult<T>) {
    for item in result.items.iter() {
      self.draw_bbox_with_label(image, item);
    }
  }

  // bbox 为归一化坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label<T: WithLabel>(&self, image: &mut RgbImage, item: &DetectItem<T>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = ((item.bbox[0] * w as f32).floor() as i32).clamp(0, w - 1);
    let y_min = ((item.bbox[1] * h as f32).floor() as i32).clamp(0, h - 1);
    let x_max = ((item.bbox[2] * w as f32).ceil() as i32).clamp(0, w - 1);
    let y_max = ((item.bbox[3] * h as f32).ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(color_for(item.kind.to_label_id()));
    for t in 0..BOX_THICKNESS {
      let (x0, y0, x1, y1) = (x_min + t, y_min + t, x_max - t, y_max - t);
      if x1 <= x0 || y1 <= y0 {
        break;
      }
      let rect = Rect::at(x0, y0).of_size((x1 - x0 + 1) as u32, (y1 - y0 + 1) as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let font = &self.font;
    let label = format!("{} {:.2}", item.kind.to_label_str(), item.score);
    let scale = PxScale::from(self.label_font_size);
    let (text_w, text_h) = text_size(scale, font, &label);

    // 标签放在框上方，放不下时放进框内
    let tag_h = text_h as i32 + 2 * LABEL_PADDING;
    let tag_w = (text_w as i32 + 2 * LABEL_PADDING).min(w - x_min);
    let label_y = if y_min >= tag_h { y_min - tag_h } else { y_min };
    if tag_w <= 0 || tag_h <= 0 {
      return;
    }

    let rect = Rect::at(x_min, label_y).of_size(tag_w as u32, tag_h as u32);
    draw_filled_rect_mut(image, rect, color);
    draw_text_mut(
      image,
      Rgb(LABEL_TEXT_COLOR),
      x_min + LABEL_PADDING,
      label_y + LABEL_PADDING,
      scale,
      font,
      &label,
    );
  }
}

fn color_for(class_id: u32) -> [u8; 3] {
  PALETTE[class_id as usize % PALETTE.len()]
}

impl<T: WithLabel> Render<RgbFrame, DetectResult<T>> for Draw {
  type Error = DrawError;

  fn render_result(&self, frame: &RgbFrame, result: &DetectResult<T>) -> Result<RgbImage, Self::Error> {
    if frame.width() == 0 || frame.height() == 0 {
      return Err(DrawError::EmptyFrame);
    }
    let mut image = frame.image().clone();
    self.draw_detections_on_image(&mut image, result);
    Ok(image)
  }
}

impl FpsOverlay for Draw {
  fn overlay_fps(&self, image: &mut RgbImage, fps: f64) {
    // 非有限值按 0 处理
    let fps = if fps.is_finite() { fps.max(0.0) as u32 } else { 0 };
    draw_text_mut(
      image,
      Rgb(FPS_COLOR),
      FPS_BASELINE.0,
      FPS_BASELINE.1 - self.fps_font_size as i32,
      PxScale::from(self.fps_font_size),
      &self.font,
      &format!("FPS: {}", fps),
    );
  }
}
