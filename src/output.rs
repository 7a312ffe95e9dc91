// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::time::Duration;

use image::RgbImage;

/// 把推理结果画到帧上，得到要显示的图像
pub trait Render<Frame, Output> {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<RgbImage, Self::Error>;
}

/// 在图像上叠加帧率
pub trait FpsOverlay {
  fn overlay_fps(&self, image: &mut RgbImage, fps: f64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayEvent {
  Key(char),
  Closed,
}

/// 显示窗口
pub trait Display {
  type Error: std::error::Error + Send + Sync + 'static;

  fn show(&mut self, image: &RgbImage) -> Result<(), Self::Error>;
  /// 最多等待 `timeout`，没有事件时返回 `None`
  fn poll_event(&mut self, timeout: Duration) -> Result<Option<DisplayEvent>, Self::Error>;
  fn close(&mut self);
}

pub mod draw;

#[cfg(feature = "gstreamer_output")]
mod gstreamer_window;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_window::{GStreamerWindow, GStreamerWindowError};
