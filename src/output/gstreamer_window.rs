// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output/gstreamer_window.rs - GStreamer 显示窗口
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 显示窗口
//!
//! 通过 `appsrc ! videoconvert ! autovideosink` 把 RGB 帧显示到屏幕上。
//!
//! 窗口里的按键由视频 sink 以导航消息（`GstNavigationMessage`）的形式发到管道总线上，
//! [`GStreamerWindow::poll_event`] 从总线上取出按键；关闭窗口时 sink 会报
//! `ResourceError::NotFound`，按窗口关闭处理。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev gstreamer1.0-x
//! ```

use std::time::Duration;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::output::{Display, DisplayEvent};

const WINDOW_PIPELINE: &str =
  "appsrc name=src is-live=true format=time ! videoconvert ! autovideosink sync=false";
const NAVIGATION_MESSAGE: &str = "GstNavigationMessage";

/// GStreamer 显示窗口错误类型
#[derive(Error, Debug)]
pub enum GStreamerWindowError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 无法转换元素为 appsrc
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 缓冲区创建错误
  #[error("Buffer creation error")]
  BufferCreationError,
  /// 窗口已关闭
  #[error("Window already closed")]
  Closed,
}

pub struct GStreamerWindow {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  bus: gst::Bus,
  fps: u32,
  frame_count: u64,
  info: Option<gst_video::VideoInfo>,
  closed: bool,
}

impl GStreamerWindow {
  /// 打开标题为 `title` 的窗口，`fps` 只用于给缓冲区打时间戳
  pub fn open(title: &str, fps: u32) -> Result<Self, GStreamerWindowError> {
    // Initialize GStreamer (subsequent calls are safe no-ops)
    gst::init()?;
    // ximagesink/xvimagesink 没有标题标签时用应用名作窗口标题
    gst::glib::set_application_name(title);

    info!("Creating display pipeline: {}", WINDOW_PIPELINE);
    let pipeline = gst::parse::launch(WINDOW_PIPELINE)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerWindowError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerWindowError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerWindowError::AppSrcConversionFailed)?;
    appsrc.set_format(gst::Format::Time);

    let bus = pipeline
      .bus()
      .ok_or_else(|| GStreamerWindowError::PipelineError("Pipeline has no bus".to_string()))?;

    pipeline.set_state(gst::State::Playing)?;
    info!("显示窗口已打开: {}", title);

    Ok(GStreamerWindow {
      pipeline,
      appsrc,
      bus,
      fps: fps.max(1),
      frame_count: 0,
      info: None,
      closed: false,
    })
  }

  /// 首帧或分辨率变化时更新 appsrc 的 caps
  fn video_info(&mut self, width: u32, height: u32) -> Result<gst_video::VideoInfo, GStreamerWindowError> {
    if let Some(info) = &self.info
      && info.width() == width
      && info.height() == height
    {
      return Ok(info.clone());
    }

    let info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, width, height)
      .fps(gst::Fraction::new(self.fps as i32, 1))
      .build()?;
    self.appsrc.set_caps(Some(&info.to_caps()?));
    info!("显示分辨率: {}x{}", width, height);
    self.info = Some(info.clone());
    Ok(info)
  }

  fn handle_message(&self, msg: &gst::Message) -> Result<Option<DisplayEvent>, GStreamerWindowError> {
    use gst::MessageView;

    match msg.view() {
      MessageView::Element(element) => Ok(
        element
          .structure()
          .and_then(navigation_key)
          .map(DisplayEvent::Key),
      ),
      MessageView::Eos(..) => Ok(Some(DisplayEvent::Closed)),
      MessageView::Error(err) => {
        if err.error().matches(gst::ResourceError::NotFound) {
          info!("显示窗口已被关闭");
          Ok(Some(DisplayEvent::Closed))
        } else {
          Err(GStreamerWindowError::PipelineError(format!(
            "{} ({:?})",
            err.error(),
            err.debug()
          )))
        }
      }
      _ => Ok(None),
    }
  }
}

/// 从导航消息里取出按下的单字符按键
fn navigation_key(structure: &gst::StructureRef) -> Option<char> {
  if !structure.has_name(NAVIGATION_MESSAGE) {
    return None;
  }
  let event = structure.get::<gst::Event>("event").ok()?;
  let nav = event.structure()?;
  if nav.get::<&str>("event").ok()? != "key-press" {
    return None;
  }

  let key = nav.get::<&str>("key").ok()?;
  debug!("按键: {}", key);
  let mut chars = key.chars();
  let c = chars.next()?;
  if chars.next().is_some() {
    return None;
  }
  Some(c)
}

impl Display for GStreamerWindow {
  type Error = GStreamerWindowError;

  fn show(&mut self, image: &RgbImage) -> Result<(), Self::Error> {
    if self.closed {
      return Err(GStreamerWindowError::Closed);
    }

    let (width, height) = image.dimensions();
    let info = self.video_info(width, height)?;
    let stride = info.stride()[0] as usize;
    let row = width as usize * 3;
    let raw = image.as_raw();

    let mut buffer =
      gst::Buffer::with_size(info.size()).map_err(|_| GStreamerWindowError::BufferCreationError)?;
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerWindowError::BufferCreationError)?;

      let timestamp = self.frame_count * 1_000_000_000 / self.fps as u64;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(timestamp));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(
        1_000_000_000 / self.fps as u64,
      ));

      let mut map = buffer_ref.map_writable().map_err(|_| {
        GStreamerWindowError::PipelineError("Failed to map buffer".to_string())
      })?;
      if stride == row {
        map[..raw.len()].copy_from_slice(raw);
      } else {
        // RGB 行跨度按 4 字节对齐，逐行拷贝
        for (y, src) in raw.chunks_exact(row).enumerate() {
          map[y * stride..y * stride + row].copy_from_slice(src);
        }
      }
    }
    self.frame_count += 1;

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerWindowError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;

    Ok(())
  }

  fn poll_event(&mut self, timeout: Duration) -> Result<Option<DisplayEvent>, Self::Error> {
    const TYPES: [gst::MessageType; 3] = [
      gst::MessageType::Element,
      gst::MessageType::Eos,
      gst::MessageType::Error,
    ];

    // 第一条消息最多等 timeout，其余已排队的消息立即取完
    let mut wait = gst::ClockTime::from_nseconds(timeout.as_nanos() as u64);
    while let Some(msg) = self.bus.timed_pop_filtered(wait, &TYPES) {
      wait = gst::ClockTime::ZERO;
      if let Some(event) = self.handle_message(&msg)? {
        return Ok(Some(event));
      }
    }
    Ok(None)
  }

  fn close(&mut self) {
    if self.closed {
      return;
    }
    self.closed = true;
    let _ = self.appsrc.end_of_stream();
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop display pipeline: {}", e);
    }
    info!("显示窗口已关闭，共显示 {} 帧", self.frame_count);
  }
}

impl Drop for GStreamerWindow {
  fn drop(&mut self) {
    self.close();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn navigation_message(event: &str, key: &str) -> gst::Structure {
    let nav = gst::Structure::builder("application/x-gst-navigation")
      .field("event", event)
      .field("key", key)
      .build();
    gst::Structure::builder(NAVIGATION_MESSAGE)
      .field("event", gst::event::Navigation::new(nav))
      .build()
  }

  #[test]
  fn key_press_is_extracted() {
    gst::init().unwrap();
    assert_eq!(navigation_key(&navigation_message("key-press", "q")), Some('q'));
  }

  #[test]
  fn other_navigation_events_are_ignored() {
    gst::init().unwrap();
    assert_eq!(navigation_key(&navigation_message("key-release", "q")), None);
    assert_eq!(navigation_key(&navigation_message("key-press", "Escape")), None);

    let unrelated = gst::Structure::builder("prepare-window-handle").build();
    assert_eq!(navigation_key(&unrelated), None);
  }
}
