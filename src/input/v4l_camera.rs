// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input/v4l_camera.rs - V4L 摄像头输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use tracing::{debug, info, warn};
use v4l::{
  Device, FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  video::Capture,
};

use crate::{
  frame::RgbFrame,
  input::{
    FrameSource,
    pixel::{PixelError, PixelFormat},
  },
};

const BUFFER_COUNT: u32 = 4;

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("无法打开摄像头 {path}: {reason}")]
  DeviceOpen { path: String, reason: String },
  #[error("V4L error: {0}")]
  V4lError(String),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),
  #[error("帧解码失败: {0}")]
  Decode(#[from] PixelError),
  #[error("摄像头已释放")]
  Released,
}

/// 通过 V4L2 内存映射读取 `/dev/videoN` 的摄像头
pub struct V4lCamera {
  device_path: String,
  width: u32,
  height: u32,
  format: PixelFormat,
  // stream 必须先于 device 释放
  stream: Option<Stream<'static>>,
  device: Option<Device>,
  next_index: u64,
}

impl V4lCamera {
  /// 打开系统第 `index` 个摄像头
  pub fn open(index: usize) -> Result<Self, V4lInputError> {
    Self::with_path(format!("/dev/video{}", index))
  }

  pub fn with_path(device_path: impl Into<String>) -> Result<Self, V4lInputError> {
    let device_path = device_path.into();
    let device = Device::with_path(&device_path).map_err(|e| V4lInputError::DeviceOpen {
      path: device_path.clone(),
      reason: e.to_string(),
    })?;

    let (format, width, height) = negotiate_format(&device)?;

    let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT).map_err(|e| {
      V4lInputError::DeviceOpen {
        path: device_path.clone(),
        reason: e.to_string(),
      }
    })?;

    info!(
      "摄像头已打开: {} {}x{} [{}]",
      device_path,
      width,
      height,
      String::from_utf8_lossy(format.fourcc())
    );

    Ok(V4lCamera {
      device_path,
      width,
      height,
      format,
      stream: Some(stream),
      device: Some(device),
      next_index: 0,
    })
  }

  pub fn device_path(&self) -> &str {
    &self.device_path
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }
}

/// 优先沿用设备当前格式，不支持时依次尝试 MJPG、YUYV、RGB3
fn negotiate_format(device: &Device) -> Result<(PixelFormat, u32, u32), V4lInputError> {
  let current = device
    .format()
    .map_err(|e| V4lInputError::V4lError(e.to_string()))?;

  if let Ok(format) = PixelFormat::from_fourcc(&current.fourcc.repr) {
    return Ok((format, current.width, current.height));
  }
  debug!(
    "设备当前格式 {} 不受支持，尝试切换",
    String::from_utf8_lossy(&current.fourcc.repr)
  );

  for candidate in PixelFormat::PREFERRED {
    let mut wanted = current.clone();
    wanted.fourcc = FourCC::new(candidate.fourcc());
    match device.set_format(&wanted) {
      Ok(actual) if actual.fourcc.repr == *candidate.fourcc() => {
        return Ok((candidate, actual.width, actual.height));
      }
      Ok(_) => continue,
      Err(e) => debug!(
        "切换到 {} 失败: {}",
        String::from_utf8_lossy(candidate.fourcc()),
        e
      ),
    }
  }

  Err(V4lInputError::UnsupportedPixelFormat(
    String::from_utf8_lossy(&current.fourcc.repr).into_owned(),
  ))
}

impl FrameSource for V4lCamera {
  type Error = V4lInputError;

  fn read_frame(&mut self) -> Result<RgbFrame, Self::Error> {
    let stream = self.stream.as_mut().ok_or(V4lInputError::Released)?;
    let (buf, meta) = stream
      .next()
      .map_err(|e| V4lInputError::V4lError(e.to_string()))?;

    let used = (meta.bytesused as usize).min(buf.len());
    let data = if used > 0 { &buf[..used] } else { buf };
    let image = self.format.decode(data, self.width, self.height)?;

    let frame = RgbFrame::new(self.next_index, image);
    self.next_index += 1;
    Ok(frame)
  }

  fn release(&mut self) {
    if self.stream.is_none() && self.device.is_none() {
      return;
    }
    self.stream.take();
    self.device.take();
    info!("摄像头已释放: {}", self.device_path);
  }

  fn is_released(&self) -> bool {
    self.stream.is_none() && self.device.is_none()
  }
}

impl Drop for V4lCamera {
  fn drop(&mut self) {
    if !self.is_released() {
      warn!("摄像头未显式释放，在析构时释放");
      self.release();
    }
  }
}
