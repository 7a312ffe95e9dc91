// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input.rs - 视频输入
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

use crate::frame::RgbFrame;

/// 逐帧读取的视频源
///
/// 读取失败表示流结束。`release` 可以重复调用。
pub trait FrameSource {
  type Error: std::error::Error + Send + Sync + 'static;

  fn read_frame(&mut self) -> Result<RgbFrame, Self::Error>;
  fn release(&mut self);
  fn is_released(&self) -> bool;
}

pub mod pixel;

#[cfg(feature = "v4l_input")]
mod v4l_camera;
#[cfg(feature = "v4l_input")]
pub use self::v4l_camera::{V4lCamera, V4lInputError};
