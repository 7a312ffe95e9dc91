// 该文件是 Qianli （千里眼） 项目的一部分。
// src/fps.rs - 帧率估计
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

use std::time::{Duration, Instant};

const FPS_WINDOW: Duration = Duration::from_secs(1);

/// 按 1 秒窗口统计的帧率估计器
///
/// 每帧调用一次 [`FpsEstimator::tick`]。窗口满 1 秒时返回窗口平均帧率并重置计数，
/// 否则返回窗口内的瞬时估计。
#[derive(Debug, Clone)]
pub struct FpsEstimator {
  frame_count: u32,
  window_start: Instant,
}

impl Default for FpsEstimator {
  fn default() -> Self {
    Self::starting_at(Instant::now())
  }
}

impl FpsEstimator {
  pub fn starting_at(window_start: Instant) -> Self {
    Self {
      frame_count: 0,
      window_start,
    }
  }

  pub fn frame_count(&self) -> u32 {
    self.frame_count
  }

  pub fn window_start(&self) -> Instant {
    self.window_start
  }

  pub fn tick(&mut self) -> f64 {
    self.tick_at(Instant::now())
  }

  pub fn tick_at(&mut self, now: Instant) -> f64 {
    self.frame_count += 1;
    let elapsed = now.saturating_duration_since(self.window_start);

    if elapsed >= FPS_WINDOW {
      let fps = self.frame_count as f64 / elapsed.as_secs_f64();
      self.frame_count = 0;
      self.window_start = now;
      fps
    } else {
      instant_fps(self.frame_count, elapsed)
    }
  }
}

fn instant_fps(frame_count: u32, elapsed: Duration) -> f64 {
  let secs = elapsed.as_secs_f64();
  if secs > 0.0 {
    frame_count as f64 / secs
  } else {
    0.0
  }
}
