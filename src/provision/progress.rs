// 该文件是 Qianli （千里眼） 项目的一部分。
// src/provision/progress.rs - 下载进度显示
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

use std::{
  io::{self, Write},
  time::{Duration, Instant},
};

const BAR_WIDTH: usize = 30;
const REDRAW_INTERVAL: Duration = Duration::from_millis(100);
const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

pub trait Progress {
  /// `total` 为 `None` 时进度条不设上限
  fn start(&mut self, label: &str, total: Option<u64>);
  fn advance(&mut self, bytes: u64);
  fn finish(&mut self);
}

/// 终端进度条，形如 `models/x.onnx:  50%|███     | 1.00KiB/2.00KiB [512.00KiB/s]`
pub struct ConsoleProgress<W: Write> {
  out: W,
  label: String,
  total: Option<u64>,
  position: u64,
  started: Option<Instant>,
  last_draw: Option<Instant>,
}

impl ConsoleProgress<io::Stderr> {
  pub fn stderr() -> Self {
    Self::new(io::stderr())
  }
}

impl<W: Write> ConsoleProgress<W> {
  pub fn new(out: W) -> Self {
    Self {
      out,
      label: String::new(),
      total: None,
      position: 0,
      started: None,
      last_draw: None,
    }
  }

  pub fn position(&self) -> u64 {
    self.position
  }

  pub fn total(&self) -> Option<u64> {
    self.total
  }

  pub fn into_inner(self) -> W {
    self.out
  }

  fn draw(&mut self, now: Instant) {
    let elapsed = self
      .started
      .map(|s| now.saturating_duration_since(s))
      .unwrap_or_default();
    let line = render_line(&self.label, self.position, self.total, elapsed);
    // 进度条只是提示，写终端失败不影响下载
    let _ = write!(self.out, "\r{}", line);
    let _ = self.out.flush();
    self.last_draw = Some(now);
  }
}

impl<W: Write> Progress for ConsoleProgress<W> {
  fn start(&mut self, label: &str, total: Option<u64>) {
    let now = Instant::now();
    self.label = label.to_string();
    self.total = total;
    self.position = 0;
    self.started = Some(now);
    self.draw(now);
  }

  fn advance(&mut self, bytes: u64) {
    self.position += bytes;
    let now = Instant::now();
    let due = self
      .last_draw
      .map(|last| now.saturating_duration_since(last) >= REDRAW_INTERVAL)
      .unwrap_or(true);
    if due {
      self.draw(now);
    }
  }

  fn finish(&mut self) {
    self.draw(Instant::now());
    let _ = writeln!(self.out);
    let _ = self.out.flush();
  }
}

fn render_line(label: &str, position: u64, total: Option<u64>, elapsed: Duration) -> String {
  let secs = elapsed.as_secs_f64();
  let rate = if secs > 0.0 {
    format_bytes((position as f64 / secs) as u64)
  } else {
    "?".to_string()
  };

  match total {
    Some(total) if total > 0 => {
      let ratio = (position as f64 / total as f64).min(1.0);
      let filled = (ratio * BAR_WIDTH as f64).round() as usize;
      format!(
        "{}: {:>3}%|{}{}| {}/{} [{}/s]",
        label,
        (ratio * 100.0).floor() as u32,
        "█".repeat(filled),
        " ".repeat(BAR_WIDTH - filled),
        format_bytes(position),
        format_bytes(total),
        rate
      )
    }
    _ => format!("{}: {} [{}/s]", label, format_bytes(position), rate),
  }
}

pub(crate) fn format_bytes(bytes: u64) -> String {
  if bytes < 1024 {
    return format!("{}B", bytes);
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit + 1 < UNITS.len() {
    value /= 1024.0;
    unit += 1;
  }
  format!("{:.2}{}", value, UNITS[unit])
}
