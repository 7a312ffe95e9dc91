// 该文件是 Qianli （千里眼） 项目的一部分。
// src/bin/webcam_detection.rs - 摄像头实时目标检测
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use url::Url;

use qianli::{
  DEFAULT_MODEL_DIR, DEFAULT_MODEL_NAME, DEFAULT_MODEL_URL, WINDOW_TITLE,
  input::V4lCamera,
  model::{CocoLabel, Yolov8Builder, Yolov8Error, resolve_model_location},
  output::{GStreamerWindow, draw::Draw},
  provision::{ModelArtifact, recovery_instructions},
  task::{LiveDetectionTask, Task, Viewer, install_interrupt_handler},
};

// 仅用于给显示缓冲区打时间戳
const DISPLAY_FPS: u32 = 30;

/// Qianli 摄像头实时检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型目录
  #[arg(long, value_name = "DIR", default_value = DEFAULT_MODEL_DIR)]
  pub model_dir: PathBuf,
  /// 模型文件名
  #[arg(long, value_name = "FILE", default_value = DEFAULT_MODEL_NAME)]
  pub model_name: String,
  /// 模型不存在时的下载地址
  #[arg(long, value_name = "URL", default_value = DEFAULT_MODEL_URL)]
  pub url: Url,
  /// 摄像头编号（/dev/videoN）
  #[arg(long, value_name = "INDEX", default_value_t = 0)]
  pub camera: usize,
  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD", default_value_t = 0.25)]
  pub confidence: f32,
  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD", default_value_t = 0.45)]
  pub iou: f32,
  /// 标签字体文件，缺省时使用内置字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
  /// 最大处理帧数，缺省时不限制
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<u64>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();
  let args = Args::parse();

  println!("Qianli 实时目标检测");
  println!("==================");

  let working_dir = std::env::current_dir().context("无法获取当前目录")?;
  let location = resolve_model_location(&args.model_dir, &args.model_name, &working_dir);
  println!("模型文件: {}", location.path().display());

  println!("正在加载模型...");
  let model = match Yolov8Builder::from_location(&location, args.url.clone())
    .confidence(args.confidence)
    .iou_threshold(args.iou)
    .build::<CocoLabel>()
  {
    Ok(model) => model,
    Err(Yolov8Error::ProvisionError(e)) => {
      error!("下载模型失败: {}", e);
      let artifact = ModelArtifact::new(args.url, location.path());
      eprintln!("{}", recovery_instructions(&artifact));
      return Err(e.into());
    }
    Err(e) => return Err(e).context("模型加载失败"),
  };
  println!("模型加载完成");

  println!("正在打开摄像头...");
  let camera = V4lCamera::open(args.camera).context("无法打开摄像头")?;
  println!(
    "摄像头已打开: {} {}x{}",
    camera.device_path(),
    camera.width(),
    camera.height()
  );

  let draw = match &args.font {
    Some(path) => Draw::new()?.with_font_file(path)?,
    None => Draw::new()?,
  };
  let display = GStreamerWindow::open(WINDOW_TITLE, DISPLAY_FPS)?;

  let mut task = LiveDetectionTask::default().with_max_frames(args.max_frames);
  match install_interrupt_handler() {
    Ok(stop) => task = task.with_stop_signal(stop),
    Err(e) => warn!("{}", e),
  }

  let summary = task.run_task(camera, model, Viewer { render: draw, display })?;
  info!(
    "共处理 {} 帧，失败 {} 帧，退出原因: {:?}",
    summary.frames, summary.failed_frames, summary.exit
  );

  println!("程序结束");
  Ok(())
}
