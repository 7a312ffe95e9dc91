// 该文件是 Qianli （千里眼） 项目的一部分。
// src/bin/download_model.rs - 下载检测模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use tracing::error;
use url::Url;

use qianli::{
  DEFAULT_MODEL_URL, default_model_path,
  provision::{
    ConsoleProgress, HttpFetch, ModelArtifact, ProvisionOutcome, Provisioner, recovery_instructions,
  },
};

/// 下载 YOLOv8 模型到本地
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型下载地址
  #[arg(long, value_name = "URL", default_value = DEFAULT_MODEL_URL)]
  pub url: Url,
  /// 模型保存路径
  #[arg(long, value_name = "FILE", default_value_os_t = default_model_path())]
  pub output: PathBuf,
}

fn main() -> ExitCode {
  tracing_subscriber::fmt::init();
  let args = Args::parse();

  println!("Qianli 模型下载");
  println!("==============");
  println!("下载地址: {}", args.url);
  println!("保存路径: {}", args.output.display());
  println!();

  let artifact = ModelArtifact::new(args.url, args.output);
  let mut provisioner = Provisioner::new(HttpFetch::default(), ConsoleProgress::stderr());

  match provisioner.provision(&artifact) {
    Ok(ProvisionOutcome::AlreadyPresent) => {
      println!("模型已存在: {}", artifact.path.display());
      ExitCode::SUCCESS
    }
    Ok(ProvisionOutcome::Downloaded { bytes }) => {
      println!("下载完成，共 {} 字节: {}", bytes, artifact.path.display());
      ExitCode::SUCCESS
    }
    Err(e) => {
      error!("下载模型失败: {}", e);
      eprintln!("{}", recovery_instructions(&artifact));
      ExitCode::FAILURE
    }
  }
}
