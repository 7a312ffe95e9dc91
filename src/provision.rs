// 该文件是 Qianli （千里眼） 项目的一部分。
// src/provision.rs - 模型文件准备
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

//! # 模型文件准备
//!
//! 确保 `models/<name>` 下存在完整的模型权重文件。文件已存在时不做任何事；
//! 否则从远程地址流式下载，边写盘边推进进度条。
//!
//! 下载先写入 `<name>.part`，完整写入后再改名，失败时删除临时文件，
//! 因此目标路径上不会留下半截文件。

use std::{
  fs::{self, File},
  io::{self, BufWriter, Read, Write},
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

mod http_fetch;
mod progress;

pub use self::http_fetch::HttpFetch;
pub use self::progress::{ConsoleProgress, Progress};

/// 每次读取并写盘的块大小（字节）
pub const BLOCK_SIZE: usize = 1024;

const PARTIAL_SUFFIX: &str = ".part";

#[derive(Error, Debug)]
pub enum ProvisionError {
  #[error("网络请求失败: {0}")]
  Http(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] io::Error),
  #[error("下载不完整: 期望 {expected} 字节, 实际 {actual} 字节")]
  Truncated { expected: u64, actual: u64 },
  #[error("目标路径无效: {0}")]
  InvalidDestination(String),
}

/// 模型文件：来源地址与本地路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
  pub url: Url,
  pub path: PathBuf,
}

impl ModelArtifact {
  pub fn new(url: Url, path: impl Into<PathBuf>) -> Self {
    Self {
      url,
      path: path.into(),
    }
  }

  pub fn exists(&self) -> bool {
    self.path.exists()
  }
}

/// 一次流式请求的响应
pub struct FetchResponse<R> {
  /// 响应头声明的长度，未知时为 `None`
  pub content_length: Option<u64>,
  pub body: R,
}

pub trait Fetch {
  type Body: Read;

  fn fetch(&self, url: &Url) -> Result<FetchResponse<Self::Body>, ProvisionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
  AlreadyPresent,
  Downloaded { bytes: u64 },
}

pub struct Provisioner<F, P> {
  fetch: F,
  progress: P,
  block_size: usize,
}

impl<F: Fetch, P: Progress> Provisioner<F, P> {
  pub fn new(fetch: F, progress: P) -> Self {
    Self {
      fetch,
      progress,
      block_size: BLOCK_SIZE,
    }
  }

  pub fn with_block_size(mut self, block_size: usize) -> Self {
    self.block_size = block_size.max(1);
    self
  }

  pub fn fetcher(&self) -> &F {
    &self.fetch
  }

  pub fn progress(&self) -> &P {
    &self.progress
  }

  pub fn provision(&mut self, artifact: &ModelArtifact) -> Result<ProvisionOutcome, ProvisionError> {
    ensure_parent_dir(&artifact.path)?;

    if artifact.exists() {
      info!("模型已存在: {}", artifact.path.display());
      return Ok(ProvisionOutcome::AlreadyPresent);
    }

    info!("正在从 {} 下载模型", artifact.url);
    let partial = partial_path(&artifact.path)?;

    match self.download(artifact, &partial) {
      Ok(bytes) => {
        fs::rename(&partial, &artifact.path)?;
        info!("模型已下载到: {} ({} 字节)", artifact.path.display(), bytes);
        Ok(ProvisionOutcome::Downloaded { bytes })
      }
      Err(e) => {
        if let Err(rm) = fs::remove_file(&partial)
          && rm.kind() != io::ErrorKind::NotFound
        {
          warn!("清理临时文件 {} 失败: {}", partial.display(), rm);
        }
        Err(e)
      }
    }
  }

  fn download(&mut self, artifact: &ModelArtifact, partial: &Path) -> Result<u64, ProvisionError> {
    let FetchResponse {
      content_length,
      mut body,
    } = self.fetch.fetch(&artifact.url)?;

    // 响应头里的 0 与缺失同样视为未知
    let total = content_length.filter(|&n| n > 0);
    match total {
      Some(n) => info!("文件大小: {:.2} MB", n as f64 / (1024.0 * 1024.0)),
      None => info!("文件大小未知"),
    }

    let mut file = BufWriter::new(File::create(partial)?);
    let mut buffer = vec![0u8; self.block_size];
    let mut written = 0u64;

    self
      .progress
      .start(&artifact.path.display().to_string(), total);
    let copied = loop {
      let n = match body.read(&mut buffer) {
        Ok(0) => break Ok(()),
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => break Err(e),
      };
      if let Err(e) = file.write_all(&buffer[..n]) {
        break Err(e);
      }
      written += n as u64;
      self.progress.advance(n as u64);
    };
    self.progress.finish();
    copied?;

    file.flush()?;
    file.get_ref().sync_all()?;

    if let Some(expected) = total
      && expected != written
    {
      return Err(ProvisionError::Truncated {
        expected,
        actual: written,
      });
    }

    Ok(written)
  }
}

/// 下载失败时给用户的手动处理说明
pub fn recovery_instructions(artifact: &ModelArtifact) -> String {
  format!(
    "如果下载失败，可以手动下载模型：\n  {}\n并保存到：{}\n\n下载完成后运行：webcam-detection",
    artifact.url,
    artifact.path.display()
  )
}

fn ensure_parent_dir(path: &Path) -> Result<(), ProvisionError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
    && !parent.exists()
  {
    fs::create_dir_all(parent)?;
    info!("已创建模型目录: {}", parent.display());
  }
  Ok(())
}

fn partial_path(path: &Path) -> Result<PathBuf, ProvisionError> {
  let name = path
    .file_name()
    .ok_or_else(|| ProvisionError::InvalidDestination(path.display().to_string()))?;
  let mut partial = name.to_os_string();
  partial.push(PARTIAL_SUFFIX);
  Ok(path.with_file_name(partial))
}
