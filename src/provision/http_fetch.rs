// 该文件是 Qianli （千里眼） 项目的一部分。
// src/provision/http_fetch.rs - HTTP 下载源
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

use std::{io::Read, time::Duration};

use tracing::debug;
use url::Url;

use super::{Fetch, FetchResponse, ProvisionError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// 基于 ureq 的阻塞式 HTTP GET，不做重试
pub struct HttpFetch {
  agent: ureq::Agent,
}

impl Default for HttpFetch {
  fn default() -> Self {
    let agent = ureq::AgentBuilder::new()
      .timeout_connect(CONNECT_TIMEOUT)
      .build();
    Self { agent }
  }
}

impl Fetch for HttpFetch {
  type Body = Box<dyn Read + Send + Sync + 'static>;

  fn fetch(&self, url: &Url) -> Result<FetchResponse<Self::Body>, ProvisionError> {
    debug!("GET {}", url);
    let response = self
      .agent
      .get(url.as_str())
      .call()
      .map_err(|e| ProvisionError::Http(e.to_string()))?;

    debug!("响应状态: {} {}", response.status(), response.status_text());
    let content_length = response
      .header("Content-Length")
      .and_then(|v| v.trim().parse::<u64>().ok());

    Ok(FetchResponse {
      content_length,
      body: response.into_reader(),
    })
  }
}
