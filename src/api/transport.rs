//! Outbound seam to the backend.

use std::fmt;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::cache::QueryFilter;
use crate::config::ApiConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  fn as_reqwest(self) -> reqwest::Method {
    match self {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_reqwest().as_str())
  }
}

/// Request functions the data core talks to. Either resolves with the parsed
/// body (`Value::Null` for an empty one) or fails; retries are the caller's
/// business.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
  /// GET `path` with `query` as its query string.
  async fn fetch(&self, path: &str, query: &QueryFilter) -> Result<Value>;

  /// Send a write (or any other method) with an optional JSON body.
  async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value>;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: String,
}

impl HttpTransport {
  pub fn new(config: &ApiConfig, token: Option<String>) -> Result<Self> {
    let mut headers = HeaderMap::new();
    if let Some(token) = token {
      let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| Error::validation(format!("Invalid API token: {}", e)))?;
      headers.insert(AUTHORIZATION, value);
    }

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(config.timeout())
      .build()
      .map_err(|e| Error::Network {
        url: config.base_url.clone(),
        message: e.to_string(),
      })?;

    Ok(Self {
      client,
      base_url: config.base_url.trim_end_matches('/').to_string(),
    })
  }

  fn url(&self, path: &str, query: Option<&QueryFilter>) -> Result<Url> {
    let raw = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
    let mut url =
      Url::parse(&raw).map_err(|e| Error::validation(format!("Invalid URL {}: {}", raw, e)))?;
    if let Some(query) = query.filter(|q| !q.is_empty()) {
      url.set_query(Some(&query.encode()));
    }
    Ok(url)
  }

  async fn send(&self, builder: reqwest::RequestBuilder, url: &Url) -> Result<Value> {
    let response = builder.send().await.map_err(|e| Error::Network {
      url: url.to_string(),
      message: e.to_string(),
    })?;

    let status = response.status();
    let bytes = response.bytes().await.map_err(|e| Error::Network {
      url: url.to_string(),
      message: e.to_string(),
    })?;

    if !status.is_success() {
      let body = String::from_utf8_lossy(&bytes).trim().to_string();
      return Err(Error::Status {
        url: url.to_string(),
        status: status.as_u16(),
        message: if body.is_empty() {
          status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
          body
        },
      });
    }

    if bytes.iter().all(u8::is_ascii_whitespace) {
      return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|e| Error::decode(url.as_str(), e))
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn fetch(&self, path: &str, query: &QueryFilter) -> Result<Value> {
    let url = self.url(path, Some(query))?;
    debug!(url = %url, "GET");
    self.send(self.client.get(url.clone()), &url).await
  }

  async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
    let url = self.url(path, None)?;
    debug!(url = %url, method = %method, "Sending request");
    let mut builder = self.client.request(method.as_reqwest(), url.clone());
    if let Some(body) = body {
      builder = builder.json(&body);
    }
    self.send(builder, &url).await
  }
}
