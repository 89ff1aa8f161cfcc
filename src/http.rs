//! Request/response types and the transport seam to the service.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// Header set on responses produced by the worker instead of the network.
pub const SERVED_BY_HEADER: &str = "x-lifesync-source";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
  Head,
  Options,
}

impl Method {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Patch => "PATCH",
      Self::Delete => "DELETE",
      Self::Head => "HEAD",
      Self::Options => "OPTIONS",
    }
  }

  /// Methods that change server state and are queued while offline.
  pub fn is_mutation(self) -> bool {
    matches!(self, Self::Post | Self::Put | Self::Patch | Self::Delete)
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_uppercase().as_str() {
      "GET" => Ok(Self::Get),
      "POST" => Ok(Self::Post),
      "PUT" => Ok(Self::Put),
      "PATCH" => Ok(Self::Patch),
      "DELETE" => Ok(Self::Delete),
      "HEAD" => Ok(Self::Head),
      "OPTIONS" => Ok(Self::Options),
      other => Err(eyre!("Unsupported HTTP method '{}'", other)),
    }
  }
}

/// An outgoing request. `url` is origin-relative (path plus query).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
  pub method: Method,
  pub url: String,
  pub headers: BTreeMap<String, String>,
  pub body: Option<String>,
  /// Set for page loads, which fall back to the cached root document.
  pub navigation: bool,
}

impl HttpRequest {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    Self {
      method,
      url: url.into(),
      headers: BTreeMap::new(),
      body: None,
      navigation: false,
    }
  }

  pub fn get(url: impl Into<String>) -> Self {
    Self::new(Method::Get, url)
  }

  pub fn navigate(url: impl Into<String>) -> Self {
    Self {
      navigation: true,
      ..Self::get(url)
    }
  }

  pub fn with_json(mut self, body: &serde_json::Value) -> Self {
    self
      .headers
      .insert("content-type".to_string(), "application/json".to_string());
    self.body = Some(body.to_string());
    self
  }

  /// Path without the query string.
  pub fn path(&self) -> &str {
    self.url.split(['?', '#']).next().unwrap_or_default()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    Self::new(status, value.to_string()).with_header("content-type", "application/json")
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_lowercase(), value.to_string());
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_lowercase()).map(String::as_str)
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Where the worker got this response from, if it did not come off the wire.
  pub fn served_by(&self) -> Option<&str> {
    self.header(SERVED_BY_HEADER)
  }

  pub fn json_body(&self) -> Result<serde_json::Value> {
    if self.body.is_empty() {
      return Ok(serde_json::Value::Null);
    }
    serde_json::from_slice(&self.body).map_err(|e| eyre!("Failed to parse response body: {}", e))
  }
}

/// Transport-level failure. A response with any status code is not one.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
  #[error("network request to {url} failed: {message}")]
  Network { url: String, message: String },
  /// The request could never be sent, online or not.
  #[error("invalid request to {url}: {message}")]
  Invalid { url: String, message: String },
  #[error("request interception failed: {0}")]
  Intercept(String),
}

impl TransportError {
  pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Network {
      url: url.into(),
      message: message.into(),
    }
  }

  pub fn invalid(url: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Invalid {
      url: url.into(),
      message: message.into(),
    }
  }

  /// Whether the failure means the service could not be reached.
  pub fn is_offline(&self) -> bool {
    matches!(self, Self::Network { .. })
  }
}

/// Something that can carry a request to the service.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Transport backed by reqwest against a fixed server origin.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl ReqwestTransport {
  pub fn new(base_url: &str) -> Result<Self> {
    let base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid server url '{}': {}", base_url, e))?;

    // No request timeout: fallback only happens on an actual transport error.
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }

  fn resolve(&self, url: &str) -> Result<Url, TransportError> {
    self
      .base_url
      .join(url)
      .map_err(|e| TransportError::invalid(url, e.to_string()))
  }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
    let url = self.resolve(&request.url)?;
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
      .map_err(|e| TransportError::invalid(&request.url, e.to_string()))?;

    let mut builder = self.client.request(method, url);
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| TransportError::network(&request.url, e.to_string()))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_lowercase(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| TransportError::network(&request.url, e.to_string()))?;

    Ok(HttpResponse {
      status,
      headers,
      body: body.to_vec(),
    })
  }
}

#[cfg(test)]
pub mod testing {
  //! Scripted transport for exercising the offline paths.

  use super::*;
  use std::collections::VecDeque;
  use std::sync::Mutex;

  #[derive(Default)]
  struct Script {
    online: bool,
    routes: BTreeMap<String, HttpResponse>,
    failing: Vec<String>,
    queued: VecDeque<Result<HttpResponse, TransportError>>,
    sent: Vec<HttpRequest>,
  }

  /// In-memory transport: fixed routes, forced failures and a log of sent requests.
  pub struct FakeTransport {
    script: Mutex<Script>,
  }

  impl FakeTransport {
    pub fn online() -> Self {
      Self {
        script: Mutex::new(Script {
          online: true,
          ..Script::default()
        }),
      }
    }

    pub fn offline() -> Self {
      Self {
        script: Mutex::new(Script::default()),
      }
    }

    pub fn set_online(&self, online: bool) {
      self.script.lock().unwrap().online = online;
    }

    /// Respond to `METHOD url` with `response`.
    pub fn route(&self, method: Method, url: &str, response: HttpResponse) {
      self
        .script
        .lock()
        .unwrap()
        .routes
        .insert(format!("{} {}", method, url), response);
    }

    /// Make `METHOD url` fail at the transport level even while online.
    pub fn fail(&self, method: Method, url: &str) {
      self
        .script
        .lock()
        .unwrap()
        .failing
        .push(format!("{} {}", method, url));
    }

    /// Answer the next request with `outcome`, ahead of routes.
    pub fn push_outcome(&self, outcome: Result<HttpResponse, TransportError>) {
      self.script.lock().unwrap().queued.push_back(outcome);
    }

    pub fn sent(&self) -> Vec<HttpRequest> {
      self.script.lock().unwrap().sent.clone()
    }

    pub fn sent_lines(&self) -> Vec<String> {
      self
        .sent()
        .iter()
        .map(|r| format!("{} {}", r.method, r.url))
        .collect()
    }
  }

  #[async_trait]
  impl Transport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
      let mut script = self.script.lock().unwrap();
      script.sent.push(request.clone());

      if let Some(outcome) = script.queued.pop_front() {
        return outcome;
      }

      let line = format!("{} {}", request.method, request.url);
      if !script.online || script.failing.contains(&line) {
        return Err(TransportError::network(&request.url, "connection refused"));
      }

      Ok(
        script
          .routes
          .get(&line)
          .cloned()
          .unwrap_or_else(|| HttpResponse::new(404, "not found")),
      )
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_method_parse() {
    assert_eq!("patch".parse::<Method>().unwrap(), Method::Patch);
    assert!("TRACE".parse::<Method>().is_err());
    assert!(Method::Delete.is_mutation());
    assert!(!Method::Get.is_mutation());
  }

  #[test]
  fn test_request_path_strips_query() {
    let request = HttpRequest::get("/api/tasks?date=2024-05-01");
    assert_eq!(request.path(), "/api/tasks");
  }

  #[test]
  fn test_json_request_sets_content_type() {
    let request = HttpRequest::new(Method::Post, "/api/tasks").with_json(&json!({"title": "x"}));
    assert_eq!(
      request.headers.get("content-type").map(String::as_str),
      Some("application/json")
    );
    assert_eq!(request.body.as_deref(), Some(r#"{"title":"x"}"#));
  }

  #[test]
  fn test_response_headers_are_case_insensitive() {
    let response = HttpResponse::new(200, "[]").with_header("X-Lifesync-Source", "cache");
    assert_eq!(response.served_by(), Some("cache"));
    assert_eq!(response.json_body().unwrap(), json!([]));
  }

  #[test]
  fn test_resolve_against_base() {
    let transport = ReqwestTransport::new("http://localhost:5000").unwrap();
    let url = transport.resolve("/api/tasks?date=2024-05-01").unwrap();
    assert_eq!(url.as_str(), "http://localhost:5000/api/tasks?date=2024-05-01");
  }

  #[test]
  fn test_malformed_url_is_not_offline() {
    let transport = ReqwestTransport::new("http://localhost:5000").unwrap();
    let err = transport.resolve("http://[::1").unwrap_err();
    assert!(matches!(err, TransportError::Invalid { .. }));
    assert!(!err.is_offline());
    assert!(TransportError::network("/api/tasks", "refused").is_offline());
  }
}
