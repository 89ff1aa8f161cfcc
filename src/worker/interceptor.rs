//! Cache-vs-network routing for every request the client makes.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::http::{HttpRequest, HttpResponse, Method, Transport, TransportError, SERVED_BY_HEADER};
use crate::queue::{OfflineQueue, QueuedRequest};
use crate::storage::{request_key, CacheEntry, CacheStorage};

/// Names of the two caches the current worker version owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
  pub static_cache: String,
  pub api_cache: String,
}

impl CacheNames {
  pub fn for_version(prefix: &str, version: &str) -> Self {
    Self {
      static_cache: format!("{}-static-{}", prefix, version),
      api_cache: format!("{}-api-{}", prefix, version),
    }
  }

  pub fn contains(&self, name: &str) -> bool {
    name == self.static_cache || name == self.api_cache
  }
}

pub struct Interceptor {
  network: Arc<dyn Transport>,
  caches: Arc<dyn CacheStorage>,
  queue: OfflineQueue,
  names: CacheNames,
  api_prefixes: Vec<String>,
}

impl Interceptor {
  pub fn new(
    network: Arc<dyn Transport>,
    caches: Arc<dyn CacheStorage>,
    queue: OfflineQueue,
    names: CacheNames,
    api_prefixes: Vec<String>,
  ) -> Self {
    Self {
      network,
      caches,
      queue,
      names,
      api_prefixes,
    }
  }

  fn is_api(&self, request: &HttpRequest) -> bool {
    let path = request.path();
    self
      .api_prefixes
      .iter()
      .any(|prefix| path.starts_with(prefix.as_str()))
  }

  pub async fn handle_fetch(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
    if self.is_api(&request) {
      self.fetch_api(request).await
    } else {
      self.fetch_static(request).await
    }
  }

  /// Network first. Offline reads come from the API cache, offline writes are queued.
  async fn fetch_api(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
    match self.network.send(request.clone()).await {
      Ok(response) => {
        if request.method == Method::Get && response.status == 200 {
          self.store(&self.names.api_cache, &request, &response);
        }
        Ok(response)
      }
      Err(e) if e.is_offline() && request.method == Method::Get => {
        debug!(url = %request.url, "network unavailable, serving API cache: {e}");
        match self.lookup(&self.names.api_cache, &request) {
          Some(cached) => Ok(cached.with_header(SERVED_BY_HEADER, "cache")),
          // Lists render empty instead of failing on a cold offline start.
          None => Ok(HttpResponse::json(200, &json!([])).with_header(SERVED_BY_HEADER, "fallback")),
        }
      }
      Err(e) if e.is_offline() && request.method.is_mutation() => {
        debug!(method = %request.method, url = %request.url, "network unavailable, queueing: {e}");
        self
          .queue
          .enqueue(QueuedRequest::capture(&request))
          .map_err(|e| TransportError::Intercept(format!("failed to queue request: {}", e)))?;
        Ok(
          HttpResponse::json(202, &json!({"offline": true, "queued": true}))
            .with_header(SERVED_BY_HEADER, "queue"),
        )
      }
      Err(e) => Err(e),
    }
  }

  /// Cache first, then network. Page loads fall back to the cached root.
  async fn fetch_static(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
    if request.method == Method::Get {
      if let Some(cached) = self.lookup(&self.names.static_cache, &request) {
        return Ok(cached.with_header(SERVED_BY_HEADER, "cache"));
      }
    }

    match self.network.send(request.clone()).await {
      Ok(response) => {
        if request.method == Method::Get && response.status == 200 {
          self.store(&self.names.static_cache, &request, &response);
        }
        Ok(response)
      }
      Err(e) => {
        if e.is_offline() && request.navigation {
          if let Some(root) = self.lookup(&self.names.static_cache, &HttpRequest::get("/")) {
            debug!(url = %request.url, "offline navigation, serving cached root");
            return Ok(root.with_header(SERVED_BY_HEADER, "cache"));
          }
        }
        Err(e)
      }
    }
  }

  /// Cache reads never fail a request; errors read as a miss.
  fn lookup(&self, cache: &str, request: &HttpRequest) -> Option<HttpResponse> {
    match self
      .caches
      .lookup(cache, &request_key(request.method, &request.url))
    {
      Ok(hit) => hit.map(|cached| {
        debug!(cache, url = %request.url, cached_at = %cached.cached_at, "cache hit");
        cached.response
      }),
      Err(e) => {
        warn!(cache, url = %request.url, "cache lookup failed: {e}");
        None
      }
    }
  }

  fn store(&self, cache: &str, request: &HttpRequest, response: &HttpResponse) {
    let entry = CacheEntry::new(request.method, &request.url, response.clone());
    if let Err(e) = self.caches.put(cache, &entry) {
      warn!(cache, url = %request.url, "failed to cache response: {e}");
    }
  }
}
