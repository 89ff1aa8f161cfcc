//! Gateway that prefers the service and falls back to the local mirror.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{DataSource, EntityService, HttpStatusError, SyncResult};
use crate::http::{HttpRequest, HttpResponse, Method, Transport};
use crate::mirror::LocalMirrorStore;
use crate::model::{EntityKind, ListFilter, Record};
use crate::monitor::Connectivity;
use crate::storage::{CacheEntry, CacheStorage};

pub struct NetworkGateway {
  kind: EntityKind,
  transport: Arc<dyn Transport>,
  mirror: LocalMirrorStore,
  connectivity: Connectivity,
  caches: Arc<dyn CacheStorage>,
  api_cache: String,
}

impl NetworkGateway {
  pub fn new(
    kind: EntityKind,
    transport: Arc<dyn Transport>,
    mirror: LocalMirrorStore,
    connectivity: Connectivity,
    caches: Arc<dyn CacheStorage>,
    api_cache: impl Into<String>,
  ) -> Self {
    Self {
      kind,
      transport,
      mirror,
      connectivity,
      caches,
      api_cache: api_cache.into(),
    }
  }

  /// Send `request` unless known offline.
  ///
  /// `None` means the service was not reached and the mirror has to answer.
  async fn remote(&self, request: HttpRequest) -> Result<Option<HttpResponse>> {
    if !self.connectivity.is_online() {
      debug!(kind = %self.kind, "offline, using local store");
      return Ok(None);
    }

    let (method, url) = (request.method, request.url.clone());
    match self.transport.send(request).await {
      Ok(response) => Ok(Some(response)),
      Err(e) if e.is_offline() => {
        warn!(kind = %self.kind, %method, %url, "request failed, using local store: {e}");
        Ok(None)
      }
      Err(e) => Err(e.into()),
    }
  }

  /// Opportunistically keep successful reads for the worker.
  fn remember(&self, url: &str, response: &HttpResponse) {
    let entry = CacheEntry::new(Method::Get, url, response.clone());
    if let Err(e) = self.caches.put(&self.api_cache, &entry) {
      warn!(%url, "failed to cache response: {e}");
    }
  }
}

fn ensure_success(method: Method, url: &str, response: HttpResponse) -> Result<HttpResponse> {
  if response.is_success() {
    return Ok(response);
  }
  Err(
    HttpStatusError {
      method,
      url: url.to_string(),
      status: response.status,
      body: String::from_utf8_lossy(&response.body).into_owned(),
    }
    .into(),
  )
}

fn source_of(response: &HttpResponse) -> DataSource {
  match response.served_by() {
    None => DataSource::Network,
    Some("queue") => DataSource::Queued,
    Some(_) => DataSource::Cache,
  }
}

/// A list body, or the bare object the singleton endpoint returns.
fn parse_records(response: &HttpResponse) -> Result<Vec<Record>> {
  match response.json_body()? {
    Value::Array(items) => items
      .into_iter()
      .map(|item| match item {
        Value::Object(record) => Ok(record),
        other => Err(eyre!("Expected an object in list response, got {}", other)),
      })
      .collect(),
    Value::Object(record) => Ok(vec![record]),
    Value::Null => Ok(Vec::new()),
    other => Err(eyre!("Unexpected list response: {}", other)),
  }
}

fn parse_record(response: &HttpResponse) -> Result<Record> {
  match response.json_body()? {
    Value::Object(record) => Ok(record),
    Value::Null => Ok(Record::new()),
    other => Err(eyre!("Expected an object response, got {}", other)),
  }
}

#[async_trait]
impl EntityService for NetworkGateway {
  fn kind(&self) -> EntityKind {
    self.kind
  }

  async fn list(&self, filter: &ListFilter) -> Result<SyncResult<Vec<Record>>> {
    let url = format!("{}{}", self.kind.api_path(), filter.query_string());

    if let Some(response) = self.remote(HttpRequest::get(&url)).await? {
      let response = ensure_success(Method::Get, &url, response)?;
      let source = source_of(&response);
      if source == DataSource::Network && response.status == 200 {
        self.remember(&url, &response);
      }
      return Ok(SyncResult::new(parse_records(&response)?, source));
    }

    Ok(SyncResult::new(
      self.mirror.list(self.kind, filter)?,
      DataSource::LocalMirror,
    ))
  }

  async fn create(&self, fields: Record) -> Result<SyncResult<Record>> {
    let url = self.kind.api_path();
    let request = HttpRequest::new(Method::Post, url).with_json(&Value::Object(fields.clone()));

    if let Some(response) = self.remote(request).await? {
      let response = ensure_success(Method::Post, url, response)?;
      return Ok(SyncResult::new(
        parse_record(&response)?,
        source_of(&response),
      ));
    }

    Ok(SyncResult::new(
      self.mirror.create(self.kind, fields)?,
      DataSource::LocalMirror,
    ))
  }

  async fn update(&self, id: &str, patch: Record) -> Result<SyncResult<Record>> {
    let url = self.kind.item_path(id);
    let request = HttpRequest::new(Method::Patch, &url).with_json(&Value::Object(patch.clone()));

    if let Some(response) = self.remote(request).await? {
      let response = ensure_success(Method::Patch, &url, response)?;
      return Ok(SyncResult::new(
        parse_record(&response)?,
        source_of(&response),
      ));
    }

    // A missing local record is the caller's problem.
    Ok(SyncResult::new(
      self.mirror.update(self.kind, id, patch)?,
      DataSource::LocalMirror,
    ))
  }

  async fn delete(&self, id: &str) -> Result<SyncResult<()>> {
    let url = self.kind.item_path(id);

    if let Some(response) = self.remote(HttpRequest::new(Method::Delete, &url)).await? {
      let response = ensure_success(Method::Delete, &url, response)?;
      return Ok(SyncResult::new((), source_of(&response)));
    }

    self.mirror.delete(self.kind, id)?;
    Ok(SyncResult::new((), DataSource::LocalMirror))
  }
}
