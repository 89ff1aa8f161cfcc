//! Entity access with network-first, local-store fallback semantics.
//!
//! Every collection is reached through the same [`EntityService`] interface;
//! the [`ServiceRegistry`] picks the implementation per [`EntityKind`] once
//! at startup.

mod network;
mod registry;
mod typed;

use async_trait::async_trait;
use color_eyre::Result;
use serde::Serialize;
use thiserror::Error;

use crate::http::Method;
use crate::model::{EntityKind, ListFilter, Record};

pub use network::NetworkGateway;
pub use registry::ServiceRegistry;
pub use typed::TypedCollection;

/// Result from a gateway operation, including where the data came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncResult<T> {
  pub data: T,
  pub source: DataSource,
}

impl<T> SyncResult<T> {
  pub fn new(data: T, source: DataSource) -> Self {
    Self { data, source }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> SyncResult<U> {
    SyncResult {
      data: f(self.data),
      source: self.source,
    }
  }
}

/// Indicates where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
  /// Live response from the service
  Network,
  /// Served by the worker from its response cache (or its empty fallback)
  Cache,
  /// Network unavailable, answered by the local mirror
  LocalMirror,
  /// Accepted by the worker for later replay; not applied anywhere yet
  Queued,
}

/// The service answered, but not with a success status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{method} {url} returned {status}: {body}")]
pub struct HttpStatusError {
  pub method: Method,
  pub url: String,
  pub status: u16,
  pub body: String,
}

/// Uniform capability interface over one collection.
#[async_trait]
pub trait EntityService: Send + Sync {
  fn kind(&self) -> EntityKind;

  async fn list(&self, filter: &ListFilter) -> Result<SyncResult<Vec<Record>>>;

  async fn create(&self, fields: Record) -> Result<SyncResult<Record>>;

  /// Merge `patch` into the record with `id`.
  async fn update(&self, id: &str, patch: Record) -> Result<SyncResult<Record>>;

  /// Removing a missing record is not an error.
  async fn delete(&self, id: &str) -> Result<SyncResult<()>>;
}
