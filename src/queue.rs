//! Offline mutation queue.
//!
//! Requests the worker could not deliver are appended here and re-sent, in
//! order, when connectivity comes back.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::http::{HttpRequest, Method, Transport};
use crate::storage::KeyValueStore;

/// A request waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequest {
  pub url: String,
  pub method: Method,
  pub headers: BTreeMap<String, String>,
  pub body: Option<String>,
  pub timestamp: DateTime<Utc>,
}

impl QueuedRequest {
  pub fn capture(request: &HttpRequest) -> Self {
    Self {
      url: request.url.clone(),
      method: request.method,
      headers: request.headers.clone(),
      body: request.body.clone(),
      timestamp: Utc::now(),
    }
  }

  pub fn to_request(&self) -> HttpRequest {
    HttpRequest {
      method: self.method,
      url: self.url.clone(),
      headers: self.headers.clone(),
      body: self.body.clone(),
      navigation: false,
    }
  }
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
  /// Entries delivered and removed from the queue
  pub replayed: usize,
  /// Entries still queued afterwards
  pub remaining: usize,
  /// Why the pass stopped early, if it did
  pub failure: Option<String>,
}

/// FIFO log of pending requests persisted under a single key.
#[derive(Clone)]
pub struct OfflineQueue {
  store: Arc<dyn KeyValueStore>,
  key: String,
}

impl OfflineQueue {
  pub fn new(store: Arc<dyn KeyValueStore>, namespace: &str) -> Self {
    Self {
      store,
      key: format!("{}_offline_queue", namespace),
    }
  }

  pub fn entries(&self) -> Result<Vec<QueuedRequest>> {
    let Some(raw) = self.store.get(&self.key)? else {
      return Ok(Vec::new());
    };
    match serde_json::from_str(&raw) {
      Ok(entries) => Ok(entries),
      Err(e) => {
        warn!(key = %self.key, "discarding unreadable offline queue: {e}");
        Ok(Vec::new())
      }
    }
  }

  fn save(&self, entries: &[QueuedRequest]) -> Result<()> {
    if entries.is_empty() {
      return self.store.remove(&self.key);
    }
    self.store.set(&self.key, &serde_json::to_string(entries)?)
  }

  /// Append a request. Returns the queue length afterwards.
  pub fn enqueue(&self, request: QueuedRequest) -> Result<usize> {
    let mut entries = self.entries()?;
    debug!(method = %request.method, url = %request.url, "queueing offline request");
    entries.push(request);
    self.save(&entries)?;
    Ok(entries.len())
  }

  pub fn len(&self) -> Result<usize> {
    Ok(self.entries()?.len())
  }

  /// Drop every pending request. Returns how many there were.
  pub fn clear(&self) -> Result<usize> {
    let dropped = self.len()?;
    self.store.remove(&self.key)?;
    if dropped > 0 {
      info!(dropped, "cleared offline queue");
    }
    Ok(dropped)
  }

  /// Re-send queued requests in insertion order.
  ///
  /// Stops at the first transport failure; that entry and everything after
  /// it stay queued. Any response, whatever its status, counts as delivered.
  pub async fn replay(&self, transport: &dyn Transport) -> Result<ReplayReport> {
    let pending = self.entries()?;
    if pending.is_empty() {
      return Ok(ReplayReport::default());
    }

    info!(count = pending.len(), "replaying offline requests");

    let mut replayed = 0;
    let mut failure = None;
    for entry in &pending {
      match transport.send(entry.to_request()).await {
        Ok(response) => {
          debug!(method = %entry.method, url = %entry.url, status = response.status, "replayed");
          replayed += 1;
        }
        Err(e) => {
          warn!(method = %entry.method, url = %entry.url, "replay stopped: {e}");
          failure = Some(e.to_string());
          break;
        }
      }
    }

    // Drop only the delivered prefix; entries queued meanwhile were appended.
    let mut current = self.entries()?;
    let delivered = replayed.min(current.len());
    current.drain(..delivered);
    self.save(&current)?;

    Ok(ReplayReport {
      replayed,
      remaining: current.len(),
      failure,
    })
  }
}
