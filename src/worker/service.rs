//! The installable worker: lifecycle, cache generations and queue replay.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::interceptor::{CacheNames, Interceptor};
use super::lifecycle::{Lifecycle, LifecycleEvent, WorkerState};
use super::messages::{ClientMessage, WorkerMessage};
use crate::http::{HttpRequest, HttpResponse, Method, Transport, TransportError};
use crate::queue::{OfflineQueue, ReplayReport};
use crate::storage::{CacheEntry, CacheStorage};

pub struct ServiceWorker {
  lifecycle: Mutex<Lifecycle>,
  interceptor: Interceptor,
  network: Arc<dyn Transport>,
  caches: Arc<dyn CacheStorage>,
  queue: OfflineQueue,
  names: CacheNames,
  events: broadcast::Sender<WorkerMessage>,
}

impl ServiceWorker {
  pub fn new(
    network: Arc<dyn Transport>,
    caches: Arc<dyn CacheStorage>,
    queue: OfflineQueue,
    names: CacheNames,
    api_prefixes: Vec<String>,
    events: broadcast::Sender<WorkerMessage>,
  ) -> Self {
    let interceptor = Interceptor::new(
      network.clone(),
      caches.clone(),
      queue.clone(),
      names.clone(),
      api_prefixes,
    );

    Self {
      lifecycle: Mutex::new(Lifecycle::default()),
      interceptor,
      network,
      caches,
      queue,
      names,
      events,
    }
  }

  pub fn state(&self) -> WorkerState {
    self
      .lifecycle
      .lock()
      .map(|lifecycle| lifecycle.state())
      .unwrap_or(WorkerState::Redundant)
  }

  pub fn is_active(&self) -> bool {
    self
      .lifecycle
      .lock()
      .map(|lifecycle| lifecycle.is_active())
      .unwrap_or(false)
  }

  fn lifecycle(&self) -> Result<MutexGuard<'_, Lifecycle>> {
    self
      .lifecycle
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn transition(&self, event: LifecycleEvent) -> Result<WorkerState> {
    let state = self.lifecycle()?.apply(event)?;
    debug!(?event, %state, "worker lifecycle");
    Ok(state)
  }

  /// Resume an earlier install, or install and activate from scratch.
  ///
  /// A failed install is not an error here: the worker ends up redundant and
  /// requests go straight to the network.
  pub async fn start(&self, manifest: &[String]) -> Result<WorkerState> {
    if self.caches.has_cache(&self.names.static_cache)? {
      *self.lifecycle()? = Lifecycle::resumed();
      self.drop_stale_caches()?;
      debug!(cache = %self.names.static_cache, "resumed installed worker");
      return Ok(self.state());
    }

    self.install_and_activate(manifest).await
  }

  /// Retire the current worker and install `manifest` from scratch.
  pub async fn reinstall(&self, manifest: &[String]) -> Result<WorkerState> {
    if matches!(self.state(), WorkerState::Active | WorkerState::Waiting) {
      self.transition(LifecycleEvent::Superseded)?;
    }
    *self.lifecycle()? = Lifecycle::default();
    self.install_and_activate(manifest).await
  }

  async fn install_and_activate(&self, manifest: &[String]) -> Result<WorkerState> {
    match self.install(manifest).await {
      Ok(()) => self.skip_waiting()?,
      Err(e) => warn!("worker install failed, requests bypass the cache: {e}"),
    }
    Ok(self.state())
  }

  /// Pre-cache every asset in `manifest`.
  ///
  /// All assets are fetched before anything is written; one failed fetch or
  /// non-200 response aborts the install and leaves the worker redundant.
  pub async fn install(&self, manifest: &[String]) -> Result<()> {
    let fetched = try_join_all(manifest.iter().map(|path| async move {
      let response = self
        .network
        .send(HttpRequest::get(path.as_str()))
        .await
        .map_err(|e| eyre!("Failed to pre-cache {}: {}", path, e))?;
      if response.status != 200 {
        return Err(eyre!(
          "Failed to pre-cache {}: status {}",
          path,
          response.status
        ));
      }
      Ok(CacheEntry::new(Method::Get, path, response))
    }))
    .await;

    let committed =
      fetched.and_then(|entries| self.caches.put_all(&self.names.static_cache, &entries));

    match committed {
      Ok(()) => {
        self.transition(LifecycleEvent::InstallSucceeded)?;
        info!(assets = manifest.len(), cache = %self.names.static_cache, "worker installed");
        Ok(())
      }
      Err(e) => {
        self.transition(LifecycleEvent::InstallFailed)?;
        Err(e)
      }
    }
  }

  /// Take over from the waiting state and drop old cache generations.
  pub fn activate(&self) -> Result<Vec<String>> {
    let deleted = self.drop_stale_caches()?;
    self.caches.open(&self.names.api_cache)?;
    self.transition(LifecycleEvent::Activate)?;
    info!("worker active");
    Ok(deleted)
  }

  fn drop_stale_caches(&self) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.caches.cache_names()? {
      if !self.names.contains(&name) {
        self.caches.delete_cache(&name)?;
        info!(cache = %name, "deleted old cache");
        deleted.push(name);
      }
    }

    if !deleted.is_empty() {
      // Nobody listening is fine.
      let _ = self.events.send(WorkerMessage::ReloadRequested {
        deleted_caches: deleted.clone(),
      });
    }
    Ok(deleted)
  }

  /// Activate now if an install is waiting.
  pub fn skip_waiting(&self) -> Result<()> {
    match self.state() {
      WorkerState::Waiting => self.activate().map(|_| ()),
      state => {
        debug!(%state, "skip waiting ignored");
        Ok(())
      }
    }
  }

  /// One replay pass. The outcome is broadcast either way.
  pub async fn sync_offline_requests(&self) -> Result<ReplayReport> {
    match self.queue.replay(self.network.as_ref()).await {
      Ok(report) => {
        let _ = self.events.send(WorkerMessage::SyncFinished {
          replayed: report.replayed,
          remaining: report.remaining,
          failure: report.failure.clone(),
        });
        Ok(report)
      }
      Err(e) => {
        let _ = self.events.send(WorkerMessage::SyncFailed {
          error: e.to_string(),
        });
        Err(e)
      }
    }
  }

  pub async fn handle_message(&self, message: ClientMessage) -> Result<()> {
    match message {
      ClientMessage::SkipWaiting => self.skip_waiting(),
      ClientMessage::SyncOfflineRequests => self.sync_offline_requests().await.map(|_| ()),
    }
  }

  /// Handle client messages one at a time until every sender is gone.
  pub async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<ClientMessage>) {
    while let Some(message) = rx.recv().await {
      if let Err(e) = self.handle_message(message).await {
        warn!(?message, "worker message failed: {e}");
      }
    }
    debug!("worker message loop stopped");
  }
}

#[async_trait]
impl Transport for ServiceWorker {
  /// Requests are only intercepted once the worker is active.
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
    if self.is_active() {
      self.interceptor.handle_fetch(request).await
    } else {
      self.network.send(request).await
    }
  }
}
