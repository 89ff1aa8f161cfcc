//! Wiring of stores, worker, monitor and gateways for one client process.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::gateway::ServiceRegistry;
use crate::http::{ReqwestTransport, Transport};
use crate::mirror::LocalMirrorStore;
use crate::model::EntityKind;
use crate::monitor::{spawn_probe, Connectivity, ConnectivityMonitor};
use crate::queue::OfflineQueue;
use crate::storage::{
  CacheStorage, KeyValueStore, MemoryCacheStorage, MemoryKvStore, SqliteCacheStorage,
  SqliteKvStore,
};
use crate::worker::{ClientMessage, ServiceWorker, WorkerMessage, WorkerState};

const MIRROR_DB: &str = "mirror.db";
const WORKER_CACHE_DB: &str = "worker-cache.db";

pub struct SyncContext {
  pub config: Config,
  pub caches: Arc<dyn CacheStorage>,
  /// Raw network, bypassing the worker
  pub network: Arc<dyn Transport>,
  pub connectivity: Connectivity,
  pub mirror: LocalMirrorStore,
  pub queue: OfflineQueue,
  pub worker: Arc<ServiceWorker>,
  pub registry: ServiceRegistry,
  events: broadcast::Sender<WorkerMessage>,
  client_tx: Option<mpsc::UnboundedSender<ClientMessage>>,
  client_rx: Option<mpsc::UnboundedReceiver<ClientMessage>>,
  worker_task: Option<JoinHandle<()>>,
  background: Vec<JoinHandle<()>>,
}

impl SyncContext {
  /// Persistent context under the configured data directory.
  pub fn open(config: Config, online: bool) -> Result<Self> {
    let data_dir = config.data_dir()?;
    let kv = Arc::new(SqliteKvStore::open(&data_dir.join(MIRROR_DB))?);
    let caches = Arc::new(SqliteCacheStorage::open_at(&data_dir.join(WORKER_CACHE_DB))?);
    let network = Arc::new(ReqwestTransport::new(&config.server.url)?);
    debug!(data_dir = %data_dir.display(), server = %config.server.url, "opened stores");

    Ok(Self::build(config, kv, caches, network, online))
  }

  /// Context whose stores vanish with the process.
  pub fn ephemeral(config: Config, network: Arc<dyn Transport>, online: bool) -> Self {
    Self::build(
      config,
      Arc::new(MemoryKvStore::new()),
      Arc::new(MemoryCacheStorage::new()),
      network,
      online,
    )
  }

  fn build(
    config: Config,
    kv: Arc<dyn KeyValueStore>,
    caches: Arc<dyn CacheStorage>,
    network: Arc<dyn Transport>,
    online: bool,
  ) -> Self {
    let namespace = config.storage.namespace.clone();
    let names = config.cache_names();
    let connectivity = Connectivity::new(online);
    let mirror = LocalMirrorStore::new(kv.clone(), namespace.clone());
    let queue = OfflineQueue::new(kv.clone(), &namespace);
    let (events, _) = broadcast::channel(64);

    let api_prefixes = EntityKind::ALL
      .iter()
      .map(|kind| kind.api_path().to_string())
      .collect();
    let worker = Arc::new(ServiceWorker::new(
      network.clone(),
      caches.clone(),
      queue.clone(),
      names.clone(),
      api_prefixes,
      events.clone(),
    ));

    // Gateways reach the network through the worker.
    let registry = ServiceRegistry::with_gateways(
      worker.clone(),
      mirror.clone(),
      connectivity.clone(),
      caches.clone(),
      &names.api_cache,
    );

    let (client_tx, client_rx) = mpsc::unbounded_channel();

    Self {
      config,
      caches,
      network,
      connectivity,
      mirror,
      queue,
      worker,
      registry,
      events,
      client_tx: Some(client_tx),
      client_rx: Some(client_rx),
      worker_task: None,
      background: Vec::new(),
    }
  }

  /// Bring the worker up and start the message loop and connectivity monitor.
  pub async fn start(&mut self) -> Result<WorkerState> {
    let state = self.worker.start(&self.config.worker.static_assets).await?;
    info!(%state, "worker started");

    let rx = self
      .client_rx
      .take()
      .ok_or_else(|| eyre!("Context already started"))?;
    self.worker_task = Some(tokio::spawn(self.worker.clone().run(rx)));

    let sender = self.sender()?;
    self
      .background
      .push(ConnectivityMonitor::new(self.connectivity.clone(), sender).spawn());

    Ok(state)
  }

  /// Poll the server in the background and keep connectivity current.
  pub fn spawn_probe(&mut self) {
    let monitor = &self.config.monitor;
    self.background.push(spawn_probe(
      self.connectivity.clone(),
      self.network.clone(),
      monitor.probe_path.clone(),
      monitor.probe_interval(),
    ));
  }

  pub fn sender(&self) -> Result<mpsc::UnboundedSender<ClientMessage>> {
    self
      .client_tx
      .clone()
      .ok_or_else(|| eyre!("Context is shut down"))
  }

  /// Messages broadcast by the worker.
  pub fn subscribe(&self) -> broadcast::Receiver<WorkerMessage> {
    self.events.subscribe()
  }

  /// Queue a replay on the worker loop and wait for a pass to report back.
  pub async fn request_sync(&self) -> Result<WorkerMessage> {
    if self.worker_task.is_none() {
      return Err(eyre!("Context is not started"));
    }
    let mut events = self.subscribe();
    self
      .sender()?
      .send(ClientMessage::SyncOfflineRequests)
      .map_err(|_| eyre!("Worker loop has stopped"))?;

    loop {
      match events.recv().await {
        Ok(message @ (WorkerMessage::SyncFinished { .. } | WorkerMessage::SyncFailed { .. })) => {
          return Ok(message)
        }
        Ok(WorkerMessage::ReloadRequested { .. }) => {}
        Err(RecvError::Lagged(skipped)) => debug!(skipped, "missed worker messages"),
        Err(RecvError::Closed) => return Err(eyre!("Worker loop has stopped")),
      }
    }
  }

  /// Stop background tasks and let the worker drain its messages.
  pub async fn shutdown(mut self) {
    for task in self.background.drain(..) {
      task.abort();
      let _ = task.await;
    }
    self.client_tx = None;
    if let Some(task) = self.worker_task.take() {
      let _ = task.await;
    }
    debug!("context shut down");
  }
}
