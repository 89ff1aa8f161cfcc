//! Connectivity tracking and the online-transition trigger for replay.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::http::{HttpRequest, Transport};
use crate::worker::ClientMessage;

/// Shared view of whether the service is reachable.
#[derive(Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record the current state. Returns whether it changed.
  pub fn set_online(&self, online: bool) -> bool {
    self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    })
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

/// Watches connectivity and asks the worker to replay when it comes back.
pub struct ConnectivityMonitor {
  connectivity: Connectivity,
  worker: mpsc::UnboundedSender<ClientMessage>,
}

impl ConnectivityMonitor {
  pub fn new(connectivity: Connectivity, worker: mpsc::UnboundedSender<ClientMessage>) -> Self {
    Self {
      connectivity,
      worker,
    }
  }

  /// Run until the worker's channel closes.
  pub fn spawn(self) -> JoinHandle<()> {
    let mut rx = self.connectivity.subscribe();
    tokio::spawn(async move {
      while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        if online {
          info!("back online, requesting replay of offline requests");
          // Fire and forget: the worker reports the outcome itself.
          if self.worker.send(ClientMessage::SyncOfflineRequests).is_err() {
            break;
          }
        } else {
          info!("offline, serving from local store and caches");
        }
      }
    })
  }
}

/// Periodically probe `path` and feed the result into `connectivity`.
///
/// Any response counts as online; only a transport error counts as offline.
pub fn spawn_probe(
  connectivity: Connectivity,
  transport: Arc<dyn Transport>,
  path: String,
  every: Duration,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(every);
    loop {
      ticker.tick().await;
      let online = transport.send(HttpRequest::get(&path)).await.is_ok();
      if connectivity.set_online(online) {
        debug!(online, "connectivity changed");
      }
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::testing::FakeTransport;

  #[test]
  fn test_set_online_reports_changes() {
    let connectivity = Connectivity::new(true);
    assert!(!connectivity.set_online(true));
    assert!(connectivity.set_online(false));
    assert!(!connectivity.is_online());
    assert!(connectivity.clone().set_online(true));
    assert!(connectivity.is_online());
  }

  #[tokio::test]
  async fn test_online_transition_requests_replay() {
    let connectivity = Connectivity::new(false);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = ConnectivityMonitor::new(connectivity.clone(), tx).spawn();

    connectivity.set_online(true);
    assert_eq!(rx.recv().await, Some(ClientMessage::SyncOfflineRequests));

    connectivity.set_online(false);
    connectivity.set_online(true);
    assert_eq!(rx.recv().await, Some(ClientMessage::SyncOfflineRequests));

    handle.abort();
  }

  #[tokio::test]
  async fn test_going_offline_sends_nothing() {
    let connectivity = Connectivity::new(true);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = ConnectivityMonitor::new(connectivity.clone(), tx).spawn();

    connectivity.set_online(false);
    tokio::task::yield_now().await;
    assert!(rx.try_recv().is_err());

    handle.abort();
  }

  #[tokio::test(start_paused = true)]
  async fn test_probe_follows_transport() {
    let connectivity = Connectivity::new(true);
    let mut rx = connectivity.subscribe();
    let transport = Arc::new(FakeTransport::offline());
    let handle = spawn_probe(
      connectivity.clone(),
      transport.clone(),
      "/api/streak".to_string(),
      Duration::from_secs(5),
    );

    rx.changed().await.unwrap();
    assert!(!*rx.borrow_and_update());

    transport.set_online(true);
    rx.changed().await.unwrap();
    assert!(*rx.borrow_and_update());
    assert!(transport
      .sent_lines()
      .iter()
      .all(|line| line == "GET /api/streak"));

    handle.abort();
  }
}
