//! Messages exchanged between the client and the worker.

use serde::{Deserialize, Serialize};

/// Client to worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// Activate a waiting worker immediately
  SkipWaiting,
  /// Replay the offline mutation queue
  SyncOfflineRequests,
}

/// Worker to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
  /// Old caches were dropped; pages should reload.
  ReloadRequested { deleted_caches: Vec<String> },
  /// A replay pass finished; `failure` says why it stopped early.
  SyncFinished {
    replayed: usize,
    remaining: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<String>,
  },
  /// A replay pass could not read or write the queue.
  SyncFailed { error: String },
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_client_message_wire_format() {
    let message: ClientMessage = serde_json::from_value(json!({"type": "SKIP_WAITING"})).unwrap();
    assert_eq!(message, ClientMessage::SkipWaiting);
    assert_eq!(
      serde_json::to_value(ClientMessage::SyncOfflineRequests).unwrap(),
      json!({"type": "SYNC_OFFLINE_REQUESTS"})
    );
  }

  #[test]
  fn test_worker_message_wire_format() {
    let message = WorkerMessage::ReloadRequested {
      deleted_caches: vec!["lifesync-static-v0".into()],
    };
    assert_eq!(
      serde_json::to_value(message).unwrap(),
      json!({"type": "RELOAD_REQUESTED", "deleted_caches": ["lifesync-static-v0"]})
    );

    let message: WorkerMessage =
      serde_json::from_value(json!({"type": "SYNC_FINISHED", "replayed": 2, "remaining": 1}))
        .unwrap();
    assert_eq!(
      message,
      WorkerMessage::SyncFinished {
        replayed: 2,
        remaining: 1,
        failure: None
      }
    );
  }
}
