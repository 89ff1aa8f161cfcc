//! Install/activate lifecycle of the interception worker.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
  /// Pre-caching the static manifest
  Installing,
  /// Installed, not yet controlling requests
  Waiting,
  /// Intercepting requests
  Active,
  /// Failed to install or replaced; never intercepts
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Installing => "installing",
      Self::Waiting => "waiting",
      Self::Active => "active",
      Self::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
  InstallSucceeded,
  InstallFailed,
  /// Skip-waiting or the previous worker went away
  Activate,
  /// A newer install replaces this worker
  Superseded,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("cannot apply {event:?} to a worker that is {state}")]
pub struct InvalidTransition {
  pub state: WorkerState,
  pub event: LifecycleEvent,
}

/// State machine over [`WorkerState`].
#[derive(Debug, Clone)]
pub struct Lifecycle {
  state: WorkerState,
}

impl Lifecycle {
  /// A worker that still has to install.
  pub fn new() -> Self {
    Self {
      state: WorkerState::Installing,
    }
  }

  /// A worker whose install from an earlier run is still in place.
  pub fn resumed() -> Self {
    Self {
      state: WorkerState::Active,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn is_active(&self) -> bool {
    self.state == WorkerState::Active
  }

  pub fn apply(&mut self, event: LifecycleEvent) -> Result<WorkerState, InvalidTransition> {
    use LifecycleEvent::*;
    use WorkerState::*;

    let next = match (self.state, event) {
      (Installing, InstallSucceeded) => Waiting,
      (Installing, InstallFailed) => Redundant,
      (Waiting, Activate) => Active,
      (Active, Activate) => Active,
      (Active | Waiting, Superseded) => Redundant,
      (state, event) => return Err(InvalidTransition { state, event }),
    };
    self.state = next;
    Ok(next)
  }
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self::new()
  }
}
