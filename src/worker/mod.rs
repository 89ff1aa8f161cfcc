//! Request interception worker.
//!
//! Sits between the client and the network once active:
//! - API reads are network first with a response cache behind them
//! - API writes made offline are queued and acknowledged with 202
//! - static assets are cache first, pre-cached on install

mod interceptor;
mod lifecycle;
mod messages;
mod service;

pub use interceptor::CacheNames;
pub use lifecycle::WorkerState;
pub use messages::{ClientMessage, WorkerMessage};
pub use service::ServiceWorker;
