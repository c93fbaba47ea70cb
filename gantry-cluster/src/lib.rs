//! Worker-side cluster runtime for Gantry
//!
//! Each worker process owns one contiguous shard range. After being forked it
//! idles until the master routes it a `connect` instruction through the
//! startup queue; it then drives the gateway client, reports lifecycle, log
//! and stats events back over the IPC channel, and proxies every outbound API
//! call through the master instead of issuing it directly.

pub mod app;
pub mod error;
pub mod handle;
pub mod request;
pub mod runtime;

pub use app::{AppContext, AppRegistry, ClusterApp, ClusterAppFactory};
pub use error::{RequestError, WorkerError};
pub use handle::IpcHandle;
pub use request::RequestHandler;
pub use runtime::{run_worker, ClusterWorker, WorkerOptions, WorkerState};
