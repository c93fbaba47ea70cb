//! Inter-process communication for Gantry
//!
//! This crate provides the messaging protocol and transport abstractions used
//! for communication between the sharding master and its cluster worker
//! processes, plus the correlation map that matches asynchronous requests to
//! their eventual responses across the process boundary.

pub mod correlation;
pub mod error;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use correlation::CorrelationMap;
pub use error::IpcError;
pub use protocol::{
    ApiError, ClusterMessage, ClusterStats, Embed, EmbedField, FetchKind, FetchValue, FilePayload,
    HttpMethod, LifecycleKind, LogLevel, MasterMessage, MessageEnvelope, ShardStats,
    IPC_PROTOCOL_VERSION,
};
pub use transport::{IpcReceiver, IpcSender};
