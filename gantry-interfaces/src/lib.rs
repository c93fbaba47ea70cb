//! # Gantry Interfaces
//!
//! Boundary traits for the external collaborators Gantry coordinates but does
//! not implement: the gateway client library that owns the socket-level shard
//! connections, and the rate-limited REST client every outbound API call is
//! arbitrated through.
//!
//! Worker runtimes drive a [`GatewayClient`] built by a
//! [`GatewayClientFactory`]; the master owns exactly one [`RestClient`] shared
//! by the whole fleet.

pub mod gateway;
pub mod rest;

// Re-export commonly used types
pub use gateway::{GatewayClient, GatewayClientFactory, GatewayError, GatewayEvent, GatewayOptions};
pub use rest::{RestClient, RestError, RestFile, RestRequest};
