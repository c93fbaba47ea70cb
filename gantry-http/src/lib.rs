//! Default REST client for Gantry
//!
//! One `reqwest::Client` instance backs the whole fleet; the master passes an
//! `Arc<HttpRestClient>` into the orchestrator so every proxied worker request
//! and webhook notification shares its connection pool and remote-facing
//! rate-limit handling.

pub mod client;

pub use client::HttpRestClient;
