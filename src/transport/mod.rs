//! HTTP transport for the todo API.
//!
//! This module provides the one place that talks to the network:
//! - Attaches the session's bearer token to every request
//! - Enforces a per-attempt timeout
//! - Retries transient failures of idempotent requests with backoff
//! - Normalizes non-2xx responses into typed errors

mod client;
mod retry;

pub use client::{TransportClient, TransportConfig};
pub use retry::RetryPolicy;
