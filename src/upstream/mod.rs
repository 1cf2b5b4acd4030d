//! Upstream provider access: pooled sessions, typed client, wire types

pub mod client;
pub mod pool;
pub mod types;

pub use client::{CompletionBackend, UpstreamClient};
pub use pool::{ConnectionPool, PoolStats};
pub use types::{CompletionRequest, CompletionResponse, HttpResponse};
