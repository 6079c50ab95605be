//! # lookout-server
//!
//! Realtime signaling and session relay for Lookout.
//!
//! Broadcasters publish themselves over a WebSocket, viewers discover the
//! ones they are permitted to see and ask to watch one. The server relays
//! opaque WebRTC negotiation payloads between them, fans broadcaster
//! telemetry out to permitted watchers, and evicts silent peers.
//!
//! - [`signaling`]: registry, directory, permission gate, relay, fan-out, liveness
//! - [`websocket`]: per-connection reader/writer tasks and close codes
//! - [`server`]: Axum router, `/health`, `/metrics`, listen and shutdown
//! - [`backends`]: SQLite-backed authorizer and telemetry sink

#![deny(unsafe_code)]

pub mod backends;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod signaling;
pub mod websocket;

#[cfg(test)]
mod test_support;

pub use backends::{StoreAuthorizer, StoreTelemetrySink, spawn_retention_task};
pub use config::ServerConfig;
pub use server::{AppState, LookoutServer, ServerHandle, build_router};
pub use shutdown::ShutdownCoordinator;
pub use signaling::{HubConfig, SignalingHub};
