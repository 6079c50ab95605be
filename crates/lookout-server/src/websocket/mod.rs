//! WebSocket transport: per-connection outbound queue and session loop.

pub mod connection;
pub mod session;
