//! Signaling engine.
//!
//! - [`registry`]: every live connection and its per-peer state
//! - [`directory`]: published broadcasters and the installation index
//! - [`gate`]: timeout-bounded, fail-closed authorization
//! - [`relay`]: opaque offer/answer/candidate forwarding
//! - [`fanout`]: telemetry delivery to watchers plus persistence hand-off
//! - [`liveness`]: heartbeat probing and eviction
//! - [`hub`]: message routing and the disconnect cascade

pub mod directory;
pub mod fanout;
pub mod gate;
pub mod hub;
pub mod liveness;
pub mod peer;
pub mod registry;
pub mod relay;

pub use directory::{BroadcasterInfo, Directory, DirectoryEntry, PublishOutcome};
pub use fanout::{FanoutSummary, TelemetryFanout, TelemetrySink, TelemetrySource};
pub use gate::{Authorizer, PermissionGate, Verdict};
pub use hub::{HubConfig, SignalingHub};
pub use liveness::{LivenessConfig, LivenessMonitor, SweepOutcome};
pub use peer::{AdmittedRole, Peer, PeerRole, PeerState};
pub use registry::Registry;
pub use relay::{NegotiationRelay, RelayOutcome};
