//! # lookout-core
//!
//! Types shared by every Lookout crate:
//!
//! - Branded identifiers for live sessions and durable records
//! - Resolved viewer/broadcaster identities
//! - The JSON wire protocol spoken over the signaling socket
//! - Telemetry report shapes and close codes

#![deny(unsafe_code)]

pub mod close;
pub mod identity;
pub mod ids;
pub mod protocol;
pub mod telemetry;

pub use close::CloseReason;
pub use identity::{BroadcasterIdentity, IssuedToken, UserRole, ViewerIdentity};
pub use ids::{BroadcasterId, GroupId, InstallationId, SessionId, UserId};
pub use protocol::{
    BroadcasterHello, BroadcasterSummary, InboundMessage, NegotiationKind, OutboundMessage,
    ProtocolError, WatchRequest, negotiation_envelope,
};
pub use telemetry::{BrowserVisit, TelemetryReport};
