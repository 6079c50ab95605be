//! Point-to-point forwarding of negotiation frames.

use std::sync::Arc;

use lookout_core::{NegotiationKind, SessionId, negotiation_envelope};
use metrics::counter;
use serde_json::{Map, Value};
use tracing::debug;

use crate::metrics::SIGNAL_RELAYED_TOTAL;

use super::registry::Registry;

/// What happened to a relayed frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Queued on the target connection.
    Delivered,
    /// Target is not registered.
    TargetMissing,
    /// Target connection is closed or its queue is full.
    TargetUnwritable,
}

/// Forwards offers, answers and candidates between peers.
///
/// Payloads are opaque; only `type` and `senderId` are added.
pub struct NegotiationRelay {
    registry: Arc<Registry>,
}

impl NegotiationRelay {
    /// Relay over `registry`.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Forward `payload` from `sender` to `target`.
    pub fn relay(
        &self,
        sender: &SessionId,
        target: &SessionId,
        kind: NegotiationKind,
        payload: &Map<String, Value>,
    ) -> RelayOutcome {
        let Some(peer) = self.registry.get(target) else {
            debug!(sender = %sender, target = %target, kind = kind.as_str(), "relay target not found");
            return RelayOutcome::TargetMissing;
        };
        let frame = Arc::new(negotiation_envelope(kind, sender, payload));
        if peer.connection().send(frame) {
            counter!(SIGNAL_RELAYED_TOTAL, "kind" => kind.as_str()).increment(1);
            RelayOutcome::Delivered
        } else {
            debug!(sender = %sender, target = %target, kind = kind.as_str(), "relay target unwritable");
            RelayOutcome::TargetUnwritable
        }
    }
}
