//! JSON wire protocol spoken over the signaling socket.
//!
//! Every frame is a JSON object with a `type` tag. Inbound frames are
//! parsed into [`InboundMessage`]; anything the server sends is an
//! [`OutboundMessage`], except relayed negotiation frames which keep the
//! sender's payload verbatim (see [`negotiation_envelope`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::ids::{GroupId, SessionId};
use crate::telemetry::TelemetryReport;

/// Errors raised while decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame is not a JSON object with a string `type`.
    #[error("malformed envelope: {0}")]
    Malformed(String),
    /// `type` is not one the server understands.
    #[error("unknown message type: {0}")]
    UnknownType(String),
    /// Known `type` but the fields did not decode.
    #[error("invalid {kind} message: {source}")]
    InvalidFields {
        /// Message type being decoded.
        kind: &'static str,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
}

/// Role declaration sent by a broadcaster.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct BroadcasterHello {
    /// Monitor being streamed (1-based).
    #[serde(default, deserialize_with = "lenient_u32")]
    pub monitor_number: Option<u32>,
    /// Display name.
    #[serde(default)]
    pub broadcaster_name: Option<String>,
    /// Group (company) the broadcaster belongs to.
    #[serde(default, deserialize_with = "lenient_string")]
    pub company_id: Option<String>,
    /// Long-lived broadcaster token or one-day installation token.
    #[serde(default)]
    pub broadcaster_token: Option<String>,
    /// Durable id the client believes it has; informational only.
    #[serde(default, deserialize_with = "lenient_string")]
    pub broadcaster_id: Option<String>,
}

impl BroadcasterHello {
    /// Monitor number, defaulting to 1.
    pub fn monitor(&self) -> u32 {
        self.monitor_number.unwrap_or(1)
    }

    /// Group id, defaulting to `-1`.
    pub fn group(&self) -> GroupId {
        GroupId::from_raw(
            self.company_id
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "-1".to_owned()),
        )
    }
}

/// A viewer asking to watch a broadcaster session.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct WatchRequest {
    /// Broadcaster session to watch.
    #[serde(rename = "targetId")]
    pub target_id: SessionId,
    /// Monitor the viewer expects.
    #[serde(default, deserialize_with = "lenient_u32")]
    pub monitor_number: Option<u32>,
}

/// Which negotiation step a relayed frame carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NegotiationKind {
    /// SDP offer.
    Offer,
    /// SDP answer.
    Answer,
    /// ICE candidate.
    Candidate,
}

impl NegotiationKind {
    /// Wire tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
        }
    }
}

/// A decoded client → server frame.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundMessage {
    /// `broadcaster` role declaration.
    Broadcaster(BroadcasterHello),
    /// `viewer` role declaration.
    Viewer,
    /// `watch` request.
    Watch(WatchRequest),
    /// `offer` / `answer` / `candidate`.
    Negotiation {
        /// Which step.
        kind: NegotiationKind,
        /// Peer to forward to.
        target_id: SessionId,
        /// Every field except `type` and `targetId`.
        payload: Map<String, Value>,
    },
    /// `monitoring` telemetry report.
    Monitoring(Box<TelemetryReport>),
}

impl InboundMessage {
    /// Decode one text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(ProtocolError::Malformed("expected a JSON object".into()));
        };
        let kind = match fields.remove("type") {
            Some(Value::String(s)) => s,
            Some(_) => return Err(ProtocolError::Malformed("`type` must be a string".into())),
            None => return Err(ProtocolError::Malformed("missing `type`".into())),
        };

        match kind.as_str() {
            "broadcaster" => decode("broadcaster", fields).map(Self::Broadcaster),
            "viewer" => Ok(Self::Viewer),
            "watch" => decode("watch", fields).map(Self::Watch),
            "offer" => negotiation(NegotiationKind::Offer, fields),
            "answer" => negotiation(NegotiationKind::Answer, fields),
            "candidate" => negotiation(NegotiationKind::Candidate, fields),
            "monitoring" => decode("monitoring", fields).map(|r| Self::Monitoring(Box::new(r))),
            _ => Err(ProtocolError::UnknownType(kind)),
        }
    }

    /// Wire tag of this message, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Broadcaster(_) => "broadcaster",
            Self::Viewer => "viewer",
            Self::Watch(_) => "watch",
            Self::Negotiation { kind, .. } => kind.as_str(),
            Self::Monitoring(_) => "monitoring",
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    kind: &'static str,
    fields: Map<String, Value>,
) -> Result<T, ProtocolError> {
    serde_json::from_value(Value::Object(fields))
        .map_err(|source| ProtocolError::InvalidFields { kind, source })
}

fn negotiation(
    kind: NegotiationKind,
    mut payload: Map<String, Value>,
) -> Result<InboundMessage, ProtocolError> {
    let target_id = match payload.remove("targetId") {
        Some(Value::String(s)) if !s.is_empty() => SessionId::from_raw(s),
        _ => {
            return Err(ProtocolError::InvalidFields {
                kind: kind.as_str(),
                source: serde::de::Error::missing_field("targetId"),
            });
        }
    };
    Ok(InboundMessage::Negotiation {
        kind,
        target_id,
        payload,
    })
}

/// Build the frame delivered to the target of a negotiation relay.
///
/// The sender's payload is kept verbatim and re-tagged with `type` and
/// `senderId`.
pub fn negotiation_envelope(
    kind: NegotiationKind,
    sender: &SessionId,
    payload: &Map<String, Value>,
) -> String {
    let mut frame = payload.clone();
    let _ = frame.insert("type".into(), Value::String(kind.as_str().into()));
    let _ = frame.insert("senderId".into(), Value::String(sender.to_string()));
    Value::Object(frame).to_string()
}

/// One row of a `broadcaster-list` snapshot.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BroadcasterSummary {
    /// Broadcaster session id (the `targetId` to watch).
    pub id: SessionId,
    /// Display name.
    pub name: String,
    /// Monitor being streamed.
    pub monitor_number: u32,
    /// Group id.
    pub company_id: GroupId,
}

/// A server → client frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
    /// Directory snapshot for a newly registered viewer.
    BroadcasterList {
        /// Visible broadcasters, sorted by name.
        broadcasters: Vec<BroadcasterSummary>,
    },
    /// A broadcaster was published.
    NewBroadcaster {
        /// Broadcaster session id.
        #[serde(rename = "broadcasterId")]
        broadcaster_id: SessionId,
        /// Display name.
        broadcaster_name: String,
        /// Monitor being streamed.
        monitor_number: u32,
        /// Group id.
        company_id: GroupId,
    },
    /// A broadcaster left the directory.
    BroadcasterLeft {
        /// Broadcaster session id.
        #[serde(rename = "broadcasterId")]
        broadcaster_id: SessionId,
    },
    /// Sent to a broadcaster when a viewer starts watching.
    NewViewer {
        /// Viewer session id.
        #[serde(rename = "viewerId")]
        viewer_id: SessionId,
        /// Monitor requested by the viewer.
        monitor_number: u32,
    },
    /// Sent to a viewer once its watch request is accepted.
    ViewerJoined {
        /// Broadcaster session id.
        #[serde(rename = "broadcasterId")]
        broadcaster_id: SessionId,
        /// Display name.
        broadcaster_name: String,
        /// Monitor being streamed.
        monitor_number: u32,
    },
    /// Sent to a broadcaster when its viewer leaves or retargets.
    ViewerDisconnected {
        /// Viewer session id.
        #[serde(rename = "viewerId")]
        viewer_id: SessionId,
    },
    /// Sent to a broadcaster after its credential was accepted.
    AuthSuccess {
        /// Durable broadcaster id.
        broadcaster_id: String,
        /// Freshly issued long-lived token.
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        /// Expiry of `token`.
        #[serde(skip_serializing_if = "Option::is_none")]
        token_expires_at: Option<DateTime<Utc>>,
    },
    /// Live telemetry for a watched broadcaster.
    Monitoring {
        /// Broadcaster session id.
        #[serde(rename = "broadcasterId")]
        broadcaster_id: SessionId,
        /// Normalised report.
        data: Value,
    },
    /// Denial or processing failure.
    Error {
        /// Human readable message.
        message: String,
    },
}

impl OutboundMessage {
    /// Shorthand for an `error` frame.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn lenient_u32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
