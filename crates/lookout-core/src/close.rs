//! WebSocket close codes used by the signaling server.

/// Why the server closed a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Viewer connected without a bearer token.
    MissingToken,
    /// Viewer bearer token failed verification.
    InvalidToken,
    /// `role` connection parameter missing or unknown.
    MissingRole,
    /// Broadcaster credential rejected during registration.
    BroadcasterAuthFailed,
    /// Another connection took over the same installation.
    Superseded,
    /// Peer stopped answering heartbeats.
    HeartbeatTimeout,
    /// Connection limit reached.
    ServerFull,
    /// Server is shutting down.
    Shutdown,
}

impl CloseReason {
    /// Numeric close code sent in the close frame.
    pub fn code(self) -> u16 {
        match self {
            Self::MissingToken => 4001,
            Self::InvalidToken => 4002,
            Self::MissingRole => 4003,
            Self::BroadcasterAuthFailed => 4004,
            Self::Superseded => 4005,
            Self::HeartbeatTimeout => 4008,
            Self::ServerFull => 1013,
            Self::Shutdown => 1001,
        }
    }

    /// Human readable reason sent in the close frame.
    pub fn message(self) -> &'static str {
        match self {
            Self::MissingToken => "token required for viewer role",
            Self::InvalidToken => "invalid token",
            Self::MissingRole => "role not specified",
            Self::BroadcasterAuthFailed => "broadcaster authentication failed",
            Self::Superseded => "installation reconnected elsewhere",
            Self::HeartbeatTimeout => "heartbeat timeout",
            Self::ServerFull => "server full",
            Self::Shutdown => "server shutting down",
        }
    }
}
