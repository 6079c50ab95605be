//! Error types for the signaling engine.

use lookout_core::SessionId;

/// Failure reported by an external collaborator (authorization or
/// persistence).
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    /// The collaborator did not answer in time.
    #[error("timed out after {0}ms")]
    Timeout(u64),
    /// The collaborator could not be reached or crashed.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// The collaborator answered with an error.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Registry admission failures.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Registry is at capacity.
    #[error("registry full ({0} peers)")]
    Full(usize),
    /// A peer with the same session id is already registered.
    #[error("session {0} already registered")]
    Duplicate(SessionId),
}

/// Directory publish failures.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// The session is not (or no longer) in the registry.
    #[error("session {0} is not registered")]
    NotRegistered(SessionId),
    /// Broadcaster credentials are required but none were verified.
    #[error("session {0} has no verified broadcaster identity")]
    Unauthenticated(SessionId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(CollaboratorError::Timeout(500).to_string(), "timed out after 500ms");
        assert_eq!(RegistryError::Full(3).to_string(), "registry full (3 peers)");
        let id = SessionId::from_raw("peer_x");
        assert_eq!(
            DirectoryError::NotRegistered(id).to_string(),
            "session peer_x is not registered"
        );
    }
}
