//! Authentication error types.

use thiserror::Error;

use crate::jwt::TokenKind;

/// Errors raised while issuing or verifying tokens.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token is past its expiry.
    #[error("token expired")]
    Expired,
    /// Signature, audience, issuer or encoding did not verify.
    #[error("invalid token: {0}")]
    Invalid(String),
    /// Token verified but was minted for another purpose.
    #[error("token type mismatch: expected {expected}, got {actual}")]
    WrongKind {
        /// Kind the caller asked for.
        expected: TokenKind,
        /// Kind carried in the claims.
        actual: TokenKind,
    },
    /// A claim required for this token kind is absent.
    #[error("missing claim: {0}")]
    MissingClaim(&'static str),
    /// Signing failed.
    #[error("failed to sign token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::Invalid(e.to_string()),
        }
    }
}

/// Result type for auth operations.
pub type Result<T> = std::result::Result<T, AuthError>;
