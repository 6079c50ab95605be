//! Token signing and verification.

use std::fmt;
use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use lookout_core::{BroadcasterId, IssuedToken, UserId, UserRole, ViewerIdentity};

use crate::error::{AuthError, Result};

/// Audience every Lookout token is minted for.
pub const AUDIENCE: &str = "lookout-api";
/// Issuer every Lookout token carries.
pub const ISSUER: &str = "lookout-auth";

/// What a token may be used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Viewer session credential.
    Viewer,
    /// Long-lived broadcaster credential.
    Broadcaster,
    /// One-time credential handed out at install, exchanged on first use.
    Installation,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Viewer => "viewer",
            Self::Broadcaster => "broadcaster",
            Self::Installation => "installation",
        })
    }
}

/// JWT claims.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id for viewers, broadcaster id for broadcaster tokens.
    pub sub: String,
    /// Token purpose.
    #[serde(rename = "type")]
    pub kind: TokenKind,
    /// Login name (viewer tokens).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Account role (viewer tokens).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,
    /// Owning user (broadcaster tokens).
    #[serde(default, rename = "ownerId", skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Audience.
    pub aud: String,
    /// Issuer.
    pub iss: String,
    /// Issued at (Unix seconds).
    pub iat: i64,
    /// Expiry (Unix seconds).
    pub exp: i64,
}

/// Signs and verifies HS256 tokens with a shared secret.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    validation: Validation,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("algorithm", &Algorithm::HS256)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Create a service keyed by `secret`.
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[AUDIENCE]);
        validation.set_issuer(&[ISSUER]);
        validation.leeway = 30;
        Self {
            encoding_key: Arc::new(EncodingKey::from_secret(secret)),
            decoding_key: Arc::new(DecodingKey::from_secret(secret)),
            validation,
        }
    }

    fn sign(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key).map_err(AuthError::Sign)
    }

    fn claims(&self, sub: &str, kind: TokenKind, ttl: Duration) -> Claims {
        let now = Utc::now();
        Claims {
            sub: sub.to_owned(),
            kind,
            username: None,
            role: None,
            owner_id: None,
            aud: AUDIENCE.to_owned(),
            iss: ISSUER.to_owned(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }

    /// Issue a viewer token.
    pub fn issue_viewer(
        &self,
        user_id: &UserId,
        username: &str,
        role: UserRole,
        ttl: Duration,
    ) -> Result<String> {
        let mut claims = self.claims(user_id.as_str(), TokenKind::Viewer, ttl);
        claims.username = Some(username.to_owned());
        claims.role = Some(role);
        self.sign(&claims)
    }

    /// Issue a broadcaster or installation token.
    pub fn issue_broadcaster(
        &self,
        broadcaster_id: &BroadcasterId,
        owner_id: &UserId,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<IssuedToken> {
        let mut claims = self.claims(broadcaster_id.as_str(), kind, ttl);
        claims.owner_id = Some(owner_id.to_string());
        let token = self.sign(&claims)?;
        let expires_at = chrono::DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now);
        Ok(IssuedToken { token, expires_at })
    }

    /// Verify signature, audience, issuer, expiry and purpose.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        if data.claims.kind != expected {
            debug!(expected = %expected, actual = %data.claims.kind, "token type mismatch");
            return Err(AuthError::WrongKind {
                expected,
                actual: data.claims.kind,
            });
        }
        Ok(data.claims)
    }

    /// Verify a broadcaster credential of either kind.
    pub fn verify_broadcaster(&self, token: &str) -> Result<Claims> {
        match self.verify(token, TokenKind::Broadcaster) {
            Err(AuthError::WrongKind {
                actual: TokenKind::Installation,
                ..
            }) => self.verify(token, TokenKind::Installation),
            other => other,
        }
    }

    /// Verify a viewer bearer token and resolve the viewer's identity.
    pub fn verify_viewer(&self, token: &str) -> Result<ViewerIdentity> {
        let claims = self.verify(token, TokenKind::Viewer)?;
        if claims.sub.is_empty() {
            return Err(AuthError::MissingClaim("sub"));
        }
        Ok(ViewerIdentity {
            user_id: UserId::from_raw(claims.sub),
            username: claims.username.unwrap_or_default(),
            role: claims.role.unwrap_or_default(),
        })
    }
}
