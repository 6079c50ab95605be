//! # lookout-auth
//!
//! HS256 bearer tokens for the Lookout signaling server. Viewers present a
//! `viewer` token at connect time; broadcasters present a long-lived
//! `broadcaster` token or a one-day `installation` token that gets
//! exchanged on first use.

#![deny(unsafe_code)]

pub mod error;
pub mod jwt;

pub use error::{AuthError, Result};
pub use jwt::{AUDIENCE, Claims, ISSUER, TokenKind, TokenService};
