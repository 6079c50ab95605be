//! Branded identifier newtypes.
//!
//! Live ids (`SessionId`) are generated locally with a UUID v7 suffix.
//! Durable ids come from the persistence layer and are only ever wrapped.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier string.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

macro_rules! generated_id {
    ($name:ident, $prefix:expr) => {
        string_id!($name);

        impl $name {
            /// Generate a fresh identifier.
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

generated_id!(SessionId, "peer");
string_id!(BroadcasterId);
string_id!(UserId);
string_id!(GroupId);
string_id!(InstallationId);

impl InstallationId {
    /// Installation key for one monitor of a durable broadcaster.
    pub fn for_monitor(broadcaster: &BroadcasterId, monitor_number: u32) -> Self {
        Self(format!("{broadcaster}#{monitor_number}"))
    }
}
