//! # lookout-store
//!
//! SQLite persistence backing the Lookout collaborators: users, durable
//! broadcasters and their tokens, viewer permission grants, and telemetry
//! history with retention pruning.

#![deny(unsafe_code)]

pub mod activity;
pub mod broadcasters;
pub mod database;
pub mod error;
pub mod permissions;
pub mod schema;
pub mod users;

pub use activity::{ActivityRepo, BrowserHistoryRow, RecordOutcome};
pub use broadcasters::{BroadcasterRepo, BroadcasterRow, TokenMatch};
pub use database::Database;
pub use error::StoreError;
pub use permissions::PermissionRepo;
pub use users::{UserRepo, UserRow};
