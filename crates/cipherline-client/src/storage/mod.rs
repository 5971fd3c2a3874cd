//! `SQLite` storage for the Cipherline client.
//!
//! Holds password-sealed identity packages and pinned peer identities.

mod db;
mod models;
mod queries;

pub use db::{Database, DatabaseError};
pub use models::*;
pub use queries::NewLockedKey;
