//! Database connection and initialization.

pub use cipherline_core::db::DatabaseError;

cipherline_core::define_database!(Database, "Client database migrations complete");
