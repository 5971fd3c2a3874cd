//! Cipherline CLI library.
//!
//! Subcommand handlers live here so they can be driven from tests without a
//! terminal; `main.rs` only parses arguments and prompts.

pub mod context;
pub mod identity_cmd;
pub mod message_cmd;
pub mod prompt;
pub mod trust_cmd;
