//! SQLite storage for the Remotes server.
//!
//! Persists users, tokens, hosts, hosts groups, settings, the command
//! catalog, command outputs and per-host variable values.

mod db;
mod models;
mod queries;
mod queries_commands;

#[cfg(test)]
mod tests;

pub use db::ServerDatabase;
pub use models::*;
pub use queries::{ActivatedHost, HOSTS_GROUP_AUTO_ADD, SERVER_URL};
pub use queries_commands::{NewCommand, NewCommandsGroup};
pub use remotes_core::DatabaseError;
