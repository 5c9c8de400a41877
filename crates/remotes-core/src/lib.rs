//! `Remotes` core library
//!
//! Plumbing shared by the server and the host agent:
//! - `SQLite` pool setup, migrations macro and `DatabaseError`
//! - Tracing subscriber initialisation

pub mod db;
pub mod tracing_init;

pub use db::{DatabaseError, unix_timestamp};
