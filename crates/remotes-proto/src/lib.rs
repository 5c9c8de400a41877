//! Wire contract between the Remotes server and its hosts.
//!
//! Every body is JSON with a `status` field of `"OK"` or `"ERROR"`.
//! Field names are kept stable so that any host agent speaking this
//! contract can talk to the server.

pub mod endpoints;
pub mod v1;

pub use endpoints::Endpoints;

/// Literal string a host signs to prove possession of its private key.
pub const VERIFY_CHALLENGE: &str = "OK";
