//! Remotes server
//!
//! Enrolls hosts through an RSA register/verify handshake and exchanges
//! encrypted commands and results with them over plain HTTP.

pub mod auth;
pub mod catalog;
pub mod enrollment;
pub mod error;
pub mod exchange;
pub mod server;
pub mod storage;

#[cfg(test)]
mod test_support;

pub use error::ApiError;
pub use server::{AppState, ServerConfig, build_router};
