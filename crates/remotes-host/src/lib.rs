//! Remotes host agent
//!
//! Enrolls a host with a Remotes server, then fetches, runs and answers the
//! commands assigned to it.

pub mod agent;
pub mod api;
pub mod error;
pub mod executor;
pub mod monitor;
pub mod settings;

pub use agent::{ActionOutcome, HostAgent};
pub use error::AgentError;
pub use settings::HostSettings;
