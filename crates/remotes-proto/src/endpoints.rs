//! URL paths and the action names used to discover them.

use serde::{Deserialize, Serialize};

pub const API_STATUS: &str = "/api/status";
pub const DISCOVER: &str = "/api/v1/discover";
pub const PING: &str = "/api/v1/ping";
pub const HOST_REGISTER: &str = "/api/v1/host/register";
pub const HOST_VERIFY: &str = "/api/v1/host/verify";
pub const HOST_STATUS: &str = "/api/v1/host/status";
pub const COMMANDS_LIST: &str = "/api/v1/commands/list";
/// Followed by `/<id>`.
pub const COMMAND_GET: &str = "/api/v1/commands/get";
/// Followed by `/<id>`.
pub const COMMAND_POST: &str = "/api/v1/commands/post";

/// Action name to path map returned by the discover endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub command_get: String,
    pub command_post: String,
    pub commands_list: String,
    pub host_register: String,
    pub host_status: String,
    pub host_verify: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            command_get: COMMAND_GET.into(),
            command_post: COMMAND_POST.into(),
            commands_list: COMMANDS_LIST.into(),
            host_register: HOST_REGISTER.into(),
            host_status: HOST_STATUS.into(),
            host_verify: HOST_VERIFY.into(),
        }
    }
}

/// Join a server base URL and an absolute path without doubling slashes.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
