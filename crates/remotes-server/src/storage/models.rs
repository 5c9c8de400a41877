//! Data models for server storage.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub is_active: bool,
    pub can_register_hosts: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Host {
    pub id: i64,
    pub uuid: String,
    pub name: String,
    pub description: String,
    pub pubkey: String,
    pub user_id: Option<i64>,
    pub is_active: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HostsGroup {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Setting {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub value: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Command {
    pub id: i64,
    pub group_id: i64,
    pub name: String,
    pub description: String,
    pub body: String,
    pub timeout_secs: i64,
    pub sort_order: i64,
    pub is_active: bool,
}

/// A command still waiting for a result from one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingRow {
    pub command_id: i64,
    pub group_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CommandOutput {
    pub id: i64,
    pub command_id: i64,
    pub host_id: i64,
    pub output: String,
    pub result: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VariableValue {
    pub id: i64,
    pub host_id: i64,
    pub name: String,
    pub raw_value: String,
    pub updated_at: i64,
}
