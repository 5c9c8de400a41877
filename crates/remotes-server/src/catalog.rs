//! Command catalog import.
//!
//! Settings, hosts groups, commands groups and commands are authored in a
//! TOML document and upserted by name, so loading the same file twice is a
//! no-op.
//!
//! ```toml
//! auto_add_group = "All hosts"
//!
//! [[settings]]
//! name = "backup_target"
//! value = "nas-01"
//!
//! [[hosts_groups]]
//! name = "Web servers"
//! members = ["6f1c0f4e-8d8e-4d0c-9a51-2b0f1c9d3e11"]
//!
//! [[commands_groups]]
//! name = "inventory"
//! hosts_group = "Web servers"
//! after = 0
//! before = 4102444800
//!
//! [[commands_groups.commands]]
//! name = "disks"
//! command = "print('sda')"
//! settings = ["backup_target"]
//! output_variables = ["disk_count"]
//! ```

use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::storage::{HOSTS_GROUP_AUTO_ADD, NewCommand, NewCommandsGroup, ServerDatabase};

pub const DEFAULT_TIMEOUT_SECS: i64 = 15;

const fn default_true() -> bool {
    true
}

const fn default_timeout() -> i64 {
    DEFAULT_TIMEOUT_SECS
}

const fn default_before() -> i64 {
    i64::MAX
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Catalog {
    /// Hosts group newly verified hosts join.
    #[serde(default)]
    pub auto_add_group: Option<String>,
    #[serde(default)]
    pub settings: Vec<SettingEntry>,
    #[serde(default)]
    pub hosts_groups: Vec<HostsGroupEntry>,
    #[serde(default)]
    pub commands_groups: Vec<CommandsGroupEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingEntry {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostsGroupEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Host UUIDs. Hosts not registered yet are skipped with a warning.
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandsGroupEntry {
    pub name: String,
    pub hosts_group: String,
    #[serde(default)]
    pub order: i64,
    /// Unix seconds; the group is visible strictly after this instant.
    #[serde(default)]
    pub after: i64,
    /// Unix seconds; the group is visible strictly before this instant.
    #[serde(default = "default_before")]
    pub before: i64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub commands: Vec<CommandEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub command: String,
    #[serde(default = "default_timeout")]
    pub timeout: i64,
    #[serde(default)]
    pub order: i64,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Names of settings passed to the command.
    #[serde(default)]
    pub settings: Vec<String>,
    /// Names of host variables passed to the command.
    #[serde(default)]
    pub variables: Vec<String>,
    /// Variables filled, by position, from the command result.
    #[serde(default)]
    pub output_variables: Vec<String>,
}

/// Counts of what a load touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogSummary {
    pub settings: usize,
    pub hosts_groups: usize,
    pub members: usize,
    pub commands_groups: usize,
    pub commands: usize,
}

impl Catalog {
    pub fn parse(text: &str) -> Result<Self, ApiError> {
        toml::from_str(text).map_err(|e| ApiError::Validation(format!("Invalid catalog: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Self, ApiError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ApiError::Validation(format!("Cannot read {}: {e}", path.display())))?;
        Self::parse(&text)
    }

    fn validate(&self) -> Result<(), ApiError> {
        for group in &self.commands_groups {
            if group.after >= group.before {
                return Err(ApiError::Validation(format!(
                    "Commands group {}: after must be earlier than before",
                    group.name
                )));
            }
            if let Some(command) = group.commands.iter().find(|c| c.timeout <= 0) {
                return Err(ApiError::Validation(format!(
                    "Command {}: timeout must be positive",
                    command.name
                )));
            }
        }
        Ok(())
    }

    /// Upsert everything into `db`. References to unknown hosts groups or
    /// settings fail the load.
    pub async fn apply(&self, db: &ServerDatabase) -> Result<CatalogSummary, ApiError> {
        self.validate()?;
        let mut summary = CatalogSummary::default();

        for setting in &self.settings {
            db.upsert_setting(
                &setting.name,
                setting.value.as_deref(),
                &setting.description,
                setting.active,
            )
            .await?;
            summary.settings += 1;
        }

        for group in &self.hosts_groups {
            let group_id = db
                .upsert_hosts_group(&group.name, &group.description, group.active)
                .await?;
            summary.hosts_groups += 1;
            for uuid in &group.members {
                match db.get_host_by_uuid(uuid).await? {
                    Some(host) => {
                        db.add_host_to_group(group_id, host.id).await?;
                        summary.members += 1;
                    }
                    None => warn!(host_uuid = %uuid, group = %group.name, "Unknown host skipped"),
                }
            }
        }

        if let Some(name) = &self.auto_add_group {
            db.upsert_setting(
                HOSTS_GROUP_AUTO_ADD,
                Some(name),
                "Hosts group newly verified hosts join",
                true,
            )
            .await?;
        }

        for group in &self.commands_groups {
            let hosts_group = db
                .get_hosts_group_by_name(&group.hosts_group)
                .await?
                .ok_or_else(|| {
                    ApiError::Validation(format!("Unknown hosts group {}", group.hosts_group))
                })?;
            let group_id = db
                .upsert_commands_group(&NewCommandsGroup {
                    name: &group.name,
                    hosts_group_id: hosts_group.id,
                    sort_order: group.order,
                    after_ts: group.after,
                    before_ts: group.before,
                    is_active: group.active,
                })
                .await?;
            summary.commands_groups += 1;

            for command in &group.commands {
                load_command(db, group_id, command).await?;
                summary.commands += 1;
            }
        }

        info!(
            settings = summary.settings,
            hosts_groups = summary.hosts_groups,
            commands_groups = summary.commands_groups,
            commands = summary.commands,
            "Catalog loaded"
        );
        Ok(summary)
    }
}

async fn load_command(
    db: &ServerDatabase,
    group_id: i64,
    command: &CommandEntry,
) -> Result<(), ApiError> {
    let command_id = db
        .upsert_command(&NewCommand {
            group_id,
            name: &command.name,
            description: &command.description,
            body: &command.command,
            timeout_secs: command.timeout,
            sort_order: command.order,
            is_active: command.active,
        })
        .await?;

    let mut setting_ids = Vec::with_capacity(command.settings.len());
    for name in &command.settings {
        let setting = db
            .get_setting_by_name(name)
            .await?
            .ok_or_else(|| ApiError::Validation(format!("Unknown setting {name}")))?;
        setting_ids.push(setting.id);
    }
    db.set_command_settings(command_id, &setting_ids).await?;
    db.set_command_input_variables(command_id, &command.variables).await?;
    db.set_command_output_variables(command_id, &command.output_variables)
        .await?;
    Ok(())
}
