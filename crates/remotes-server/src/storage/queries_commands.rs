//! Command catalog, pending-command and result queries.

use remotes_core::DatabaseError;
use remotes_core::db::unix_timestamp;

use super::db::ServerDatabase;
use super::models::{Command, CommandOutput, PendingRow, Setting, VariableValue};

/// Parameters for creating or updating a commands group.
#[derive(Debug, Clone)]
pub struct NewCommandsGroup<'a> {
    pub name: &'a str,
    pub hosts_group_id: i64,
    pub sort_order: i64,
    pub after_ts: i64,
    pub before_ts: i64,
    pub is_active: bool,
}

/// Parameters for creating or updating a command.
#[derive(Debug, Clone)]
pub struct NewCommand<'a> {
    pub group_id: i64,
    pub name: &'a str,
    pub description: &'a str,
    pub body: &'a str,
    pub timeout_secs: i64,
    pub sort_order: i64,
    pub is_active: bool,
}

/// Joins that decide whether a host may see a command. Bound parameter
/// order: host id, then whatever the caller appends.
const HOST_COMMAND_JOINS: &str = "FROM commands c
     JOIN commands_groups g ON g.id = c.group_id
     JOIN hosts_group_members m ON m.hosts_group_id = g.hosts_group_id
     JOIN hosts_groups hg ON hg.id = g.hosts_group_id
     JOIN hosts h ON h.id = m.host_id
     WHERE h.id = ?";

/// Visibility filter: everything active and `after < now < before`.
const VISIBLE_FILTER: &str = "AND h.is_active = 1 AND hg.is_active = 1
     AND g.is_active = 1 AND c.is_active = 1
     AND g.after_ts < ? AND g.before_ts > ?";

impl ServerDatabase {
    // =========================================================================
    // Catalog
    // =========================================================================

    pub async fn upsert_commands_group(
        &self,
        group: &NewCommandsGroup<'_>,
    ) -> Result<i64, DatabaseError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO commands_groups
                (name, hosts_group_id, sort_order, after_ts, before_ts, is_active)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                hosts_group_id = excluded.hosts_group_id,
                sort_order = excluded.sort_order,
                after_ts = excluded.after_ts,
                before_ts = excluded.before_ts,
                is_active = excluded.is_active
             RETURNING id",
        )
        .bind(group.name)
        .bind(group.hosts_group_id)
        .bind(group.sort_order)
        .bind(group.after_ts)
        .bind(group.before_ts)
        .bind(group.is_active)
        .fetch_one(self.pool())
        .await?;
        Ok(id)
    }

    pub async fn upsert_command(&self, command: &NewCommand<'_>) -> Result<i64, DatabaseError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO commands
                (group_id, name, description, body, timeout_secs, sort_order, is_active)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(group_id, name) DO UPDATE SET
                description = excluded.description,
                body = excluded.body,
                timeout_secs = excluded.timeout_secs,
                sort_order = excluded.sort_order,
                is_active = excluded.is_active
             RETURNING id",
        )
        .bind(command.group_id)
        .bind(command.name)
        .bind(command.description)
        .bind(command.body)
        .bind(command.timeout_secs)
        .bind(command.sort_order)
        .bind(command.is_active)
        .fetch_one(self.pool())
        .await?;
        Ok(id)
    }

    pub async fn get_setting_by_name(&self, name: &str) -> Result<Option<Setting>, DatabaseError> {
        let setting = sqlx::query_as::<_, Setting>("SELECT * FROM settings WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        Ok(setting)
    }

    /// Replace the input settings of a command.
    pub async fn set_command_settings(
        &self,
        command_id: i64,
        setting_ids: &[i64],
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM command_settings WHERE command_id = ?")
            .bind(command_id)
            .execute(&mut *tx)
            .await?;
        for setting_id in setting_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO command_settings (command_id, setting_id) VALUES (?, ?)",
            )
            .bind(command_id)
            .bind(*setting_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Replace the input variable names of a command.
    pub async fn set_command_input_variables(
        &self,
        command_id: i64,
        names: &[String],
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM command_input_variables WHERE command_id = ?")
            .bind(command_id)
            .execute(&mut *tx)
            .await?;
        for name in names {
            sqlx::query(
                "INSERT OR IGNORE INTO command_input_variables (command_id, name) VALUES (?, ?)",
            )
            .bind(command_id)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Replace the ordered output variables of a command.
    pub async fn set_command_output_variables(
        &self,
        command_id: i64,
        names: &[String],
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM command_output_variables WHERE command_id = ?")
            .bind(command_id)
            .execute(&mut *tx)
            .await?;
        for (position, name) in (0_i64..).zip(names) {
            sqlx::query(
                "INSERT INTO command_output_variables (command_id, position, name) VALUES (?, ?, ?)",
            )
            .bind(command_id)
            .bind(position)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // =========================================================================
    // Host-facing lookups
    // =========================================================================

    /// Commands visible to a host at `now` with no recorded output from it,
    /// ordered by group order then command order.
    pub async fn list_pending_commands(
        &self,
        host_id: i64,
        now: i64,
    ) -> Result<Vec<PendingRow>, DatabaseError> {
        let sql = format!(
            "SELECT c.id AS command_id, g.id AS group_id {HOST_COMMAND_JOINS} {VISIBLE_FILTER}
             AND NOT EXISTS (
                SELECT 1 FROM command_outputs o WHERE o.command_id = c.id AND o.host_id = h.id
             )
             ORDER BY g.sort_order, g.id, c.sort_order, c.id"
        );
        let rows = sqlx::query_as::<_, PendingRow>(&sql)
            .bind(host_id)
            .bind(now)
            .bind(now)
            .fetch_all(self.pool())
            .await?;
        Ok(rows)
    }

    /// A command the host may fetch at `now`.
    pub async fn get_visible_command(
        &self,
        host_id: i64,
        command_id: i64,
        now: i64,
    ) -> Result<Option<Command>, DatabaseError> {
        let sql = format!("SELECT c.* {HOST_COMMAND_JOINS} {VISIBLE_FILTER} AND c.id = ?");
        let command = sqlx::query_as::<_, Command>(&sql)
            .bind(host_id)
            .bind(now)
            .bind(now)
            .bind(command_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(command)
    }

    /// A command targeting one of the host's groups, ignoring time windows
    /// and active flags. Results may arrive after a window closes.
    pub async fn get_command_for_host(
        &self,
        host_id: i64,
        command_id: i64,
    ) -> Result<Option<Command>, DatabaseError> {
        let sql = format!("SELECT c.* {HOST_COMMAND_JOINS} AND c.id = ?");
        let command = sqlx::query_as::<_, Command>(&sql)
            .bind(host_id)
            .bind(command_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(command)
    }

    /// `(name, value)` of every setting a command takes as input.
    pub async fn list_command_settings(
        &self,
        command_id: i64,
    ) -> Result<Vec<(String, Option<String>)>, DatabaseError> {
        let rows = sqlx::query_as::<_, (String, Option<String>)>(
            "SELECT s.name, s.value FROM settings s
             JOIN command_settings cs ON cs.setting_id = s.id
             WHERE cs.command_id = ? ORDER BY s.name",
        )
        .bind(command_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// `(name, value)` of every input variable, resolved for one host.
    /// Variables the host never produced are `None`.
    pub async fn list_command_variables(
        &self,
        host_id: i64,
        command_id: i64,
    ) -> Result<Vec<(String, Option<String>)>, DatabaseError> {
        let rows = sqlx::query_as::<_, (String, Option<String>)>(
            "SELECT v.name, vv.raw_value FROM command_input_variables v
             LEFT JOIN variable_values vv ON vv.name = v.name AND vv.host_id = ?
             WHERE v.command_id = ? ORDER BY v.name",
        )
        .bind(host_id)
        .bind(command_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn list_output_variables(&self, command_id: i64) -> Result<Vec<String>, DatabaseError> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT name FROM command_output_variables WHERE command_id = ? ORDER BY position",
        )
        .bind(command_id)
        .fetch_all(self.pool())
        .await?;
        Ok(names)
    }

    // =========================================================================
    // Results
    // =========================================================================

    /// Store a command output and the variable values it produced, atomically.
    pub async fn record_command_output(
        &self,
        command_id: i64,
        host_id: i64,
        output: &str,
        result: &str,
        variables: &[(String, String)],
    ) -> Result<CommandOutput, DatabaseError> {
        let now = unix_timestamp();
        let mut tx = self.pool().begin().await?;

        let stored = sqlx::query_as::<_, CommandOutput>(
            "INSERT INTO command_outputs (command_id, host_id, output, result, created_at)
             VALUES (?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(command_id)
        .bind(host_id)
        .bind(output)
        .bind(result)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        for (name, value) in variables {
            sqlx::query(
                "INSERT INTO variable_values (host_id, name, raw_value, updated_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(host_id, name) DO UPDATE SET
                    raw_value = excluded.raw_value,
                    updated_at = excluded.updated_at",
            )
            .bind(host_id)
            .bind(name)
            .bind(value)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(stored)
    }

    pub async fn list_command_outputs(
        &self,
        host_id: i64,
    ) -> Result<Vec<CommandOutput>, DatabaseError> {
        let outputs = sqlx::query_as::<_, CommandOutput>(
            "SELECT * FROM command_outputs WHERE host_id = ? ORDER BY id",
        )
        .bind(host_id)
        .fetch_all(self.pool())
        .await?;
        Ok(outputs)
    }

    pub async fn list_variable_values(
        &self,
        host_id: i64,
    ) -> Result<Vec<VariableValue>, DatabaseError> {
        let values = sqlx::query_as::<_, VariableValue>(
            "SELECT * FROM variable_values WHERE host_id = ? ORDER BY name",
        )
        .bind(host_id)
        .fetch_all(self.pool())
        .await?;
        Ok(values)
    }
}
