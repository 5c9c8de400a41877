//! Identity, host and settings queries.

use remotes_core::db::unix_timestamp;

use super::db::ServerDatabase;
use super::models::{Host, HostsGroup, Setting, User};
use remotes_core::DatabaseError;

/// Setting naming the hosts group that newly verified hosts join.
pub const HOSTS_GROUP_AUTO_ADD: &str = "hosts_group_auto_add";

/// Setting overriding the public server URL.
pub const SERVER_URL: &str = "server_url";

/// Outcome of [`ServerDatabase::activate_host`].
#[derive(Debug, Clone)]
pub struct ActivatedHost {
    pub user: User,
    /// Hosts group the host was auto-enrolled into, if any.
    pub auto_group: Option<String>,
}

impl ServerDatabase {
    // =========================================================================
    // User queries
    // =========================================================================

    pub async fn create_user(
        &self,
        username: &str,
        can_register_hosts: bool,
    ) -> Result<User, DatabaseError> {
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (username, is_active, can_register_hosts, created_at)
             VALUES (?, 1, ?, ?) RETURNING *",
        )
        .bind(username)
        .bind(can_register_hosts)
        .bind(unix_timestamp())
        .fetch_one(self.pool())
        .await?;
        Ok(user)
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, DatabaseError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.pool())
            .await?;
        Ok(user)
    }

    /// Find the active user owning a token hash.
    pub async fn get_user_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<User>, DatabaseError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT u.* FROM users u JOIN tokens t ON t.user_id = u.id
             WHERE t.token_hash = ? AND u.is_active = 1",
        )
        .bind(token_hash)
        .fetch_optional(self.pool())
        .await?;
        Ok(user)
    }

    // =========================================================================
    // Token queries
    // =========================================================================

    /// Store the token hash for a user, replacing any previous one.
    pub async fn set_token(&self, user_id: i64, token_hash: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO tokens (user_id, token_hash, created_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                token_hash = excluded.token_hash,
                created_at = excluded.created_at",
        )
        .bind(user_id)
        .bind(token_hash)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn count_tokens(&self) -> Result<i64, DatabaseError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tokens")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    // =========================================================================
    // Host queries
    // =========================================================================

    /// Insert a pending host: inactive and without a user.
    pub async fn create_host(&self, uuid: &str, pubkey: &str) -> Result<Host, DatabaseError> {
        let host = sqlx::query_as::<_, Host>(
            "INSERT INTO hosts (uuid, name, pubkey, is_active, created_at)
             VALUES (?, ?, ?, 0, ?) RETURNING *",
        )
        .bind(uuid)
        .bind(uuid)
        .bind(pubkey)
        .bind(unix_timestamp())
        .fetch_one(self.pool())
        .await?;
        Ok(host)
    }

    pub async fn get_host_by_uuid(&self, uuid: &str) -> Result<Option<Host>, DatabaseError> {
        let host = sqlx::query_as::<_, Host>("SELECT * FROM hosts WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(self.pool())
            .await?;
        Ok(host)
    }

    /// The active host bound to a user.
    pub async fn get_active_host_for_user(&self, user_id: i64) -> Result<Option<Host>, DatabaseError> {
        let host =
            sqlx::query_as::<_, Host>("SELECT * FROM hosts WHERE user_id = ? AND is_active = 1")
                .bind(user_id)
                .fetch_optional(self.pool())
                .await?;
        Ok(host)
    }

    pub async fn count_active_hosts(&self) -> Result<i64, DatabaseError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM hosts WHERE is_active = 1")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    /// PENDING -> ACTIVE in one transaction: create the user named after the
    /// host UUID, bind and activate the host, store the token hash and join
    /// the auto-add hosts group.
    ///
    /// The UNIQUE constraints on `users.username` and `hosts.user_id` decide
    /// concurrent attempts: the loser gets [`DatabaseError::Conflict`].
    pub async fn activate_host(
        &self,
        host_id: i64,
        username: &str,
        token_hash: &str,
    ) -> Result<ActivatedHost, DatabaseError> {
        let now = unix_timestamp();
        let mut tx = self.pool().begin().await?;

        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (username, is_active, can_register_hosts, created_at)
             VALUES (?, 1, 0, ?) RETURNING *",
        )
        .bind(username)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let bound = sqlx::query(
            "UPDATE hosts SET user_id = ?, is_active = 1 WHERE id = ? AND user_id IS NULL",
        )
        .bind(user.id)
        .bind(host_id)
        .execute(&mut *tx)
        .await?;
        if bound.rows_affected() == 0 {
            return Err(DatabaseError::Conflict(format!(
                "Host {host_id} is already bound to a user"
            )));
        }

        sqlx::query("INSERT INTO tokens (user_id, token_hash, created_at) VALUES (?, ?, ?)")
            .bind(user.id)
            .bind(token_hash)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let auto_group = sqlx::query_as::<_, (i64, String)>(
            "SELECT g.id, g.name FROM hosts_groups g
             JOIN settings s ON s.value = g.name
             WHERE s.name = ? AND s.is_active = 1 AND g.is_active = 1",
        )
        .bind(HOSTS_GROUP_AUTO_ADD)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some((group_id, _)) = &auto_group {
            sqlx::query(
                "INSERT OR IGNORE INTO hosts_group_members (hosts_group_id, host_id) VALUES (?, ?)",
            )
            .bind(*group_id)
            .bind(host_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(ActivatedHost {
            user,
            auto_group: auto_group.map(|(_, name)| name),
        })
    }

    // =========================================================================
    // Hosts group queries
    // =========================================================================

    /// Create or update a hosts group by name, returning its id.
    pub async fn upsert_hosts_group(
        &self,
        name: &str,
        description: &str,
        is_active: bool,
    ) -> Result<i64, DatabaseError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO hosts_groups (name, description, is_active) VALUES (?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                is_active = excluded.is_active
             RETURNING id",
        )
        .bind(name)
        .bind(description)
        .bind(is_active)
        .fetch_one(self.pool())
        .await?;
        Ok(id)
    }

    pub async fn get_hosts_group_by_name(
        &self,
        name: &str,
    ) -> Result<Option<HostsGroup>, DatabaseError> {
        let group = sqlx::query_as::<_, HostsGroup>("SELECT * FROM hosts_groups WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        Ok(group)
    }

    pub async fn add_host_to_group(&self, group_id: i64, host_id: i64) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT OR IGNORE INTO hosts_group_members (hosts_group_id, host_id) VALUES (?, ?)",
        )
        .bind(group_id)
        .bind(host_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn remove_host_from_group(
        &self,
        group_id: i64,
        host_id: i64,
    ) -> Result<bool, DatabaseError> {
        let result =
            sqlx::query("DELETE FROM hosts_group_members WHERE hosts_group_id = ? AND host_id = ?")
                .bind(group_id)
                .bind(host_id)
                .execute(self.pool())
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Every hosts group a host belongs to, active or not.
    pub async fn list_host_groups(&self, host_id: i64) -> Result<Vec<HostsGroup>, DatabaseError> {
        let groups = sqlx::query_as::<_, HostsGroup>(
            "SELECT g.* FROM hosts_groups g
             JOIN hosts_group_members m ON m.hosts_group_id = g.id
             WHERE m.host_id = ? ORDER BY g.name",
        )
        .bind(host_id)
        .fetch_all(self.pool())
        .await?;
        Ok(groups)
    }

    // =========================================================================
    // Setting queries
    // =========================================================================

    pub async fn upsert_setting(
        &self,
        name: &str,
        value: Option<&str>,
        description: &str,
        is_active: bool,
    ) -> Result<Setting, DatabaseError> {
        let setting = sqlx::query_as::<_, Setting>(
            "INSERT INTO settings (name, description, value, is_active) VALUES (?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                value = excluded.value,
                is_active = excluded.is_active
             RETURNING *",
        )
        .bind(name)
        .bind(description)
        .bind(value)
        .bind(is_active)
        .fetch_one(self.pool())
        .await?;
        Ok(setting)
    }

    /// Value of an active setting. Blank values read as unset.
    pub async fn get_setting_value(&self, name: &str) -> Result<Option<String>, DatabaseError> {
        let value = sqlx::query_scalar::<_, Option<String>>(
            "SELECT value FROM settings WHERE name = ? AND is_active = 1",
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await?;
        Ok(value.flatten().filter(|v| !v.trim().is_empty()))
    }
}
