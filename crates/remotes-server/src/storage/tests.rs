//! Storage layer tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::db::ServerDatabase;
use super::queries::HOSTS_GROUP_AUTO_ADD;
use super::queries_commands::{NewCommand, NewCommandsGroup};
use super::DatabaseError;

const NOW: i64 = 1_800_000_000;

async fn test_db() -> ServerDatabase {
    ServerDatabase::open_in_memory().await.unwrap()
}

/// An active host bound to a fresh user, auto-added to "All hosts".
async fn active_host(db: &ServerDatabase, uuid: &str) -> (i64, i64) {
    let host = db.create_host(uuid, "PEM").await.unwrap();
    let activated = db
        .activate_host(host.id, uuid, &format!("hash-{uuid}"))
        .await
        .unwrap();
    (host.id, activated.user.id)
}

async fn group_with_command(db: &ServerDatabase, name: &str, after: i64, before: i64) -> (i64, i64) {
    let hosts_group = db.get_hosts_group_by_name("All hosts").await.unwrap().unwrap();
    let group_id = db
        .upsert_commands_group(&NewCommandsGroup {
            name,
            hosts_group_id: hosts_group.id,
            sort_order: 1,
            after_ts: after,
            before_ts: before,
            is_active: true,
        })
        .await
        .unwrap();
    let command_id = db
        .upsert_command(&NewCommand {
            group_id,
            name: "uptime",
            description: "",
            body: "print('up')",
            timeout_secs: 15,
            sort_order: 1,
            is_active: true,
        })
        .await
        .unwrap();
    (group_id, command_id)
}

// === Seed data ===

#[tokio::test]
async fn migrations_seed_auto_add_group() {
    let db = test_db().await;
    assert!(db.get_hosts_group_by_name("All hosts").await.unwrap().is_some());
    assert_eq!(
        db.get_setting_value(HOSTS_GROUP_AUTO_ADD).await.unwrap().as_deref(),
        Some("All hosts")
    );
}

// === Users and tokens ===

#[tokio::test]
async fn duplicate_username_is_conflict() {
    let db = test_db().await;
    db.create_user("register_hosts", true).await.unwrap();
    let err = db.create_user("register_hosts", true).await.unwrap_err();
    assert!(matches!(err, DatabaseError::Conflict(_)));
}

#[tokio::test]
async fn set_token_replaces_previous_hash() {
    let db = test_db().await;
    let user = db.create_user("register_hosts", true).await.unwrap();

    db.set_token(user.id, "first").await.unwrap();
    db.set_token(user.id, "second").await.unwrap();

    assert!(db.get_user_by_token_hash("first").await.unwrap().is_none());
    let found = db.get_user_by_token_hash("second").await.unwrap().unwrap();
    assert_eq!(found.id, user.id);
    assert!(found.can_register_hosts);
    assert_eq!(db.count_tokens().await.unwrap(), 1);
}

// === Hosts ===

#[tokio::test]
async fn new_host_is_pending() {
    let db = test_db().await;
    let host = db.create_host("u-1", "PEM").await.unwrap();
    assert!(!host.is_active);
    assert!(host.user_id.is_none());
    assert_eq!(host.name, "u-1");
    assert!(db.create_host("u-1", "PEM").await.is_err());
}

#[tokio::test]
async fn activate_host_binds_user_token_and_group() {
    let db = test_db().await;
    let host = db.create_host("u-1", "PEM").await.unwrap();

    let activated = db.activate_host(host.id, "u-1", "hash").await.unwrap();
    assert_eq!(activated.user.username, "u-1");
    assert_eq!(activated.auto_group.as_deref(), Some("All hosts"));

    let host = db.get_host_by_uuid("u-1").await.unwrap().unwrap();
    assert!(host.is_active);
    assert_eq!(host.user_id, Some(activated.user.id));

    let by_token = db.get_user_by_token_hash("hash").await.unwrap().unwrap();
    let bound = db.get_active_host_for_user(by_token.id).await.unwrap().unwrap();
    assert_eq!(bound.id, host.id);

    let groups = db.list_host_groups(host.id).await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].name, "All hosts");
}

#[tokio::test]
async fn second_activation_conflicts_and_rolls_back() {
    let db = test_db().await;
    let host = db.create_host("u-1", "PEM").await.unwrap();
    db.activate_host(host.id, "u-1", "hash-a").await.unwrap();

    let err = db.activate_host(host.id, "u-1", "hash-b").await.unwrap_err();
    assert!(matches!(err, DatabaseError::Conflict(_)));

    // Different username still cannot rebind the host.
    let err = db.activate_host(host.id, "other", "hash-c").await.unwrap_err();
    assert!(matches!(err, DatabaseError::Conflict(_)));
    assert!(db.get_user_by_username("other").await.unwrap().is_none());
    assert!(db.get_user_by_token_hash("hash-c").await.unwrap().is_none());
    assert_eq!(db.count_tokens().await.unwrap(), 1);
}

#[tokio::test]
async fn activation_without_auto_add_setting_joins_nothing() {
    let db = test_db().await;
    db.upsert_setting(HOSTS_GROUP_AUTO_ADD, None, "", true)
        .await
        .unwrap();
    let host = db.create_host("u-1", "PEM").await.unwrap();
    let activated = db.activate_host(host.id, "u-1", "hash").await.unwrap();
    assert!(activated.auto_group.is_none());
    assert!(db.list_host_groups(host.id).await.unwrap().is_empty());
}

// === Pending commands ===

#[tokio::test]
async fn pending_respects_strict_window() {
    let db = test_db().await;
    let (host_id, _) = active_host(&db, "u-1").await;
    let (group_id, command_id) = group_with_command(&db, "g", NOW - 10, NOW + 10).await;

    let pending = db.list_pending_commands(host_id, NOW).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].command_id, command_id);
    assert_eq!(pending[0].group_id, group_id);

    // Bounds are exclusive.
    assert!(db.list_pending_commands(host_id, NOW - 10).await.unwrap().is_empty());
    assert!(db.list_pending_commands(host_id, NOW + 10).await.unwrap().is_empty());
    assert!(db.get_visible_command(host_id, command_id, NOW + 11).await.unwrap().is_none());
}

#[tokio::test]
async fn pending_excludes_answered_and_inactive() {
    let db = test_db().await;
    let (host_id, _) = active_host(&db, "u-1").await;
    let (other_host, _) = active_host(&db, "u-2").await;
    let (group_id, command_id) = group_with_command(&db, "g", NOW - 10, NOW + 10).await;

    let disabled = db
        .upsert_command(&NewCommand {
            group_id,
            name: "disabled",
            description: "",
            body: "",
            timeout_secs: 15,
            sort_order: 2,
            is_active: false,
        })
        .await
        .unwrap();

    db.record_command_output(command_id, host_id, "out", "res", &[])
        .await
        .unwrap();

    assert!(db.list_pending_commands(host_id, NOW).await.unwrap().is_empty());
    // The other host has not answered yet.
    assert_eq!(db.list_pending_commands(other_host, NOW).await.unwrap().len(), 1);
    assert!(db.get_visible_command(host_id, disabled, NOW).await.unwrap().is_none());
}

#[tokio::test]
async fn pending_orders_by_group_then_command() {
    let db = test_db().await;
    let (host_id, _) = active_host(&db, "u-1").await;
    let hosts_group = db.get_hosts_group_by_name("All hosts").await.unwrap().unwrap();

    let mut expected = Vec::new();
    for (group_name, group_order) in [("late", 2), ("early", 1)] {
        let group_id = db
            .upsert_commands_group(&NewCommandsGroup {
                name: group_name,
                hosts_group_id: hosts_group.id,
                sort_order: group_order,
                after_ts: NOW - 1,
                before_ts: NOW + 1,
                is_active: true,
            })
            .await
            .unwrap();
        for (name, order) in [("b", 2), ("a", 1)] {
            let id = db
                .upsert_command(&NewCommand {
                    group_id,
                    name,
                    description: "",
                    body: "",
                    timeout_secs: 15,
                    sort_order: order,
                    is_active: true,
                })
                .await
                .unwrap();
            expected.push((group_order, order, id));
        }
    }
    expected.sort_unstable();

    let ids: Vec<i64> = db
        .list_pending_commands(host_id, NOW)
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.command_id)
        .collect();
    let expected: Vec<i64> = expected.into_iter().map(|(_, _, id)| id).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn host_outside_group_sees_nothing() {
    let db = test_db().await;
    let (host_id, _) = active_host(&db, "u-1").await;
    let (_, command_id) = group_with_command(&db, "g", NOW - 10, NOW + 10).await;
    let all_hosts = db.get_hosts_group_by_name("All hosts").await.unwrap().unwrap();

    assert!(db.remove_host_from_group(all_hosts.id, host_id).await.unwrap());
    assert!(db.list_pending_commands(host_id, NOW).await.unwrap().is_empty());
    assert!(db.get_visible_command(host_id, command_id, NOW).await.unwrap().is_none());
    assert!(db.get_command_for_host(host_id, command_id).await.unwrap().is_none());
}

#[tokio::test]
async fn inactive_hosts_group_hides_commands() {
    let db = test_db().await;
    let (host_id, _) = active_host(&db, "u-1").await;
    let (_, command_id) = group_with_command(&db, "g", NOW - 10, NOW + 10).await;
    db.upsert_hosts_group("All hosts", "", false).await.unwrap();

    assert!(db.get_visible_command(host_id, command_id, NOW).await.unwrap().is_none());
    // Membership alone still authorizes a result upload.
    assert!(db.get_command_for_host(host_id, command_id).await.unwrap().is_some());
}

// === Inputs and results ===

#[tokio::test]
async fn command_inputs_resolve_per_host() {
    let db = test_db().await;
    let (host_id, _) = active_host(&db, "u-1").await;
    let (other_host, _) = active_host(&db, "u-2").await;
    let (_, command_id) = group_with_command(&db, "g", NOW - 10, NOW + 10).await;

    let setting = db
        .upsert_setting("backup_dir", Some("/srv"), "", true)
        .await
        .unwrap();
    db.set_command_settings(command_id, &[setting.id]).await.unwrap();
    db.set_command_input_variables(command_id, &["last".into(), "never".into()])
        .await
        .unwrap();
    db.record_command_output(command_id, host_id, "", "", &[("last".into(), "42".into())])
        .await
        .unwrap();

    assert_eq!(
        db.list_command_settings(command_id).await.unwrap(),
        vec![("backup_dir".to_string(), Some("/srv".to_string()))]
    );
    assert_eq!(
        db.list_command_variables(host_id, command_id).await.unwrap(),
        vec![("last".to_string(), Some("42".to_string())), ("never".to_string(), None)]
    );
    assert_eq!(
        db.list_command_variables(other_host, command_id).await.unwrap(),
        vec![("last".to_string(), None), ("never".to_string(), None)]
    );
}

#[tokio::test]
async fn output_variables_keep_position_order() {
    let db = test_db().await;
    let (_, command_id) = group_with_command(&db, "g", NOW - 10, NOW + 10).await;
    db.set_command_output_variables(command_id, &["z".into(), "a".into(), "m".into()])
        .await
        .unwrap();
    assert_eq!(db.list_output_variables(command_id).await.unwrap(), vec!["z", "a", "m"]);
}

#[tokio::test]
async fn variable_values_are_upserted() {
    let db = test_db().await;
    let (host_id, _) = active_host(&db, "u-1").await;
    let (_, command_id) = group_with_command(&db, "g", NOW - 10, NOW + 10).await;

    db.record_command_output(command_id, host_id, "", "", &[("v".into(), "1".into())])
        .await
        .unwrap();
    db.record_command_output(command_id, host_id, "", "", &[("v".into(), "2".into())])
        .await
        .unwrap();

    let values = db.list_variable_values(host_id).await.unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].raw_value, "2");
    assert_eq!(db.list_command_outputs(host_id).await.unwrap().len(), 2);
}
