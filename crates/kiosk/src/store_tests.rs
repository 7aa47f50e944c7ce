// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use chrono::{Duration, TimeZone, Utc};

use super::*;

async fn store() -> Store {
    let store = Store::open_in_memory().await.unwrap();
    store.migrate("0.0.1").await.unwrap();
    store
}

fn new_container(qr: &str) -> NewContainer {
    NewContainer { qr_code: qr.to_owned(), is_returnable: true, due_date: None }
}

#[tokio::test]
async fn opens_a_file_backed_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kiosk.db");
    let url = format!("sqlite://{}", path.display());

    let store = Store::open(&url).await.unwrap();
    store.migrate("0.0.1").await.unwrap();
    store.create_container(new_container("ABCDEF")).await.unwrap();
    drop(store);

    let store = Store::open(&url).await.unwrap();
    store.migrate("0.0.1").await.unwrap();
    assert!(store.container_by_qr("ABCDEF").await.unwrap().is_some());
}

#[tokio::test]
async fn migrate_is_idempotent() {
    let store = store().await;
    store.migrate("0.0.1").await.unwrap();
    store.migrate("0.0.1").await.unwrap();
}

#[tokio::test]
async fn migrate_seeds_singleton_device_status() {
    let store = store().await;
    let status = store.device_status().await.unwrap();
    assert_eq!(status.version, "0.0.1");
    assert_eq!(status.update_failures, 0);
    assert!(status.active);
    assert!(!status.is_in_safe_mode);
    assert_eq!(status.last_sync_at, epoch());

    // A second migrate must not reset the row.
    store
        .update_device_status(DeviceStatusUpdate { update_failures: Some(7), ..Default::default() })
        .await
        .unwrap();
    store.migrate("0.0.2").await.unwrap();
    let status = store.device_status().await.unwrap();
    assert_eq!(status.update_failures, 7);
    assert_eq!(status.version, "0.0.1");
}

#[tokio::test]
async fn container_round_trip_by_id_and_qr() {
    let store = store().await;
    let created = store.create_container(new_container("ABCDEF")).await.unwrap();

    let by_id = store.container_by_id(&created.id).await.unwrap().unwrap();
    assert_eq!(by_id, created);

    let by_qr = store.container_by_qr("ABCDEF").await.unwrap().unwrap();
    assert_eq!(by_qr.id, created.id);

    assert!(store.container_by_qr("XXXXXX").await.unwrap().is_none());
}

#[tokio::test]
async fn create_with_id_keeps_server_id() {
    let store = store().await;
    let created = store.create_container_with_id("c-17", new_container("ABCDEF")).await.unwrap();
    assert_eq!(created.id, "c-17");
    assert!(store.container_by_id("c-17").await.unwrap().is_some());
}

#[tokio::test]
async fn duplicate_qr_code_is_rejected() {
    let store = store().await;
    store.create_container(new_container("ABCDEF")).await.unwrap();
    assert!(store.create_container(new_container("ABCDEF")).await.is_err());
}

#[tokio::test]
async fn update_container_is_field_wise() {
    let store = store().await;
    let created = store.create_container(new_container("ABCDEF")).await.unwrap();

    let due = Utc.with_ymd_and_hms(2027, 3, 1, 12, 0, 0).single().unwrap();
    let updated = store
        .update_container(
            &created.id,
            ContainerUpdate { is_returnable: Some(false), due_date: Some(due), ..Default::default() },
        )
        .await
        .unwrap()
        .unwrap();

    assert!(!updated.is_returnable);
    assert_eq!(updated.due_date, Some(due));
    assert_eq!(updated.qr_code, "ABCDEF");
    assert!(updated.updated_at > created.updated_at - Duration::seconds(1));
}

#[tokio::test]
async fn update_container_honors_explicit_updated_at() {
    let store = store().await;
    let created = store.create_container(new_container("ABCDEF")).await.unwrap();

    let stamp = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().unwrap();
    let updated = store
        .update_container(
            &created.id,
            ContainerUpdate { updated_at: Some(stamp), ..Default::default() },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.updated_at, stamp);
}

#[tokio::test]
async fn update_unknown_container_returns_none() {
    let store = store().await;
    let result = store
        .update_container("nope", ContainerUpdate { is_returnable: Some(false), ..Default::default() })
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn containers_since_filters_on_updated_at() {
    let store = store().await;
    let old = store.create_container(new_container("AAAAAA")).await.unwrap();
    let stamp = Utc::now() - Duration::days(3);
    store
        .update_container(&old.id, ContainerUpdate { updated_at: Some(stamp), ..Default::default() })
        .await
        .unwrap();
    store.create_container(new_container("BBBBBB")).await.unwrap();

    let recent = store.containers_since(Utc::now() - Duration::days(1)).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].qr_code, "BBBBBB");

    let all = store.containers_since(epoch()).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn replace_all_containers_is_authoritative() {
    let store = store().await;
    store.create_container(new_container("AAAAAA")).await.unwrap();
    store.create_container(new_container("BBBBBB")).await.unwrap();

    let replacement = vec![Container {
        id: "c-1".to_owned(),
        qr_code: "CCCCCC".to_owned(),
        is_returnable: false,
        due_date: None,
        updated_at: Utc::now(),
    }];
    store.replace_all_containers(&replacement).await.unwrap();

    let all = store.all_containers().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, "c-1");
    assert!(!all[0].is_returnable);
}

#[tokio::test]
async fn delete_container_reports_whether_it_existed() {
    let store = store().await;
    let created = store.create_container(new_container("ABCDEF")).await.unwrap();
    assert!(store.delete_container(&created.id).await.unwrap());
    assert!(!store.delete_container(&created.id).await.unwrap());
}

#[tokio::test]
async fn device_status_update_is_field_wise() {
    let store = store().await;
    let seen = Utc.with_ymd_and_hms(2026, 6, 1, 8, 30, 0).single().unwrap();

    let status = store
        .update_device_status(DeviceStatusUpdate {
            last_seen_at: Some(seen),
            update_failures: Some(3),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(status.last_seen_at, seen);
    assert_eq!(status.update_failures, 3);
    assert!(status.active);

    let status = store
        .update_device_status(DeviceStatusUpdate {
            active: Some(false),
            is_in_safe_mode: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!status.active);
    assert!(status.is_in_safe_mode);
    assert_eq!(status.last_seen_at, seen);
}

#[tokio::test]
async fn audit_log_round_trip() {
    let store = store().await;
    let container = store.create_container(new_container("ABCDEF")).await.unwrap();

    let created = store
        .create_audit_log(NewAuditLog {
            kind: LogKind::ReturnValid,
            description: "accepted".to_owned(),
            is_offline_action: true,
            container_id: Some(container.id.clone()),
        })
        .await
        .unwrap();

    let fetched = store.audit_log(&created.id).await.unwrap().unwrap();
    assert_eq!(fetched.kind, LogKind::ReturnValid);
    assert!(fetched.is_offline_action);
    assert_eq!(fetched.container_id.as_deref(), Some(container.id.as_str()));
}

#[tokio::test]
async fn audit_log_with_unknown_container_retries_without_reference() {
    let store = store().await;

    let created = store
        .create_audit_log(NewAuditLog {
            kind: LogKind::Error,
            description: "scan failed".to_owned(),
            is_offline_action: false,
            container_id: Some("ghost".to_owned()),
        })
        .await
        .unwrap();

    assert!(created.container_id.is_none());
    assert!(created.description.contains("ghost"));
    assert!(created.description.contains("not found locally"));
}

#[tokio::test]
async fn audit_logs_by_kind_filters() {
    let store = store().await;
    for (kind, description) in [
        (LogKind::Info, "a"),
        (LogKind::Error, "b"),
        (LogKind::Error, "c"),
    ] {
        store
            .create_audit_log(NewAuditLog {
                kind,
                description: description.to_owned(),
                is_offline_action: false,
                container_id: None,
            })
            .await
            .unwrap();
    }

    assert_eq!(store.audit_logs_by_kind(LogKind::Error).await.unwrap().len(), 2);
    assert_eq!(store.audit_logs_by_kind(LogKind::Info).await.unwrap().len(), 1);
    assert!(store.audit_logs_by_kind(LogKind::ReturnValid).await.unwrap().is_empty());
}

#[tokio::test]
async fn audit_log_deletion_variants() {
    let store = store().await;
    let first = store
        .create_audit_log(NewAuditLog {
            kind: LogKind::Info,
            description: "first".to_owned(),
            is_offline_action: false,
            container_id: None,
        })
        .await
        .unwrap();
    store
        .create_audit_log(NewAuditLog {
            kind: LogKind::Info,
            description: "second".to_owned(),
            is_offline_action: false,
            container_id: None,
        })
        .await
        .unwrap();

    assert!(store.delete_audit_log(&first.id).await.unwrap());
    assert!(!store.delete_audit_log(&first.id).await.unwrap());

    assert_eq!(store.delete_audit_logs_before(Utc::now() + Duration::seconds(1)).await.unwrap(), 1);
    assert_eq!(store.delete_all_audit_logs().await.unwrap(), 0);
}

#[test]
fn parse_db_time_accepts_rfc3339_and_naive() {
    let zulu = parse_db_time("2025-01-01T00:00:00Z").unwrap();
    assert_eq!(zulu, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().unwrap());

    let offset = parse_db_time("2025-01-01T02:00:00+02:00").unwrap();
    assert_eq!(offset, zulu);

    let naive = parse_db_time("2025-01-01 00:00:00").unwrap();
    assert_eq!(naive, zulu);

    let naive_frac = parse_db_time("2025-01-01 00:00:00.250").unwrap();
    assert_eq!(naive_frac.timestamp_subsec_millis(), 250);

    assert!(parse_db_time("not a time").is_none());
}

#[test]
fn format_db_time_round_trips() {
    let stamp = Utc.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).single().unwrap();
    assert_eq!(parse_db_time(&format_db_time(stamp)).unwrap(), stamp);
}
