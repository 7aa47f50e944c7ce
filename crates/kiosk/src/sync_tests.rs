// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use chrono::{Duration as Delta, Utc};
use clap::Parser;
use tokio::sync::mpsc;

use crate::audit::AuditLogger;
use crate::backend::{HealthcheckData, RemoteContainer};
use crate::config::Config;
use crate::store::{
    format_db_time, ContainerUpdate, DeviceStatusUpdate, LogKind, NewAuditLog, NewContainer,
    Store,
};
use crate::test_support::{memory_store, StubBackend, StubResponse};

use super::{ModeEvent, SyncService};

struct Rig {
    svc: SyncService<StubBackend>,
    backend: StubBackend,
    store: Store,
    mode_rx: mpsc::UnboundedReceiver<ModeEvent>,
}

async fn rig() -> Rig {
    let store = memory_store().await.unwrap();
    let backend = StubBackend::new();
    let config = Config::parse_from(["kiosk"]);
    let (mode_tx, mode_rx) = mpsc::unbounded_channel();
    let mut svc = SyncService::new(
        backend.clone(),
        store.clone(),
        AuditLogger::new(store.clone()),
        &config,
        mode_tx,
    );
    svc.seed_observations(true, false);
    Rig { svc, backend, store, mode_rx }
}

fn remote(id: &str, qr: &str, returnable: bool) -> RemoteContainer {
    RemoteContainer {
        id: id.to_owned(),
        qr_code: qr.to_owned(),
        is_returnable: returnable,
        due_time: None,
    }
}

#[tokio::test(start_paused = true)]
async fn initial_sync_replaces_local_state() {
    let mut rig = rig().await;
    rig.store
        .create_container(NewContainer {
            qr_code: "OLDOLD".to_owned(),
            is_returnable: true,
            due_date: None,
        })
        .await
        .unwrap();
    rig.store
        .create_audit_log(NewAuditLog {
            kind: LogKind::Info,
            description: "stale".to_owned(),
            is_offline_action: false,
            container_id: None,
        })
        .await
        .unwrap();
    rig.backend.set_sync(StubResponse::Success(vec![remote("c-1", "ABCDEF", true)]));

    rig.svc.check_and_run().await;

    // Local data was dropped and replaced by the server's set.
    let containers = rig.store.all_containers().await.unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].id, "c-1");
    assert!(rig.store.audit_logs_by_kind(LogKind::Info).await.unwrap().is_empty());

    // The payload sent upstream was empty.
    let payloads = rig.backend.sync_payloads();
    assert_eq!(payloads.len(), 1);
    assert!(payloads[0].0.is_empty());
    assert!(payloads[0].1.is_empty());

    // The regular sync did not fire right behind the initial one.
    assert_eq!(rig.backend.sync_calls(), 1);

    let status = rig.store.device_status().await.unwrap();
    assert!(Utc::now() - status.last_sync_at < Delta::seconds(5));
}

#[tokio::test(start_paused = true)]
async fn cadences_fire_on_their_intervals() {
    let mut rig = rig().await;

    rig.svc.check_and_run().await;
    assert_eq!(rig.backend.healthcheck_calls(), 1);
    assert_eq!(rig.backend.sync_calls(), 1); // initial

    // Immediately after, nothing is due.
    rig.svc.check_and_run().await;
    assert_eq!(rig.backend.healthcheck_calls(), 1);
    assert_eq!(rig.backend.sync_calls(), 1);

    tokio::time::advance(Duration::from_secs(181)).await;
    rig.svc.check_and_run().await;
    assert_eq!(rig.backend.healthcheck_calls(), 2);
    assert_eq!(rig.backend.sync_calls(), 1);

    tokio::time::advance(Duration::from_secs(600)).await;
    rig.svc.check_and_run().await;
    assert_eq!(rig.backend.healthcheck_calls(), 3);
    assert_eq!(rig.backend.sync_calls(), 2);
}

#[tokio::test]
async fn regular_sync_sends_changes_since_cutoff_and_deletes_synced_logs() {
    let mut rig = rig().await;
    let cutoff = Utc::now() - Delta::hours(1);
    rig.store
        .update_device_status(DeviceStatusUpdate {
            last_sync_at: Some(cutoff),
            ..Default::default()
        })
        .await
        .unwrap();

    // One container touched before the cutoff, one after.
    let stale = rig.store
        .create_container(NewContainer {
            qr_code: "AAAAAA".to_owned(),
            is_returnable: true,
            due_date: None,
        })
        .await
        .unwrap();
    rig.store
        .update_container(
            &stale.id,
            ContainerUpdate {
                updated_at: Some(cutoff - Delta::hours(1)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let fresh = rig.store
        .create_container(NewContainer {
            qr_code: "BBBBBB".to_owned(),
            is_returnable: false,
            due_date: None,
        })
        .await
        .unwrap();

    // One log with a container reference, one without.
    let referenced = rig.store
        .create_audit_log(NewAuditLog {
            kind: LogKind::ReturnValid,
            description: "accepted".to_owned(),
            is_offline_action: false,
            container_id: Some(fresh.id.clone()),
        })
        .await
        .unwrap();
    let unreferenced = rig.store
        .create_audit_log(NewAuditLog {
            kind: LogKind::Info,
            description: "system event".to_owned(),
            is_offline_action: false,
            container_id: None,
        })
        .await
        .unwrap();

    rig.backend.set_sync(StubResponse::Success(vec![remote("c-9", "CCCCCC", true)]));
    rig.svc.initial_sync_done = true;
    rig.svc.sync().await;

    let payloads = rig.backend.sync_payloads();
    assert_eq!(payloads.len(), 1);
    let (logs, containers) = &payloads[0];
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].id, fresh.id);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].container_id, fresh.id);

    // The synced log is gone; the unreferenced one remains.
    assert!(rig.store.audit_log(&referenced.id).await.unwrap().is_none());
    assert!(rig.store.audit_log(&unreferenced.id).await.unwrap().is_some());

    // The server's container set replaced ours.
    let containers = rig.store.all_containers().await.unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].id, "c-9");

    let status = rig.store.device_status().await.unwrap();
    assert!(status.last_sync_at > cutoff);
}

#[tokio::test]
async fn successful_sync_prunes_logs_past_local_retention() {
    let mut rig = rig().await;
    // An unreferenced log never goes upstream; backdate one past retention.
    sqlx::query(
        "INSERT INTO AuditLog (id, type, description, isOfflineAction, containerId, createdAt) \
         VALUES ('ancient', 'INFO', 'old system event', 0, NULL, ?)",
    )
    .bind(format_db_time(Utc::now() - Delta::days(40)))
    .execute(rig.store.pool())
    .await
    .unwrap();

    rig.svc.initial_sync_done = true;
    rig.svc.sync().await;

    assert!(rig.store.audit_log("ancient").await.unwrap().is_none());
    let infos = rig.store.audit_logs_by_kind(LogKind::Info).await.unwrap();
    assert!(infos.iter().any(|l| l.description.contains("cleanup completed")));
}

#[tokio::test]
async fn sync_transport_failure_audits_offline_and_keeps_state() {
    let mut rig = rig().await;
    rig.store
        .create_container(NewContainer {
            qr_code: "AAAAAA".to_owned(),
            is_returnable: true,
            due_date: None,
        })
        .await
        .unwrap();
    rig.backend.set_sync(StubResponse::Transport);
    rig.svc.initial_sync_done = true;

    let before = rig.store.device_status().await.unwrap().last_sync_at;
    rig.svc.sync().await;

    assert_eq!(rig.store.all_containers().await.unwrap().len(), 1);
    assert_eq!(rig.store.device_status().await.unwrap().last_sync_at, before);

    let errors = rig.store.audit_logs_by_kind(LogKind::Error).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].is_offline_action);
}

#[tokio::test]
async fn healthcheck_success_stamps_last_seen_and_clears_secure_mode() {
    let mut rig = rig().await;
    rig.store
        .update_device_status(DeviceStatusUpdate {
            last_seen_at: Some(Utc::now() - Delta::days(3)),
            is_in_safe_mode: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
    rig.svc.seed_observations(true, true);

    rig.svc.healthcheck().await;

    let status = rig.store.device_status().await.unwrap();
    assert!(!status.is_in_safe_mode);
    assert!(Utc::now() - status.last_seen_at < Delta::seconds(5));

    // The watchdog saw the recovery and announced it.
    assert!(matches!(rig.mode_rx.try_recv(), Ok(ModeEvent::Secure(false))));
}

#[tokio::test]
async fn healthcheck_fires_active_callback_only_on_change() {
    let mut rig = rig().await;
    rig.backend.set_healthcheck(StubResponse::Success(HealthcheckData { active: Some(false) }));

    rig.svc.healthcheck().await;
    assert!(matches!(rig.mode_rx.try_recv(), Ok(ModeEvent::Active(false))));
    assert!(!rig.store.device_status().await.unwrap().active);

    // Same answer again: no second event.
    rig.svc.healthcheck().await;
    assert!(rig.mode_rx.try_recv().is_err());
}

#[tokio::test]
async fn healthcheck_transport_failure_increments_update_failures() {
    let mut rig = rig().await;
    rig.backend.set_healthcheck(StubResponse::Transport);

    rig.svc.healthcheck().await;
    rig.svc.healthcheck().await;

    let status = rig.store.device_status().await.unwrap();
    assert_eq!(status.update_failures, 2);
}

#[tokio::test]
async fn watchdog_enters_secure_mode_after_two_days_offline() {
    let mut rig = rig().await;
    rig.store
        .update_device_status(DeviceStatusUpdate {
            last_seen_at: Some(Utc::now() - Delta::days(3)),
            ..Default::default()
        })
        .await
        .unwrap();

    rig.svc.evaluate_secure_mode().await;

    assert!(rig.store.device_status().await.unwrap().is_in_safe_mode);
    assert!(matches!(rig.mode_rx.try_recv(), Ok(ModeEvent::Secure(true))));

    // Re-evaluation without a change stays quiet.
    rig.svc.evaluate_secure_mode().await;
    assert!(rig.mode_rx.try_recv().is_err());

    let errors = rig.store.audit_logs_by_kind(LogKind::Error).await.unwrap();
    assert!(errors.iter().any(|l| l.description.contains("Secure mode activated")));
}

#[tokio::test]
async fn watchdog_stays_quiet_within_the_threshold() {
    let mut rig = rig().await;
    rig.store
        .update_device_status(DeviceStatusUpdate {
            last_seen_at: Some(Utc::now() - Delta::days(1)),
            ..Default::default()
        })
        .await
        .unwrap();

    rig.svc.evaluate_secure_mode().await;

    assert!(!rig.store.device_status().await.unwrap().is_in_safe_mode);
    assert!(rig.mode_rx.try_recv().is_err());
}
