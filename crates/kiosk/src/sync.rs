// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic backend communication: initial sync at startup, healthcheck and
//! regular sync on their own cadences, and the secure-mode watchdog.
//!
//! The service runs inline on the engine tick; `check_and_run` is cheap
//! when nothing is due. Mode changes flow to the engine through a one-way
//! channel registered at construction.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::audit::AuditLogger;
use crate::backend::{format_wire_time, parse_wire_time, BackendClient, ContainerUpload, LogUpload, RemoteContainer};
use crate::config::Config;
use crate::store::{AuditLog, Container, DeviceStatusUpdate, Store};

/// Lockdown threshold: the backend unreachable for longer than this many
/// days puts the kiosk into secure mode.
const SECURE_MODE_THRESHOLD_DAYS: i64 = 2;

/// Local retention for audit logs that are never uploaded (no container
/// reference). Pruned after each successful sync.
const LOG_RETENTION_DAYS: i64 = 30;

/// Mode changes pushed to the sequence engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeEvent {
    /// Server flipped the device's active flag.
    Active(bool),
    /// Secure mode engaged or released by the watchdog.
    Secure(bool),
}

pub struct SyncService<A> {
    api: A,
    store: Store,
    audit: AuditLogger,
    healthcheck_interval: Duration,
    sync_interval: Duration,
    last_healthcheck: Option<Instant>,
    last_sync: Option<Instant>,
    initial_sync_done: bool,
    last_active: Option<bool>,
    last_secure: Option<bool>,
    modes: mpsc::UnboundedSender<ModeEvent>,
}

impl<A: BackendClient> SyncService<A> {
    pub fn new(
        api: A,
        store: Store,
        audit: AuditLogger,
        config: &Config,
        modes: mpsc::UnboundedSender<ModeEvent>,
    ) -> Self {
        info!(
            healthcheck_interval = config.healthcheck_interval,
            sync_interval = config.sync_interval,
            "sync service initialized"
        );
        Self {
            api,
            store,
            audit,
            healthcheck_interval: Duration::from_secs(config.healthcheck_interval),
            sync_interval: Duration::from_secs(config.sync_interval),
            last_healthcheck: None,
            last_sync: None,
            initial_sync_done: false,
            last_active: None,
            last_secure: None,
            modes,
        }
    }

    /// Seed the change detectors from the persisted device status so the
    /// first healthcheck/watchdog only fires callbacks on real flips.
    pub fn seed_observations(&mut self, active: bool, is_in_safe_mode: bool) {
        self.last_active = Some(active);
        self.last_secure = Some(is_in_safe_mode);
    }

    /// Run whatever is due. Called once per engine tick.
    pub async fn check_and_run(&mut self) {
        if !self.initial_sync_done {
            self.initial_sync().await;
            self.initial_sync_done = true;
            // Keep the regular cadence from firing right after.
            self.last_sync = Some(Instant::now());
        }

        if self.last_healthcheck.map_or(true, |t| t.elapsed() >= self.healthcheck_interval) {
            self.healthcheck().await;
            self.last_healthcheck = Some(Instant::now());
        }

        if self.last_sync.map_or(true, |t| t.elapsed() >= self.sync_interval) {
            self.sync().await;
            self.last_sync = Some(Instant::now());
        }
    }

    /// One-shot startup sync: local containers and audit logs are dropped
    /// and the server's container set is taken wholesale.
    async fn initial_sync(&mut self) {
        info!("performing initial sync");
        if let Err(e) = self.try_initial_sync().await {
            error!("initial sync failed: {e:#}");
        }
    }

    async fn try_initial_sync(&mut self) -> anyhow::Result<()> {
        self.store.delete_all_audit_logs().await?;
        self.store.delete_all_containers().await?;

        let Some(remote) = self.api.sync(Vec::new(), Vec::new()).await? else {
            anyhow::bail!("backend rejected the initial sync");
        };
        let count = remote.len();
        self.replace_containers(remote).await?;
        self.store
            .update_device_status(DeviceStatusUpdate {
                last_sync_at: Some(Utc::now()),
                ..Default::default()
            })
            .await?;
        info!(count, "initial sync complete");
        Ok(())
    }

    async fn healthcheck(&mut self) {
        let status = match self.store.device_status().await {
            Ok(status) => status,
            Err(e) => {
                error!("cannot read device status for healthcheck: {e:#}");
                return;
            }
        };

        match self.api.healthcheck(&status.version, status.update_failures).await {
            Ok(Some(data)) => {
                debug!("healthcheck successful");
                let mut update = DeviceStatusUpdate {
                    last_seen_at: Some(Utc::now()),
                    is_in_safe_mode: Some(false),
                    ..Default::default()
                };
                if let Some(active) = data.active {
                    update.active = Some(active);
                    if self.last_active.map_or(false, |prev| prev != active) {
                        info!(active, "device active flag changed by server");
                        let _ = self.modes.send(ModeEvent::Active(active));
                    }
                    self.last_active = Some(active);
                }
                if let Err(e) = self.store.update_device_status(update).await {
                    error!("failed to persist healthcheck result: {e:#}");
                }
            }
            Ok(None) => warn!("healthcheck rejected by backend"),
            Err(e) => {
                warn!("healthcheck failed: {e:#}");
                let update = DeviceStatusUpdate {
                    update_failures: Some(status.update_failures + 1),
                    ..Default::default()
                };
                if let Err(e) = self.store.update_device_status(update).await {
                    error!("failed to record healthcheck failure: {e:#}");
                }
            }
        }

        self.evaluate_secure_mode().await;
    }

    /// Secure-mode watchdog: more than two days without a successful
    /// healthcheck locks the kiosk down.
    pub async fn evaluate_secure_mode(&mut self) {
        let status = match self.store.device_status().await {
            Ok(status) => status,
            Err(e) => {
                error!("cannot read device status for secure-mode check: {e:#}");
                return;
            }
        };

        let offline_for = Utc::now() - status.last_seen_at;
        let should_be_secure = offline_for > chrono::Duration::days(SECURE_MODE_THRESHOLD_DAYS);

        if status.is_in_safe_mode != should_be_secure {
            let update = DeviceStatusUpdate {
                is_in_safe_mode: Some(should_be_secure),
                ..Default::default()
            };
            if let Err(e) = self.store.update_device_status(update).await {
                error!("failed to persist secure mode change: {e:#}");
            }
            if should_be_secure {
                warn!(days = offline_for.num_days(), "backend unreachable, entering secure mode");
                self.audit
                    .log_safe_mode_entered("backend unreachable for more than 2 days")
                    .await;
            } else {
                self.audit.log_safe_mode_exited().await;
            }
        }

        if self.last_secure.map_or(false, |prev| prev != should_be_secure) {
            let _ = self.modes.send(ModeEvent::Secure(should_be_secure));
        }
        self.last_secure = Some(should_be_secure);
    }

    async fn sync(&mut self) {
        debug!("running periodic sync");
        self.audit.log_sync_started().await;
        if let Err(e) = self.try_sync().await {
            warn!("sync failed: {e:#}");
            self.audit.log_sync_failure(&format!("{e:#}")).await;
        }
    }

    async fn try_sync(&mut self) -> anyhow::Result<()> {
        let status = self.store.device_status().await?;
        let cutoff = status.last_sync_at;
        // Captured before reading so nothing created mid-sync is skipped by
        // the next cutoff.
        let new_sync_time = Utc::now();

        let containers = self.store.containers_since(cutoff).await?;
        let logs = self.store.audit_logs_since(cutoff).await?;

        let container_uploads: Vec<ContainerUpload> =
            containers.iter().map(container_upload).collect();
        let log_rows: Vec<&AuditLog> =
            logs.iter().filter(|log| log.container_id.is_some()).collect();
        let log_uploads: Vec<LogUpload> = log_rows.iter().map(|log| log_upload(log)).collect();

        debug!(
            containers = container_uploads.len(),
            logs = log_uploads.len(),
            %cutoff,
            "sync payload assembled"
        );

        let Some(remote) = self.api.sync(log_uploads, container_uploads).await? else {
            anyhow::bail!("backend rejected the sync payload");
        };

        for log in &log_rows {
            if let Err(e) = self.store.delete_audit_log(&log.id).await {
                warn!(id = %log.id, "failed to delete synced audit log: {e:#}");
            }
        }

        let count = remote.len();
        self.replace_containers(remote).await?;
        self.store
            .update_device_status(DeviceStatusUpdate {
                last_sync_at: Some(new_sync_time),
                ..Default::default()
            })
            .await?;
        info!(count, "sync complete");
        self.audit.log_sync_success(count).await;

        // Unreferenced logs never go upstream; prune the ones past local
        // retention so the table stays bounded.
        let retention_cutoff = new_sync_time - chrono::Duration::days(LOG_RETENTION_DAYS);
        let pruned = self.store.delete_audit_logs_before(retention_cutoff).await?;
        if pruned > 0 {
            self.audit.log_cleanup_completed(pruned).await;
        }
        Ok(())
    }

    async fn replace_containers(&self, remote: Vec<RemoteContainer>) -> anyhow::Result<()> {
        let now = Utc::now();
        let rows: Vec<Container> = remote
            .into_iter()
            .filter_map(|r| {
                if r.id.is_empty() || r.qr_code.is_empty() {
                    warn!("skipping server container without id or qrCode");
                    return None;
                }
                let due_date = match r.due_time.as_deref() {
                    None => None,
                    Some(raw) => match parse_wire_time(raw) {
                        Some(t) => Some(t),
                        None => {
                            warn!(id = %r.id, raw, "unparseable dueTime on server container");
                            None
                        }
                    },
                };
                Some(Container {
                    id: r.id,
                    qr_code: r.qr_code,
                    is_returnable: r.is_returnable,
                    due_date,
                    updated_at: now,
                })
            })
            .collect();
        self.store.replace_all_containers(&rows).await
    }
}

fn container_upload(container: &Container) -> ContainerUpload {
    ContainerUpload {
        id: container.id.clone(),
        is_returnable: container.is_returnable,
        updated_at: format_wire_time(container.updated_at),
    }
}

fn log_upload(log: &AuditLog) -> LogUpload {
    LogUpload {
        kind: log.kind.as_str().to_owned(),
        description: log.description.clone(),
        is_offline_action: log.is_offline_action,
        container_id: log.container_id.clone().unwrap_or_default(),
        created_at: format_wire_time(log.created_at),
    }
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
