// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Categorized audit events with a database backend.
//!
//! Every entry lands in the AuditLog table and is mirrored to the process
//! log. Persistence failures are logged and swallowed: an audit write must
//! never take a sequence down with it.

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::store::{LogKind, NewAuditLog, Store};

#[derive(Clone)]
pub struct AuditLogger {
    store: Store,
}

impl AuditLogger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    async fn record(
        &self,
        kind: LogKind,
        description: String,
        container_id: Option<String>,
        is_offline: bool,
    ) {
        match kind {
            LogKind::Error => error!(
                target: "audit",
                container = container_id.as_deref().unwrap_or("-"),
                offline = is_offline,
                "[{}] {description}",
                kind.as_str()
            ),
            _ => info!(
                target: "audit",
                container = container_id.as_deref().unwrap_or("-"),
                offline = is_offline,
                "[{}] {description}",
                kind.as_str()
            ),
        }

        let entry = NewAuditLog { kind, description, is_offline_action: is_offline, container_id };
        if let Err(e) = self.store.create_audit_log(entry).await {
            error!("failed to persist audit entry: {e:#}");
        }
    }

    pub async fn log_info(&self, description: impl Into<String>) {
        self.record(LogKind::Info, description.into(), None, false).await;
    }

    pub async fn log_error(&self, description: impl Into<String>) {
        self.record(LogKind::Error, description.into(), None, false).await;
    }

    pub async fn log_return_valid(&self, container_id: &str, description: String, is_offline: bool) {
        self.record(LogKind::ReturnValid, description, Some(container_id.to_owned()), is_offline)
            .await;
    }

    pub async fn log_return_invalid(
        &self,
        container_id: &str,
        description: String,
        is_offline: bool,
    ) {
        self.record(LogKind::ReturnInvalid, description, Some(container_id.to_owned()), is_offline)
            .await;
    }

    // Domain helpers.

    pub async fn log_system_startup(&self, version: &str) {
        self.log_info(format!("Container return controller started - version {version}")).await;
    }

    pub async fn log_system_shutdown(&self, reason: &str) {
        self.log_info(format!("Container return controller shutdown - {reason}")).await;
    }

    pub async fn log_database_init(&self) {
        self.log_info("Database initialized").await;
    }

    pub async fn log_database_error(&self, error: &str) {
        self.log_error(format!("Database error: {error}")).await;
    }

    pub async fn log_link_connected(&self, port: &str) {
        self.log_info(format!("Microcontroller link connected on {port}")).await;
    }

    pub async fn log_link_error(&self, error: &str) {
        self.log_error(format!("Microcontroller link error: {error}")).await;
    }

    pub async fn log_sync_started(&self) {
        self.log_info("Backend synchronization started").await;
    }

    pub async fn log_sync_success(&self, synced_count: usize) {
        self.log_info(format!("Backend synchronization completed - {synced_count} containers")).await;
    }

    pub async fn log_sync_failure(&self, error: &str) {
        self.record(
            LogKind::Error,
            format!("Backend synchronization failed: {error}"),
            None,
            true,
        )
        .await;
    }

    pub async fn log_container_scanned(&self, qr_code: &str) {
        self.log_info(format!("Container QR code scanned: {qr_code}")).await;
    }

    pub async fn log_container_validated(&self, container_id: &str, qr_code: &str) {
        self.log_return_valid(
            container_id,
            format!("Container validated - QR: {qr_code}"),
            false,
        )
        .await;
    }

    pub async fn log_container_rejected(
        &self,
        qr_code: &str,
        reason: &str,
        container_id: Option<&str>,
    ) {
        self.log_return_invalid(
            container_id.unwrap_or("unknown"),
            format!("Container rejected - QR: {qr_code}, reason: {reason}"),
            false,
        )
        .await;
    }

    pub async fn log_container_expired(
        &self,
        container_id: &str,
        qr_code: &str,
        due_date: DateTime<Utc>,
        is_offline: bool,
    ) {
        self.log_return_invalid(
            container_id,
            format!("Expired container - QR: {qr_code}, due: {}", due_date.to_rfc3339()),
            is_offline,
        )
        .await;
    }

    pub async fn log_container_not_returnable(
        &self,
        container_id: &str,
        qr_code: &str,
        is_offline: bool,
    ) {
        self.log_return_invalid(
            container_id,
            format!("Non-returnable container - QR: {qr_code}"),
            is_offline,
        )
        .await;
    }

    pub async fn log_container_not_found(&self, qr_code: &str) {
        self.log_return_invalid(
            "unknown",
            format!("Container not found locally - QR: {qr_code}"),
            false,
        )
        .await;
    }

    pub async fn log_sequence_started(&self, sequence: &str) {
        self.log_info(format!("Sequence started: {sequence}")).await;
    }

    pub async fn log_sequence_completed(&self, sequence: &str, duration: std::time::Duration) {
        self.log_info(format!("Sequence completed: {sequence} ({:.2}s)", duration.as_secs_f64()))
            .await;
    }

    pub async fn log_sequence_failed(&self, sequence: &str, error: &str) {
        self.log_error(format!("Sequence failed: {sequence} - {error}")).await;
    }

    pub async fn log_hardware_status(&self, component: &str, status: &str) {
        self.log_info(format!("Hardware status - {component}: {status}")).await;
    }

    pub async fn log_hardware_error(&self, component: &str, error: &str) {
        self.log_error(format!("Hardware error - {component}: {error}")).await;
    }

    pub async fn log_safe_mode_entered(&self, reason: &str) {
        self.log_error(format!("Secure mode activated - {reason}")).await;
    }

    pub async fn log_safe_mode_exited(&self) {
        self.log_info("Secure mode deactivated").await;
    }

    pub async fn log_inactive_mode_entered(&self) {
        self.log_info("Device entered inactive mode - operations suspended").await;
    }

    pub async fn log_inactive_mode_exited(&self) {
        self.log_info("Device exited inactive mode - operations resumed").await;
    }

    pub async fn log_configuration_change(&self, setting: &str, old: &str, new: &str) {
        self.log_info(format!("Configuration changed - {setting}: {old} -> {new}")).await;
    }

    pub async fn log_cleanup_completed(&self, deleted_count: u64) {
        self.log_info(format!("Audit log cleanup completed - {deleted_count} entries deleted")).await;
    }

    pub async fn log_security_event(
        &self,
        event_type: &str,
        description: &str,
        details: &serde_json::Value,
    ) {
        self.log_error(format!("Security event [{event_type}]: {description} - details: {details}"))
            .await;
    }
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
