// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DeviceStatus singleton row.

use sqlx::Row;
use tracing::debug;

use super::{format_db_time, required_time, DeviceStatus, DeviceStatusUpdate, Store};

impl Store {
    /// Read the singleton device status row (seeded by `migrate`).
    pub async fn device_status(&self) -> anyhow::Result<DeviceStatus> {
        let row = sqlx::query("SELECT * FROM DeviceStatus WHERE id = 1")
            .fetch_one(self.pool())
            .await?;
        let last_sync_at: String = row.try_get("lastSyncAt")?;
        let last_seen_at: String = row.try_get("lastSeenAt")?;
        Ok(DeviceStatus {
            last_sync_at: required_time(&last_sync_at, "lastSyncAt")?,
            last_seen_at: required_time(&last_seen_at, "lastSeenAt")?,
            version: row.try_get("version")?,
            update_failures: row.try_get("updateFailures")?,
            active: row.try_get("active")?,
            is_in_safe_mode: row.try_get("isInSafeMode")?,
        })
    }

    /// Field-wise update of the singleton row.
    pub async fn update_device_status(
        &self,
        update: DeviceStatusUpdate,
    ) -> anyhow::Result<DeviceStatus> {
        let mut builder = sqlx::QueryBuilder::<sqlx::Sqlite>::new("UPDATE DeviceStatus SET id = 1");
        if let Some(last_sync_at) = update.last_sync_at {
            builder.push(", lastSyncAt = ");
            builder.push_bind(format_db_time(last_sync_at));
        }
        if let Some(last_seen_at) = update.last_seen_at {
            builder.push(", lastSeenAt = ");
            builder.push_bind(format_db_time(last_seen_at));
        }
        if let Some(version) = update.version {
            builder.push(", version = ");
            builder.push_bind(version);
        }
        if let Some(update_failures) = update.update_failures {
            builder.push(", updateFailures = ");
            builder.push_bind(update_failures);
        }
        if let Some(active) = update.active {
            builder.push(", active = ");
            builder.push_bind(active);
        }
        if let Some(is_in_safe_mode) = update.is_in_safe_mode {
            builder.push(", isInSafeMode = ");
            builder.push_bind(is_in_safe_mode);
        }
        builder.push(" WHERE id = 1");

        let mut tx = self.pool().begin().await?;
        builder.build().execute(&mut *tx).await?;
        tx.commit().await?;

        debug!("device status updated");
        self.device_status().await
    }
}
