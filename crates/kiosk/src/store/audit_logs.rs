// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only audit log rows.

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{format_db_time, is_fk_violation, required_time, AuditLog, LogKind, NewAuditLog, Store};

fn log_from_row(row: &SqliteRow) -> anyhow::Result<AuditLog> {
    let kind: String = row.try_get("type")?;
    let created_at: String = row.try_get("createdAt")?;
    Ok(AuditLog {
        id: row.try_get("id")?,
        kind: LogKind::from_str(&kind).with_context(|| format!("unknown audit log type {kind}"))?,
        description: row.try_get("description")?,
        is_offline_action: row.try_get("isOfflineAction")?,
        container_id: row.try_get("containerId")?,
        created_at: required_time(&created_at, "createdAt")?,
    })
}

impl Store {
    /// Append an audit log entry.
    ///
    /// When the container reference breaks referential integrity the insert
    /// is retried once with the reference cleared and the description
    /// annotated, so the event itself is never lost.
    pub async fn create_audit_log(&self, new: NewAuditLog) -> anyhow::Result<AuditLog> {
        match self.insert_audit_log(&new).await {
            Ok(log) => Ok(log),
            Err(e) if is_fk_violation(&e) && new.container_id.is_some() => {
                let container_id = new.container_id.clone().unwrap_or_default();
                warn!(container_id = %container_id, "audit log references an unknown container, retrying without it");
                let retry = NewAuditLog {
                    description: format!(
                        "{} (container {} not found locally)",
                        new.description, container_id
                    ),
                    container_id: None,
                    ..new
                };
                Ok(self.insert_audit_log(&retry).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_audit_log(&self, new: &NewAuditLog) -> Result<AuditLog, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            "INSERT INTO AuditLog (id, type, description, isOfflineAction, containerId, createdAt) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(new.kind.as_str())
        .bind(&new.description)
        .bind(new.is_offline_action)
        .bind(&new.container_id)
        .bind(format_db_time(created_at))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(id, kind = new.kind.as_str(), "audit log created");
        Ok(AuditLog {
            id,
            kind: new.kind,
            description: new.description.clone(),
            is_offline_action: new.is_offline_action,
            container_id: new.container_id.clone(),
            created_at,
        })
    }

    pub async fn audit_log(&self, id: &str) -> anyhow::Result<Option<AuditLog>> {
        let row = sqlx::query("SELECT * FROM AuditLog WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(log_from_row).transpose()
    }

    /// Audit logs created at or after `since`.
    pub async fn audit_logs_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<AuditLog>> {
        let rows = sqlx::query("SELECT * FROM AuditLog WHERE createdAt >= ? ORDER BY createdAt DESC")
            .bind(format_db_time(since))
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(log_from_row).collect()
    }

    pub async fn audit_logs_by_kind(&self, kind: LogKind) -> anyhow::Result<Vec<AuditLog>> {
        let rows = sqlx::query("SELECT * FROM AuditLog WHERE type = ? ORDER BY createdAt DESC")
            .bind(kind.as_str())
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(log_from_row).collect()
    }

    pub async fn delete_audit_log(&self, id: &str) -> anyhow::Result<bool> {
        let mut tx = self.pool().begin().await?;
        let result = sqlx::query("DELETE FROM AuditLog WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_audit_logs_before(&self, before: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut tx = self.pool().begin().await?;
        let result = sqlx::query("DELETE FROM AuditLog WHERE createdAt < ?")
            .bind(format_db_time(before))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(count = result.rows_affected(), "deleted audit logs before cutoff");
        Ok(result.rows_affected())
    }

    pub async fn delete_all_audit_logs(&self) -> anyhow::Result<u64> {
        let mut tx = self.pool().begin().await?;
        let result = sqlx::query("DELETE FROM AuditLog").execute(&mut *tx).await?;
        tx.commit().await?;
        info!(count = result.rows_affected(), "deleted all audit logs");
        Ok(result.rows_affected())
    }
}
