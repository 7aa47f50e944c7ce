// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite store: containers, device status, audit logs.
//!
//! WAL journal mode, foreign keys enforced, explicit transactions for every
//! write. All timestamps are persisted as UTC ISO-8601 text; naive values
//! read back from older databases are interpreted as UTC.

pub mod audit_logs;
pub mod containers;
pub mod device;

use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

/// Grace value for `lastSyncAt` before the first sync ever ran.
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_default()
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    pub qr_code: String,
    pub is_returnable: bool,
    pub due_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewContainer {
    pub qr_code: String,
    pub is_returnable: bool,
    pub due_date: Option<DateTime<Utc>>,
}

/// Field-wise container update; `None` leaves the column untouched.
/// `updated_at` defaults to the current time when not supplied.
#[derive(Debug, Clone, Default)]
pub struct ContainerUpdate {
    pub qr_code: Option<String>,
    pub is_returnable: Option<bool>,
    pub due_date: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub last_sync_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub version: String,
    pub update_failures: i64,
    pub active: bool,
    pub is_in_safe_mode: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceStatusUpdate {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub version: Option<String>,
    pub update_failures: Option<i64>,
    pub active: Option<bool>,
    pub is_in_safe_mode: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Info,
    Error,
    ReturnValid,
    ReturnInvalid,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Error => "ERROR",
            Self::ReturnValid => "RETURN_VALID",
            Self::ReturnInvalid => "RETURN_INVALID",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "INFO" => Some(Self::Info),
            "ERROR" => Some(Self::Error),
            "RETURN_VALID" => Some(Self::ReturnValid),
            "RETURN_INVALID" => Some(Self::ReturnInvalid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditLog {
    pub id: String,
    pub kind: LogKind,
    pub description: String,
    pub is_offline_action: bool,
    pub container_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub kind: LogKind,
    pub description: String,
    pub is_offline_action: bool,
    pub container_id: Option<String>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS Container (
    id TEXT PRIMARY KEY,
    qrCode TEXT NOT NULL UNIQUE,
    isReturnable INTEGER NOT NULL DEFAULT 1,
    dueDate TEXT,
    updatedAt TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS DeviceStatus (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    lastSyncAt TEXT NOT NULL,
    lastSeenAt TEXT NOT NULL,
    version TEXT NOT NULL,
    updateFailures INTEGER NOT NULL DEFAULT 0,
    active INTEGER NOT NULL DEFAULT 1,
    isInSafeMode INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS AuditLog (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL CHECK (type IN ('INFO', 'ERROR', 'RETURN_VALID', 'RETURN_INVALID')),
    description TEXT NOT NULL,
    isOfflineAction INTEGER NOT NULL DEFAULT 0,
    containerId TEXT REFERENCES Container(id),
    createdAt TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_container_qr_code ON Container(qrCode);
CREATE INDEX IF NOT EXISTS idx_container_updated_at ON Container(updatedAt);
CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON AuditLog(createdAt);
CREATE INDEX IF NOT EXISTS idx_audit_log_type ON AuditLog(type);
"#;

impl Store {
    /// Open (creating if missing) the database at `database_url`.
    ///
    /// Accepts `sqlite://` URLs, bare paths, and `sqlite::memory:`.
    pub async fn open(database_url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database url {database_url}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        // A single connection keeps the tick loop's single-writer discipline
        // and makes in-memory databases behave.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("failed to open sqlite database")?;

        info!(url = database_url, "store opened");
        Ok(Self { pool })
    }

    pub async fn open_in_memory() -> anyhow::Result<Self> {
        Self::open("sqlite::memory:").await
    }

    /// Create tables and indices, and seed the singleton DeviceStatus row.
    /// Safe to run on every start.
    pub async fn migrate(&self, version: &str) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        sqlx::query(
            "INSERT OR IGNORE INTO DeviceStatus \
             (id, lastSyncAt, lastSeenAt, version, updateFailures, active, isInSafeMode) \
             VALUES (1, ?, ?, ?, 0, 1, 0)",
        )
        .bind(format_db_time(epoch()))
        .bind(format_db_time(Utc::now()))
        .bind(version)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Render a timestamp the way the store persists it.
pub(crate) fn format_db_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a persisted timestamp. Accepts RFC 3339 (with offset or `Z`) and
/// falls back to naive `YYYY-MM-DD HH:MM:SS[.f]` interpreted as UTC.
pub(crate) fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

pub(crate) fn required_time(s: &str, column: &str) -> anyhow::Result<DateTime<Utc>> {
    parse_db_time(s).with_context(|| format!("unparseable {column} timestamp: {s}"))
}

pub(crate) fn is_fk_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.kind() == sqlx::error::ErrorKind::ForeignKeyViolation
    )
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
