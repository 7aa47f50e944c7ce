// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container CRUD.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use super::{format_db_time, parse_db_time, required_time, Container, ContainerUpdate, NewContainer, Store};

fn container_from_row(row: &SqliteRow) -> anyhow::Result<Container> {
    let due_date: Option<String> = row.try_get("dueDate")?;
    let updated_at: String = row.try_get("updatedAt")?;
    Ok(Container {
        id: row.try_get("id")?,
        qr_code: row.try_get("qrCode")?,
        is_returnable: row.try_get("isReturnable")?,
        due_date: due_date.as_deref().and_then(parse_db_time),
        updated_at: required_time(&updated_at, "updatedAt")?,
    })
}

impl Store {
    /// Insert a container with a fresh id.
    pub async fn create_container(&self, new: NewContainer) -> anyhow::Result<Container> {
        let id = Uuid::new_v4().to_string();
        self.create_container_with_id(&id, new).await
    }

    /// Insert a container under a server-assigned id.
    pub async fn create_container_with_id(
        &self,
        id: &str,
        new: NewContainer,
    ) -> anyhow::Result<Container> {
        let updated_at = Utc::now();
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            "INSERT INTO Container (id, qrCode, isReturnable, dueDate, updatedAt) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&new.qr_code)
        .bind(new.is_returnable)
        .bind(new.due_date.map(format_db_time))
        .bind(format_db_time(updated_at))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(id, "container created");
        Ok(Container {
            id: id.to_owned(),
            qr_code: new.qr_code,
            is_returnable: new.is_returnable,
            due_date: new.due_date,
            updated_at,
        })
    }

    pub async fn container_by_id(&self, id: &str) -> anyhow::Result<Option<Container>> {
        let row = sqlx::query("SELECT * FROM Container WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(container_from_row).transpose()
    }

    pub async fn container_by_qr(&self, qr_code: &str) -> anyhow::Result<Option<Container>> {
        let row = sqlx::query("SELECT * FROM Container WHERE qrCode = ?")
            .bind(qr_code)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(container_from_row).transpose()
    }

    /// Field-wise update. Returns the updated row, or `None` when the id is
    /// unknown.
    pub async fn update_container(
        &self,
        id: &str,
        update: ContainerUpdate,
    ) -> anyhow::Result<Option<Container>> {
        let updated_at = update.updated_at.unwrap_or_else(Utc::now);

        let mut builder = sqlx::QueryBuilder::<sqlx::Sqlite>::new("UPDATE Container SET updatedAt = ");
        builder.push_bind(format_db_time(updated_at));
        if let Some(qr_code) = update.qr_code {
            builder.push(", qrCode = ");
            builder.push_bind(qr_code);
        }
        if let Some(is_returnable) = update.is_returnable {
            builder.push(", isReturnable = ");
            builder.push_bind(is_returnable);
        }
        if let Some(due_date) = update.due_date {
            builder.push(", dueDate = ");
            builder.push_bind(format_db_time(due_date));
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id.to_owned());

        let mut tx = self.pool().begin().await?;
        let result = builder.build().execute(&mut *tx).await?;
        tx.commit().await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        debug!(id, "container updated");
        self.container_by_id(id).await
    }

    pub async fn delete_container(&self, id: &str) -> anyhow::Result<bool> {
        let mut tx = self.pool().begin().await?;
        let result = sqlx::query("DELETE FROM Container WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_all_containers(&self) -> anyhow::Result<u64> {
        let mut tx = self.pool().begin().await?;
        let result = sqlx::query("DELETE FROM Container").execute(&mut *tx).await?;
        tx.commit().await?;
        info!(count = result.rows_affected(), "deleted all containers");
        Ok(result.rows_affected())
    }

    pub async fn all_containers(&self) -> anyhow::Result<Vec<Container>> {
        let rows = sqlx::query("SELECT * FROM Container ORDER BY updatedAt DESC")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(container_from_row).collect()
    }

    /// Containers updated strictly after `since`.
    pub async fn containers_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<Container>> {
        let rows = sqlx::query("SELECT * FROM Container WHERE updatedAt > ? ORDER BY updatedAt DESC")
            .bind(format_db_time(since))
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(container_from_row).collect()
    }

    /// Replace the whole container set in one transaction. The server's sync
    /// response is authoritative.
    pub async fn replace_all_containers(&self, containers: &[Container]) -> anyhow::Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM Container").execute(&mut *tx).await?;
        for container in containers {
            sqlx::query(
                "INSERT INTO Container (id, qrCode, isReturnable, dueDate, updatedAt) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&container.id)
            .bind(&container.qr_code)
            .bind(container.is_returnable)
            .bind(container.due_date.map(format_db_time))
            .bind(format_db_time(container.updated_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        info!(count = containers.len(), "replaced container set");
        Ok(())
    }
}
