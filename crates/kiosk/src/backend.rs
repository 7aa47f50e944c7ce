// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the kiosk backend.
//!
//! All three endpoints are JSON POSTs wrapped in a `{success, data}`
//! envelope. Transport problems surface as `Err`; a well-formed reply with
//! `success = false` surfaces as `Ok(None)` so callers can tell an explicit
//! rejection from an unreachable backend.

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::store::parse_db_time;

pub const HEALTHCHECK_PATH: &str = "/functions/v1/raspberry-healthcheck";
pub const SYNC_PATH: &str = "/functions/v1/raspberry-sync";
pub const VALIDATE_PATH: &str = "/functions/v1/raspberry-container-validate";

/// Backend operations, seamed as a trait so the engine and the sync service
/// can be exercised against a stub.
#[allow(async_fn_in_trait)]
pub trait BackendClient {
    /// `Ok(None)` means the backend explicitly reported failure.
    async fn healthcheck(
        &self,
        version: &str,
        update_failures: i64,
    ) -> anyhow::Result<Option<HealthcheckData>>;

    async fn sync(
        &self,
        logs: Vec<LogUpload>,
        containers: Vec<ContainerUpload>,
    ) -> anyhow::Result<Option<Vec<RemoteContainer>>>;

    async fn validate_container(
        &self,
        container_id: &str,
    ) -> anyhow::Result<Option<ValidatedContainer>>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthcheckData {
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthcheckRequest {
    pub version: String,
    pub update_failures: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogUpload {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub is_offline_action: bool,
    pub container_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerUpload {
    pub id: String,
    pub is_returnable: bool,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncRequest {
    logs: Vec<LogUpload>,
    containers: Vec<ContainerUpload>,
}

/// A container row as the sync endpoint returns it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteContainer {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub qr_code: String,
    #[serde(default = "default_returnable")]
    pub is_returnable: bool,
    #[serde(default)]
    pub due_time: Option<String>,
}

fn default_returnable() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
struct ValidateRequest {
    id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateData {
    pub container_data: ValidatedContainer,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedContainer {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub is_returnable: bool,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.api_key))
                .context("API_KEY is not a valid header value")?,
        );
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&config.raspberry_api_key)
                .context("RASPBERRY_API_KEY is not a valid header value")?,
        );
        headers.insert(
            "x-name",
            HeaderValue::from_str(&config.raspberry_name)
                .context("RASPBERRY_NAME is not a valid header value")?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.api_timeout))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { http, base_url: config.base_api_url.trim_end_matches('/').to_owned() })
    }

    async fn post<B: Serialize, T: DeserializeOwned + Default>(
        &self,
        path: &str,
        body: &B,
    ) -> anyhow::Result<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("POST {path} returned HTTP {status}: {text}");
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .with_context(|| format!("POST {path} returned an unparseable body"))?;
        if !envelope.success {
            warn!(path, "backend reported failure");
            return Ok(None);
        }
        Ok(Some(envelope.data.unwrap_or_default()))
    }
}

impl BackendClient for ApiClient {
    async fn healthcheck(
        &self,
        version: &str,
        update_failures: i64,
    ) -> anyhow::Result<Option<HealthcheckData>> {
        debug!("sending healthcheck");
        let body = HealthcheckRequest { version: version.to_owned(), update_failures };
        self.post(HEALTHCHECK_PATH, &body).await
    }

    async fn sync(
        &self,
        logs: Vec<LogUpload>,
        containers: Vec<ContainerUpload>,
    ) -> anyhow::Result<Option<Vec<RemoteContainer>>> {
        debug!(logs = logs.len(), containers = containers.len(), "sending sync");
        let body = SyncRequest { logs, containers };
        self.post(SYNC_PATH, &body).await
    }

    async fn validate_container(
        &self,
        container_id: &str,
    ) -> anyhow::Result<Option<ValidatedContainer>> {
        debug!(container_id, "validating container with backend");
        let body = ValidateRequest { id: container_id.to_owned() };
        let data: Option<ValidateData> = self.post(VALIDATE_PATH, &body).await?;
        Ok(data.map(|d| d.container_data))
    }
}

/// Render a timestamp the way the backend expects it: `YYYY-MM-DD HH:MM:SS.mmm+00`.
pub fn format_wire_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S%.3f+00").to_string()
}

/// Parse a backend timestamp tolerantly (RFC 3339 with or without `Z`,
/// naive values interpreted as UTC).
pub fn parse_wire_time(s: &str) -> Option<DateTime<Utc>> {
    parse_db_time(s)
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
