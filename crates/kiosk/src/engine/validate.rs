// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The validation decision policy behind the container scan.
//!
//! A scan is first checked structurally and cryptographically. A verified
//! code is then judged by the backend when it answers; a transport failure
//! falls back to the local store, and an explicit backend rejection is final
//! (no fallback). Every outcome is audited; offline decisions carry the
//! offline flag.

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

use crate::backend::{parse_wire_time, BackendClient, ValidatedContainer};
use crate::qr::Evaluation;
use crate::store::{Container, ContainerUpdate};

use super::Engine;

/// What the container light should say at the end of the scan sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Accepted,
    Rejected,
}

impl<T, A> Engine<T, A>
where
    T: AsyncRead + AsyncWrite + Unpin,
    A: BackendClient,
{
    /// Evaluate a raw scan and decide whether the return is accepted.
    pub(crate) async fn decide(&mut self, raw: &str) -> Decision {
        let code = match self.validator.evaluate(raw) {
            Evaluation::Valid { code } => code,
            Evaluation::Fraud { reason } => {
                warn!("fraud attempt: {reason}");
                self.audit
                    .log_security_event(
                        "fraud_attempt",
                        &format!("QR fraud attempt detected: {reason}"),
                        &serde_json::json!({
                            "qr_code": raw.trim(),
                            "validation_result": "fraud_attempt",
                            "error": reason,
                        }),
                    )
                    .await;
                return Decision::Rejected;
            }
        };

        info!(%code, "QR verified, resolving container");
        let container = match self.store.container_by_qr(&code).await {
            Ok(Some(container)) => container,
            Ok(None) => {
                warn!(%code, "container not found locally");
                self.audit.log_container_not_found(&code).await;
                return Decision::Rejected;
            }
            Err(e) => {
                warn!("container lookup failed: {e:#}");
                self.audit.log_database_error(&format!("{e:#}")).await;
                return Decision::Rejected;
            }
        };

        match self.api.validate_container(&container.id).await {
            Ok(Some(data)) => self.apply_server_decision(container, data).await,
            Ok(None) => {
                // The backend answered and said no; an explicit rejection is
                // never overridden by the offline path.
                info!(container = %container.id, "backend rejected the validation request");
                self.audit
                    .log_container_rejected(
                        &container.qr_code,
                        "backend reported failure",
                        Some(&container.id),
                    )
                    .await;
                Decision::Rejected
            }
            Err(e) => {
                warn!("backend unreachable, falling back to local validation: {e:#}");
                self.offline_fallback(container).await
            }
        }
    }

    /// The server's verdict is authoritative; mirror its fields locally.
    async fn apply_server_decision(
        &mut self,
        container: Container,
        data: ValidatedContainer,
    ) -> Decision {
        let update = ContainerUpdate {
            is_returnable: Some(data.is_returnable),
            updated_at: data.updated_at.as_deref().and_then(parse_wire_time),
            ..Default::default()
        };
        match self.store.update_container(&container.id, update).await {
            Ok(Some(_)) => info!(container = %container.id, "container updated from server"),
            Ok(None) => warn!(container = %container.id, "container vanished during update"),
            Err(e) => warn!("failed to mirror server verdict: {e:#}"),
        }

        if data.is_returnable {
            info!(container = %container.id, "return accepted by server");
            self.audit.log_container_validated(&container.id, &container.qr_code).await;
            Decision::Accepted
        } else {
            info!(container = %container.id, "return rejected by server");
            self.audit
                .log_container_rejected(
                    &container.qr_code,
                    "container return not valid",
                    Some(&container.id),
                )
                .await;
            Decision::Rejected
        }
    }

    /// Local-store verdict when the backend is unreachable: accept iff the
    /// container is returnable and not past its due date.
    async fn offline_fallback(&mut self, container: Container) -> Decision {
        info!(container = %container.id, "validating offline");

        if !container.is_returnable {
            warn!(container = %container.id, "not returnable locally");
            self.audit
                .log_container_not_returnable(&container.id, &container.qr_code, true)
                .await;
            return Decision::Rejected;
        }

        if let Some(due_date) = container.due_date {
            if due_date < Utc::now() {
                warn!(container = %container.id, %due_date, "past due date");
                self.audit
                    .log_container_expired(&container.id, &container.qr_code, due_date, true)
                    .await;
                return Decision::Rejected;
            }
        }

        info!(container = %container.id, "return accepted offline");
        self.audit
            .log_return_valid(
                &container.id,
                format!("Offline validation succeeded - QR: {}", container.qr_code),
                true,
            )
            .await;
        Decision::Accepted
    }
}
