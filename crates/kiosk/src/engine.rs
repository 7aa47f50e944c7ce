// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The sequence engine: dispatches microcontroller events into the return
//! sequences, evaluates automatic triggers, and enforces the two mode gates.
//!
//! Everything runs on the ~1 Hz tick: the top-level loop calls
//! [`Engine::drain_mode_events`], [`Engine::process_messages`] and
//! [`Engine::drain_idle_scans`] in that order, with the sync service's
//! cadence check in between. Sequences execute inline, so at most one runs
//! at any instant; the ack waits inside a sequence never re-enter dispatch.

pub mod sequences;
pub mod validate;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::audit::AuditLogger;
use crate::backend::BackendClient;
use crate::link::frame::{
    DoorAction, Frame, LightColor, LightMode, LightPosition, MessageType, Sensor,
};
use crate::link::Link;
use crate::qr::{Evaluation, QrValidator};
use crate::store::Store;
use crate::sync::ModeEvent;

pub struct Engine<T, A> {
    pub(crate) link: Link<T>,
    pub(crate) store: Store,
    pub(crate) api: A,
    pub(crate) audit: AuditLogger,
    pub(crate) validator: QrValidator,
    qr_rx: mpsc::Receiver<String>,
    mode_rx: mpsc::UnboundedReceiver<ModeEvent>,
    device_inactive: bool,
    secure_mode: bool,
    /// Set while the activation lights are on, with the activation time.
    pub(crate) seq1_lights_active: Option<Instant>,
    /// Completion time of the cover-accepted sequence for this cycle.
    pub(crate) seq2_completed: Option<Instant>,
    /// Completion time of the container-scan sequence for this cycle.
    pub(crate) seq3_completed: Option<Instant>,
    /// Re-entry guard for the storage sequence.
    pub(crate) seq4_in_progress: bool,
}

impl<T, A> Engine<T, A>
where
    T: AsyncRead + AsyncWrite + Unpin,
    A: BackendClient,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        link: Link<T>,
        store: Store,
        api: A,
        audit: AuditLogger,
        validator: QrValidator,
        qr_rx: mpsc::Receiver<String>,
        mode_rx: mpsc::UnboundedReceiver<ModeEvent>,
        device_inactive: bool,
        secure_mode: bool,
    ) -> Self {
        Self {
            link,
            store,
            api,
            audit,
            validator,
            qr_rx,
            mode_rx,
            device_inactive,
            secure_mode,
            seq1_lights_active: None,
            seq2_completed: None,
            seq3_completed: None,
            seq4_in_progress: false,
        }
    }

    /// Either mode gate suspends event-driven sequences.
    pub fn gated(&self) -> bool {
        self.device_inactive || self.secure_mode
    }

    pub fn is_device_inactive(&self) -> bool {
        self.device_inactive
    }

    pub fn is_secure_mode(&self) -> bool {
        self.secure_mode
    }

    /// Drain the serial link, dispatch every frame, then evaluate the
    /// automatic triggers.
    pub async fn process_messages(&mut self) {
        let frames = match self.link.receive().await {
            Ok(frames) => frames,
            Err(e) => {
                error!("link receive failed: {e}");
                self.audit.log_link_error(&e.to_string()).await;
                return;
            }
        };
        for frame in frames {
            self.dispatch(frame).await;
        }
        self.check_automatic_sequences().await;
    }

    /// Handle one incoming frame. Every non-ACK frame is acknowledged before
    /// any business logic runs on it.
    async fn dispatch(&mut self, frame: Frame) {
        if frame.kind != MessageType::Ack {
            if let Err(e) = self.link.send_ack(&frame).await {
                error!("failed to ack {}: {e}", frame.kind.name());
            }
        }

        match frame.kind {
            MessageType::Ack => {
                debug!(id = frame.id, "stray ack outside a wait");
            }
            MessageType::ButtonPushed => {
                if self.gated() {
                    warn!(
                        inactive = self.device_inactive,
                        secure = self.secure_mode,
                        "button press ignored while suspended"
                    );
                    return;
                }
                info!("button pressed");
                self.seq1_activation().await;
            }
            MessageType::SensorStateChange => {
                let Some((sensor, present)) = frame.sensor_change() else {
                    warn!("malformed sensor state payload");
                    return;
                };
                if self.gated() {
                    warn!(
                        sensor = sensor.name(),
                        present, "sensor change ignored while suspended"
                    );
                    return;
                }
                info!(sensor = sensor.name(), present, "sensor change");
                self.link.sensors.set(sensor, present);
                if present {
                    match sensor {
                        Sensor::Cover => self.seq2_cover_accepted().await,
                        Sensor::Container => self.seq3_container_scan().await,
                    }
                }
            }
            MessageType::ErrorMsg => {
                let text = String::from_utf8_lossy(&frame.payload).into_owned();
                error!("hardware error from microcontroller: {text}");
                self.audit.log_hardware_error("microcontroller", &text).await;
                self.set_error_state().await;
            }
            MessageType::GetSensorStatus
            | MessageType::Restart
            | MessageType::ActuatorMovement
            | MessageType::LightManagement
            | MessageType::DoorControl => {
                warn!("unexpected {} frame from microcontroller", frame.kind.name());
            }
        }
    }

    /// Automatic triggers: the activation-light timeout, the storage
    /// sequence once a completed cycle is old enough, and recovery after a
    /// storage run that left a sensor occupied.
    async fn check_automatic_sequences(&mut self) {
        if let Some(activated_at) = self.seq1_lights_active {
            if activated_at.elapsed() > sequences::ACTIVATION_LIGHT_TIMEOUT {
                info!("activation lights timed out, turning off");
                if let Err(e) = self.link.all_lights_off().await {
                    warn!("failed to turn activation lights off: {e}");
                }
                self.seq1_lights_active = None;
            }
        }

        if self.storage_due() {
            self.seq4_storage().await;
        }
    }

    fn storage_due(&self) -> bool {
        if self.seq4_in_progress {
            return false;
        }
        let aged =
            |t: Option<Instant>| t.is_some_and(|t| t.elapsed() > sequences::STORAGE_DELAY);
        aged(self.seq2_completed) || aged(self.seq3_completed)
    }

    /// Best-effort error signal: red light on the container bay.
    pub(crate) async fn set_error_state(&mut self) {
        if let Err(e) = self
            .link
            .control_light(LightPosition::Container, LightColor::Red, LightMode::Steady)
            .await
        {
            error!("failed to set error light: {e}");
        }
    }

    /// Apply mode changes pushed by the sync service.
    pub async fn drain_mode_events(&mut self) {
        while let Ok(event) = self.mode_rx.try_recv() {
            match event {
                ModeEvent::Active(true) => self.exit_inactive_mode().await,
                ModeEvent::Active(false) => self.enter_inactive_mode().await,
                ModeEvent::Secure(true) => self.enter_secure_mode().await,
                ModeEvent::Secure(false) => self.exit_secure_mode().await,
            }
        }
    }

    /// Re-apply the persisted mode gates after a restart.
    pub async fn apply_startup_modes(&mut self) {
        if self.device_inactive {
            warn!("device persisted as inactive, applying lockdown");
            self.lockdown().await;
        }
        if self.secure_mode {
            warn!("device persisted in secure mode, applying lockdown");
            self.lockdown().await;
        }
    }

    async fn enter_inactive_mode(&mut self) {
        if self.device_inactive {
            return;
        }
        warn!("entering inactive mode");
        self.device_inactive = true;
        self.lockdown().await;
        self.audit.log_inactive_mode_entered().await;
    }

    async fn exit_inactive_mode(&mut self) {
        if !self.device_inactive {
            return;
        }
        info!("exiting inactive mode");
        self.device_inactive = false;
        if !self.secure_mode {
            self.release().await;
        }
        self.audit.log_inactive_mode_exited().await;
    }

    async fn enter_secure_mode(&mut self) {
        if self.secure_mode {
            return;
        }
        warn!("entering secure mode");
        self.secure_mode = true;
        self.lockdown().await;
    }

    async fn exit_secure_mode(&mut self) {
        if !self.secure_mode {
            return;
        }
        info!("exiting secure mode");
        self.secure_mode = false;
        if !self.device_inactive {
            self.release().await;
        }
    }

    /// Red lights on both bays and blocked doors. Best effort.
    async fn lockdown(&mut self) {
        for position in [LightPosition::Cover, LightPosition::Container] {
            if let Err(e) =
                self.link.control_light(position, LightColor::Red, LightMode::Steady).await
            {
                error!("failed to set lockdown light: {e}");
            }
        }
        if let Err(e) = self.link.control_door(DoorAction::Block).await {
            error!("failed to block doors: {e}");
        }
    }

    /// Lights off and doors unblocked when leaving the last active gate.
    async fn release(&mut self) {
        if let Err(e) = self.link.all_lights_off().await {
            error!("failed to turn lights off: {e}");
        }
        if let Err(e) = self.link.control_door(DoorAction::Unblock).await {
            error!("failed to unblock doors: {e}");
        }
    }

    /// Scans arriving while no sequence waits for one: validate and audit,
    /// but never drive the state machine.
    pub async fn drain_idle_scans(&mut self) {
        while let Ok(raw) = self.qr_rx.try_recv() {
            if self.gated() {
                debug!("scan ignored while suspended");
                continue;
            }
            info!("QR code scanned outside a return sequence");
            match self.validator.evaluate(&raw) {
                Evaluation::Valid { code } => {
                    info!(%code, "valid container code scanned while idle");
                }
                Evaluation::Fraud { reason } => {
                    warn!("fraud attempt outside a sequence: {reason}");
                    self.audit
                        .log_security_event(
                            "fraud_attempt",
                            &format!("QR fraud attempt outside a sequence: {reason}"),
                            &serde_json::json!({
                                "qr_code": raw,
                                "validation_result": "fraud_attempt",
                                "error": reason,
                            }),
                        )
                        .await;
                }
            }
        }
    }

    /// Ask the microcontroller for a sensor snapshot; the replies come back
    /// through normal dispatch.
    pub async fn request_sensor_snapshot(&mut self) -> Result<(), crate::link::LinkError> {
        self.link.query_sensor_status().await
    }

    /// Cooperative shutdown: leave the hardware dark.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.link.all_lights_off().await {
            warn!("failed to turn lights off during shutdown: {e}");
        }
    }
}

#[cfg(test)]
#[path = "engine/engine_tests.rs"]
mod tests;
