// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The five scripted interactions with the microcontroller (SEQ1-SEQ5).
//!
//! Every command inside a sequence is followed by an ack wait with a 5 s
//! timeout; a timeout or link failure aborts the sequence, leaves the
//! container light red and audits the failure. Completion flags from
//! earlier sequences in the cycle survive a failure; only a storage run
//! clears them.

use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::backend::BackendClient;
use crate::link::frame::{
    Actuator, ActuatorAction, DoorAction, LightColor, LightMode, LightPosition, MessageType,
    Sensor,
};

use super::validate::Decision;
use super::Engine;

/// Ack timeout for every sequence step.
pub(crate) const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a scanned container may take to produce a QR code.
pub(crate) const QR_WAIT: Duration = Duration::from_secs(30);

/// Window for both items to leave their bays during storage.
pub(crate) const REMOVAL_WINDOW: Duration = Duration::from_secs(120);

/// Quiet interval after a completed cover/container sequence before the
/// bays are stored away.
pub(crate) const STORAGE_DELAY: Duration = Duration::from_secs(180);

/// Activation lights that nobody followed up on go dark after this long.
pub(crate) const ACTIVATION_LIGHT_TIMEOUT: Duration = Duration::from_secs(60);

/// Settling time between door unblock and re-block during activation.
const DOOR_OPEN_WINDOW: Duration = Duration::from_secs(1);

/// Settling time after re-opening the bays during recovery.
const RECOVERY_SETTLE: Duration = Duration::from_secs(2);

impl<T, A> Engine<T, A>
where
    T: AsyncRead + AsyncWrite + Unpin,
    A: BackendClient,
{
    /// SEQ1: the user pressed the activation button: pulse the door
    /// solenoids open, then light both bays white.
    pub(crate) async fn seq1_activation(&mut self) {
        info!("starting SEQ1 activation");
        self.audit.log_sequence_started("SEQ1 activation").await;
        let started = Instant::now();

        if let Err(e) = self.seq1_steps().await {
            self.fail_sequence("SEQ1 activation", &e).await;
            return;
        }

        self.seq1_lights_active = Some(Instant::now());
        info!("SEQ1 complete, waiting for cover and container");
        self.audit.log_sequence_completed("SEQ1 activation", started.elapsed()).await;
    }

    async fn seq1_steps(&mut self) -> anyhow::Result<()> {
        self.step_door(DoorAction::Unblock).await?;
        tokio::time::sleep(DOOR_OPEN_WINDOW).await;
        self.step_door(DoorAction::Block).await?;
        self.step_light(LightPosition::Cover, LightColor::White).await?;
        self.step_light(LightPosition::Container, LightColor::White).await?;
        Ok(())
    }

    /// SEQ2: the cover sensor reports an item: acknowledge with a green
    /// cover light and stamp the completion.
    pub(crate) async fn seq2_cover_accepted(&mut self) {
        info!("starting SEQ2 cover accepted");
        self.audit.log_sequence_started("SEQ2 cover accepted").await;
        let started = Instant::now();
        self.seq1_lights_active = None;

        if let Err(e) = self.step_light(LightPosition::Cover, LightColor::Green).await {
            self.fail_sequence("SEQ2 cover accepted", &e).await;
            return;
        }

        self.seq2_completed = Some(Instant::now());
        self.audit.log_sequence_completed("SEQ2 cover accepted", started.elapsed()).await;
    }

    /// SEQ3: the container sensor reports an item: wait for the QR label,
    /// validate it, and answer with a green or red container light.
    pub(crate) async fn seq3_container_scan(&mut self) {
        info!("starting SEQ3 container scan");
        self.audit.log_sequence_started("SEQ3 container scan").await;
        let started = Instant::now();
        self.seq1_lights_active = None;

        // The serial link is intentionally not drained during this wait;
        // deferred frames are handled by the next tick.
        let scan = tokio::time::timeout(QR_WAIT, self.qr_rx_recv()).await.ok().flatten();

        let decision = match scan {
            Some(raw) => {
                self.audit.log_container_scanned(&raw).await;
                self.decide(&raw).await
            }
            None => {
                warn!("no QR code scanned within the window");
                self.audit.log_error("Container scan window elapsed without a QR code").await;
                Decision::Rejected
            }
        };

        let color = match decision {
            Decision::Accepted => LightColor::Green,
            Decision::Rejected => LightColor::Red,
        };
        if let Err(e) = self.step_light(LightPosition::Container, color).await {
            self.fail_sequence("SEQ3 container scan", &e).await;
            return;
        }

        self.seq3_completed = Some(Instant::now());
        self.audit.log_sequence_completed("SEQ3 container scan", started.elapsed()).await;
    }

    async fn qr_rx_recv(&mut self) -> Option<String> {
        self.qr_rx.recv().await
    }

    /// SEQ4, storage: drive both bays through their store motion, wait for
    /// the sensors to clear, then go dark. Runs only through the automatic
    /// trigger once a completed cycle is old enough.
    pub(crate) async fn seq4_storage(&mut self) {
        self.seq4_in_progress = true;
        info!("starting SEQ4 storage");
        self.audit.log_sequence_started("SEQ4 storage").await;
        let started = Instant::now();

        let result = self.seq4_steps().await;
        self.seq4_in_progress = false;

        match result {
            Ok(()) => {
                self.seq2_completed = None;
                self.seq3_completed = None;
                self.audit.log_sequence_completed("SEQ4 storage", started.elapsed()).await;

                // An occupied sensor right after storage means something is
                // stuck; try to shake it loose.
                if self.link.sensors.any_present() {
                    self.seq5_recovery().await;
                } else {
                    self.audit.log_hardware_status("bays", "clear").await;
                }
            }
            Err(e) => self.fail_sequence("SEQ4 storage", &e).await,
        }
    }

    async fn seq4_steps(&mut self) -> anyhow::Result<()> {
        self.step_actuator(Actuator::Container, ActuatorAction::Store).await?;
        self.step_actuator(Actuator::Cover, ActuatorAction::Store).await?;

        if !self.wait_for_removals().await {
            anyhow::bail!("timed out waiting for cover and container removal");
        }

        self.step_all_lights_off().await?;
        Ok(())
    }

    /// SEQ4.1: consume frames until both sensors have reported absent.
    ///
    /// Absent edges flip the tracked sensor; every non-ACK frame is ACKed;
    /// anything else is otherwise ignored. Returns false on timeout.
    async fn wait_for_removals(&mut self) -> bool {
        info!("waiting for cover and container removal");
        let deadline = Instant::now() + REMOVAL_WINDOW;
        let mut cover_removed = false;
        let mut container_removed = false;

        loop {
            let frames = match self.link.receive().await {
                Ok(frames) => frames,
                Err(e) => {
                    error!("receive failed during removal wait: {e}");
                    return false;
                }
            };
            for frame in &frames {
                if frame.kind == MessageType::Ack {
                    continue;
                }
                if let Some((sensor, present)) = frame.sensor_change() {
                    if !present {
                        self.link.sensors.set(sensor, false);
                        match sensor {
                            Sensor::Cover => cover_removed = true,
                            Sensor::Container => container_removed = true,
                        }
                        info!(sensor = sensor.name(), "removal observed");
                    }
                }
                if let Err(e) = self.link.send_ack(frame).await {
                    error!("failed to ack during removal wait: {e}");
                }
            }
            if cover_removed && container_removed {
                info!("both items removed");
                return true;
            }
            if Instant::now() >= deadline {
                warn!(cover_removed, container_removed, "removal wait timed out");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// SEQ5, recovery: re-open the bays to free stuck items; anything still
    /// detected afterwards gets a red light and a maintenance error.
    pub(crate) async fn seq5_recovery(&mut self) {
        info!("starting SEQ5 recovery");
        self.audit.log_sequence_started("SEQ5 recovery").await;
        let started = Instant::now();

        if let Err(e) = self.seq5_steps().await {
            self.fail_sequence("SEQ5 recovery", &e).await;
            return;
        }

        self.audit.log_sequence_completed("SEQ5 recovery", started.elapsed()).await;
    }

    async fn seq5_steps(&mut self) -> anyhow::Result<()> {
        self.step_actuator(Actuator::Container, ActuatorAction::Open).await?;
        self.step_actuator(Actuator::Cover, ActuatorAction::Open).await?;
        tokio::time::sleep(RECOVERY_SETTLE).await;

        let mut warned = false;
        if self.link.sensors.cover {
            error!("cover still detected after recovery, maintenance required");
            self.link
                .control_light(LightPosition::Cover, LightColor::Red, LightMode::Steady)
                .await
                .context("failed to set cover warning light")?;
            self.audit.log_hardware_error("cover bay", "item stuck after recovery").await;
            warned = true;
        }
        if self.link.sensors.container {
            error!("container still detected after recovery, maintenance required");
            self.link
                .control_light(LightPosition::Container, LightColor::Red, LightMode::Steady)
                .await
                .context("failed to set container warning light")?;
            self.audit.log_hardware_error("container bay", "item stuck after recovery").await;
            warned = true;
        }
        if warned && !self.link.wait_for_ack(ACK_TIMEOUT).await {
            anyhow::bail!("no ack for warning lights");
        }
        Ok(())
    }

    // Single sequence steps: send one command, then insist on its ack.

    async fn step_door(&mut self, action: DoorAction) -> anyhow::Result<()> {
        self.link.control_door(action).await.context("door command failed")?;
        if !self.link.wait_for_ack(ACK_TIMEOUT).await {
            anyhow::bail!("no ack for door control");
        }
        Ok(())
    }

    async fn step_light(
        &mut self,
        position: LightPosition,
        color: LightColor,
    ) -> anyhow::Result<()> {
        self.link
            .control_light(position, color, LightMode::Steady)
            .await
            .context("light command failed")?;
        if !self.link.wait_for_ack(ACK_TIMEOUT).await {
            anyhow::bail!("no ack for light command");
        }
        Ok(())
    }

    async fn step_actuator(
        &mut self,
        actuator: Actuator,
        action: ActuatorAction,
    ) -> anyhow::Result<()> {
        self.link.control_actuator(actuator, action).await.context("actuator command failed")?;
        if !self.link.wait_for_ack(ACK_TIMEOUT).await {
            anyhow::bail!("no ack for actuator command");
        }
        Ok(())
    }

    /// Both lights off with a single ack wait for the pair.
    async fn step_all_lights_off(&mut self) -> anyhow::Result<()> {
        self.link.all_lights_off().await.context("lights-off command failed")?;
        if !self.link.wait_for_ack(ACK_TIMEOUT).await {
            anyhow::bail!("no ack for lights off");
        }
        Ok(())
    }

    /// Common failure path: red container light, audit, carry on.
    async fn fail_sequence(&mut self, sequence: &str, error: &anyhow::Error) {
        error!("{sequence} failed: {error:#}");
        self.set_error_state().await;
        self.audit.log_sequence_failed(sequence, &format!("{error:#}")).await;
    }
}
