// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Serial link to the microcontroller: framing, ids, ACK discipline.
//!
//! The link owns the serial handle and the single message-id counter; every
//! outgoing command goes through it. It is generic over the transport so
//! tests can drive it over an in-memory duplex pipe.
//!
//! The ack waits here deliberately never re-enter the engine's dispatcher:
//! while waiting they only ACK incoming frames and keep the sensor booleans
//! current. Automatic sequence triggers are evaluated by the engine tick,
//! never from inside a wait.

pub mod frame;

use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::{debug, error, warn};

use self::frame::{
    Actuator, ActuatorAction, DoorAction, Frame, FrameBuffer, FrameError, LightColor, LightMode,
    LightPosition, MessageType, Sensor,
};

/// How often the ack waits re-check the read side.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Last observed state of the two bay sensors.
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorState {
    pub cover: bool,
    pub container: bool,
}

impl SensorState {
    pub fn set(&mut self, sensor: Sensor, present: bool) {
        match sensor {
            Sensor::Cover => self.cover = present,
            Sensor::Container => self.container = present,
        }
    }

    pub fn any_present(&self) -> bool {
        self.cover || self.container
    }
}

/// Outcome of [`Link::wait_for_ack_or_sensor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ack,
    Sensor,
    Timeout,
}

pub struct Link<T> {
    transport: T,
    id_counter: u8,
    buffer: FrameBuffer,
    pub sensors: SensorState,
}

impl<T: AsyncRead + AsyncWrite + Unpin> Link<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            id_counter: 0,
            buffer: FrameBuffer::new(),
            sensors: SensorState::default(),
        }
    }

    /// Next outgoing message id. Cycles 1..=99, 0, 1, ...
    fn next_id(&mut self) -> u8 {
        self.id_counter = (self.id_counter + 1) % 100;
        self.id_counter
    }

    /// Encode and write a frame with the next message id.
    pub async fn send(&mut self, kind: MessageType, payload: Vec<u8>) -> Result<(), LinkError> {
        let id = self.next_id();
        let wire = Frame::new(kind, id, payload).encode()?;
        self.transport.write_all(&wire).await?;
        self.transport.flush().await?;
        debug!(id, "sent {}", kind.name());
        Ok(())
    }

    /// Acknowledge a received frame. The ACK carries the original's type and
    /// id in its payload and always uses message id 0.
    pub async fn send_ack(&mut self, original: &Frame) -> Result<(), LinkError> {
        let ack = Frame::new(MessageType::Ack, 0, vec![original.kind as u8, original.id]);
        let wire = ack.encode()?;
        self.transport.write_all(&wire).await?;
        self.transport.flush().await?;
        debug!(id = original.id, "acked {}", original.kind.name());
        Ok(())
    }

    /// Drain whatever the transport has buffered without blocking.
    async fn read_available(&mut self) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            let transport = &mut self.transport;
            let read = std::future::poll_fn(|cx| {
                let mut buf = ReadBuf::new(&mut chunk);
                match Pin::new(&mut *transport).poll_read(cx, &mut buf) {
                    Poll::Ready(Ok(())) => Poll::Ready(Ok(Some(buf.filled().len()))),
                    Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
                    Poll::Pending => Poll::Ready(Ok(None)),
                }
            })
            .await?;
            match read {
                Some(0) | None => break,
                Some(n) => {
                    out.extend_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        break;
                    }
                }
            }
        }
        Ok(out)
    }

    /// Drain the read side and extract all complete frames.
    ///
    /// Invalid frames are dropped inside the frame buffer; partial trailing
    /// bytes stay buffered for the next call.
    pub async fn receive(&mut self) -> Result<Vec<Frame>, LinkError> {
        let data = self.read_available().await?;
        if data.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.buffer.feed(&data))
    }

    /// Block until an ACK arrives or `timeout` elapses.
    ///
    /// While waiting, incoming sensor changes update the tracked sensor state
    /// and are ACKed; button presses and error messages are ACKed and dropped
    /// so no sequence starts from inside another sequence's step.
    pub async fn wait_for_ack(&mut self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let frames = match self.receive().await {
                Ok(frames) => frames,
                Err(e) => {
                    error!("receive failed during ack wait: {e}");
                    return false;
                }
            };
            let mut acked = false;
            for frame in &frames {
                if self.absorb_while_waiting(frame).await {
                    acked = true;
                }
            }
            if acked {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Like [`wait_for_ack`], but also returns early on an incoming sensor
    /// change (which is still ACKed and tracked).
    ///
    /// [`wait_for_ack`]: Self::wait_for_ack
    pub async fn wait_for_ack_or_sensor(&mut self, timeout: Duration) -> WaitOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let frames = match self.receive().await {
                Ok(frames) => frames,
                Err(e) => {
                    error!("receive failed during ack wait: {e}");
                    return WaitOutcome::Timeout;
                }
            };
            let mut outcome = None;
            for frame in &frames {
                match frame.kind {
                    MessageType::Ack => {
                        debug!(id = frame.id, "ack received");
                        outcome.get_or_insert(WaitOutcome::Ack);
                    }
                    MessageType::SensorStateChange => {
                        if let Some((sensor, present)) = frame.sensor_change() {
                            self.sensors.set(sensor, present);
                        }
                        self.ack_quietly(frame).await;
                        outcome.get_or_insert(WaitOutcome::Sensor);
                    }
                    _ => self.ack_quietly(frame).await,
                }
            }
            if let Some(outcome) = outcome {
                return outcome;
            }
            if tokio::time::Instant::now() >= deadline {
                return WaitOutcome::Timeout;
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Handle one frame received during an ack wait. Returns true for ACKs.
    async fn absorb_while_waiting(&mut self, frame: &Frame) -> bool {
        match frame.kind {
            MessageType::Ack => {
                debug!(id = frame.id, "ack received");
                return true;
            }
            MessageType::SensorStateChange => {
                if let Some((sensor, present)) = frame.sensor_change() {
                    self.sensors.set(sensor, present);
                    debug!(sensor = sensor.name(), present, "sensor change absorbed during ack wait");
                } else {
                    warn!("malformed sensor payload absorbed during ack wait");
                }
                self.ack_quietly(frame).await;
            }
            MessageType::ButtonPushed => {
                debug!("button press dropped during ack wait");
                self.ack_quietly(frame).await;
            }
            MessageType::ErrorMsg => {
                let text = String::from_utf8_lossy(&frame.payload);
                error!("hardware error during ack wait: {text}");
                self.ack_quietly(frame).await;
            }
            _ => self.ack_quietly(frame).await,
        }
        false
    }

    async fn ack_quietly(&mut self, frame: &Frame) {
        if let Err(e) = self.send_ack(frame).await {
            error!("failed to ack {}: {e}", frame.kind.name());
        }
    }

    // Command helpers. Payload layouts follow the wire tables in `frame`.

    pub async fn control_door(&mut self, action: DoorAction) -> Result<(), LinkError> {
        self.send(MessageType::DoorControl, vec![action as u8]).await
    }

    pub async fn control_actuator(
        &mut self,
        actuator: Actuator,
        action: ActuatorAction,
    ) -> Result<(), LinkError> {
        self.send(MessageType::ActuatorMovement, vec![actuator as u8, action as u8]).await
    }

    pub async fn control_light(
        &mut self,
        position: LightPosition,
        color: LightColor,
        mode: LightMode,
    ) -> Result<(), LinkError> {
        self.send(MessageType::LightManagement, vec![position as u8, color as u8, mode as u8])
            .await
    }

    /// Turn both lights off. Sends one command per light.
    pub async fn all_lights_off(&mut self) -> Result<(), LinkError> {
        self.control_light(LightPosition::Container, LightColor::Off, LightMode::Steady).await?;
        self.control_light(LightPosition::Cover, LightColor::Off, LightMode::Steady).await
    }

    /// Ask the microcontroller for a sensor snapshot; it replies with one
    /// SENSOR_STATE_CHANGE per sensor.
    pub async fn query_sensor_status(&mut self) -> Result<(), LinkError> {
        self.send(MessageType::GetSensorStatus, Vec::new()).await
    }

    pub async fn restart_mcu(&mut self) -> Result<(), LinkError> {
        self.send(MessageType::Restart, Vec::new()).await
    }
}

#[cfg(test)]
#[path = "link_tests.rs"]
mod tests;
