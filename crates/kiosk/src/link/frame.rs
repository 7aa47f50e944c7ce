// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame encoding, decoding, and validation for the microcontroller link.
//!
//! Wire format:
//! ```text
//! 7B TYPE ID LEN [PAYLOAD...] 7D
//! ```
//!
//! Total frame length is always `5 + LEN`. Ids run 0-99; ACK frames carry
//! the acknowledged frame's type and id in their two payload bytes.

use thiserror::Error;
use tracing::debug;

pub const START: u8 = 0x7B;
pub const END: u8 = 0x7D;

/// Frame bytes surrounding the payload: start, type, id, length, end.
pub const OVERHEAD: usize = 5;

pub const MAX_MESSAGE_ID: u8 = 99;
pub const MAX_PAYLOAD_LEN: usize = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {len} bytes")]
    TooShort { len: usize },
    #[error("missing start marker, got {got:#04x}")]
    MissingStart { got: u8 },
    #[error("missing end marker")]
    MissingEnd,
    #[error("declared payload length {declared} disagrees with frame length {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("unknown message type {0:#04x}")]
    UnknownType(u8),
    #[error("message id {0} out of range")]
    IdOutOfRange(u8),
    #[error("payload too long: {0} bytes")]
    PayloadTooLong(usize),
}

/// Message types exchanged with the microcontroller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Ack = 0x00,
    GetSensorStatus = 0x01,
    SensorStateChange = 0x02,
    Restart = 0x03,
    ActuatorMovement = 0x04,
    LightManagement = 0x05,
    ButtonPushed = 0x06,
    ErrorMsg = 0x07,
    DoorControl = 0x08,
}

impl MessageType {
    pub fn from_byte(byte: u8) -> Result<Self, FrameError> {
        match byte {
            0x00 => Ok(Self::Ack),
            0x01 => Ok(Self::GetSensorStatus),
            0x02 => Ok(Self::SensorStateChange),
            0x03 => Ok(Self::Restart),
            0x04 => Ok(Self::ActuatorMovement),
            0x05 => Ok(Self::LightManagement),
            0x06 => Ok(Self::ButtonPushed),
            0x07 => Ok(Self::ErrorMsg),
            0x08 => Ok(Self::DoorControl),
            other => Err(FrameError::UnknownType(other)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ack => "ACK",
            Self::GetSensorStatus => "GET_SENSOR_STATUS",
            Self::SensorStateChange => "SENSOR_STATE_CHANGE",
            Self::Restart => "RESTART",
            Self::ActuatorMovement => "ACTUATOR_MOVEMENT",
            Self::LightManagement => "LIGHT_MANAGEMENT",
            Self::ButtonPushed => "BUTTON_PUSHED",
            Self::ErrorMsg => "ERROR_MSG",
            Self::DoorControl => "DOOR_CONTROL",
        }
    }
}

/// The two bay sensors reported in SENSOR_STATE_CHANGE payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Sensor {
    Cover = 0x00,
    Container = 0x01,
}

impl Sensor {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Cover),
            0x01 => Some(Self::Container),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Cover => "cover",
            Self::Container => "container",
        }
    }
}

/// The two motorized bays driven by ACTUATOR_MOVEMENT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Actuator {
    Cover = 0x00,
    Container = 0x01,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActuatorAction {
    Store = 0x00,
    Open = 0x01,
    Close = 0x02,
}

/// Light positions in LIGHT_MANAGEMENT payloads.
///
/// Note the byte values differ from [`Sensor`]: the container light is 0x00.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LightPosition {
    Container = 0x00,
    Cover = 0x01,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LightColor {
    White = 0x00,
    Red = 0x01,
    Green = 0x02,
    Off = 0x03,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LightMode {
    Steady = 0x00,
    Blink = 0x01,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DoorAction {
    Block = 0x00,
    Unblock = 0x01,
}

/// A decoded link frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageType,
    pub id: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(kind: MessageType, id: u8, payload: Vec<u8>) -> Self {
        Self { kind, id, payload }
    }

    /// Encode into a complete wire frame.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        if self.id > MAX_MESSAGE_ID {
            return Err(FrameError::IdOutOfRange(self.id));
        }
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLong(self.payload.len()));
        }

        let mut wire = Vec::with_capacity(OVERHEAD + self.payload.len());
        wire.push(START);
        wire.push(self.kind as u8);
        wire.push(self.id);
        wire.push(self.payload.len() as u8);
        wire.extend_from_slice(&self.payload);
        wire.push(END);
        Ok(wire)
    }

    /// Decode a single complete wire frame (including start and end markers).
    pub fn decode(wire: &[u8]) -> Result<Self, FrameError> {
        if wire.len() < OVERHEAD {
            return Err(FrameError::TooShort { len: wire.len() });
        }
        if wire[0] != START {
            return Err(FrameError::MissingStart { got: wire[0] });
        }
        if wire[wire.len() - 1] != END {
            return Err(FrameError::MissingEnd);
        }

        let declared = wire[3] as usize;
        if wire.len() != OVERHEAD + declared {
            return Err(FrameError::LengthMismatch { declared, actual: wire.len() });
        }

        let kind = MessageType::from_byte(wire[1])?;
        let id = wire[2];
        let payload = wire[4..4 + declared].to_vec();
        Ok(Self { kind, id, payload })
    }

    /// Parse a SENSOR_STATE_CHANGE payload into (sensor, present).
    ///
    /// Returns `None` for other frame kinds or malformed payloads.
    pub fn sensor_change(&self) -> Option<(Sensor, bool)> {
        if self.kind != MessageType::SensorStateChange || self.payload.len() < 2 {
            return None;
        }
        let sensor = Sensor::from_byte(self.payload[0])?;
        Some((sensor, self.payload[1] == 0x01))
    }
}

/// Splits a byte stream into individual frames. Buffers partial data across
/// calls, so it can be fed whatever the serial driver hands back.
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(512) }
    }

    /// Feed new bytes and extract any complete frames.
    ///
    /// Invalid frames are logged and skipped; a partial trailing frame stays
    /// buffered for the next call.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(data);
        let mut frames = Vec::new();

        let mut i = 0;
        while i < self.buf.len() {
            if self.buf[i] != START {
                i += 1;
                continue;
            }
            // Need the header through the length byte to size the frame.
            if i + 4 > self.buf.len() {
                break;
            }
            let frame_len = OVERHEAD + self.buf[i + 3] as usize;
            if i + frame_len > self.buf.len() {
                break;
            }
            match Frame::decode(&self.buf[i..i + frame_len]) {
                Ok(frame) => frames.push(frame),
                Err(e) => debug!("dropping invalid frame: {e}"),
            }
            i += frame_len;
        }

        self.buf.drain(..i);
        frames
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
