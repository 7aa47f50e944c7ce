// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bench-test stand-in for the kiosk microcontroller.
//!
//! Attach it to the other end of a serial pair (`socat -d -d pty,raw pty,raw`
//! works) and point the controller at the sibling port. The simulator ACKs
//! every controller frame, answers sensor snapshots, and can script a user:
//! press the button, insert the cover and the container, then pull both out
//! again once the bays run their store motion.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;
use tracing::{info, warn};

use kiosk::link::frame::{Frame, FrameBuffer, MessageType, Sensor};

#[derive(Parser)]
#[command(name = "mcu-sim", version, about = "Microcontroller simulator for bench testing.")]
struct Args {
    /// Serial port to listen on.
    #[arg(long, env = "SIM_PORT", default_value = "/dev/ttyUSB1")]
    port: String,

    /// Serial baud rate.
    #[arg(long, env = "SIM_BAUDRATE", default_value = "9600")]
    baudrate: u32,

    /// Seconds after start to press the activation button.
    #[arg(long)]
    press_button_after: Option<u64>,

    /// Seconds after the button press to insert the cover and container.
    #[arg(long, default_value = "5")]
    insert_after: u64,

    /// Seconds after an actuator store command to report the bays empty.
    #[arg(long, default_value = "3")]
    remove_after: u64,
}

struct Sim {
    port: tokio_serial::SerialStream,
    buffer: FrameBuffer,
    id: u8,
    cover_present: bool,
    container_present: bool,
}

impl Sim {
    fn next_id(&mut self) -> u8 {
        self.id = (self.id + 1) % 100;
        self.id
    }

    async fn write_frame(&mut self, kind: MessageType, payload: Vec<u8>) -> anyhow::Result<()> {
        let id = if kind == MessageType::Ack { 0 } else { self.next_id() };
        let wire = Frame::new(kind, id, payload).encode().context("encode failed")?;
        self.port.write_all(&wire).await.context("serial write failed")?;
        self.port.flush().await.context("serial flush failed")?;
        Ok(())
    }

    async fn sensor_edge(&mut self, sensor: Sensor, present: bool) -> anyhow::Result<()> {
        match sensor {
            Sensor::Cover => self.cover_present = present,
            Sensor::Container => self.container_present = present,
        }
        info!(sensor = sensor.name(), present, "sensor edge");
        self.write_frame(MessageType::SensorStateChange, vec![sensor as u8, u8::from(present)])
            .await
    }

    async fn handle(&mut self, frame: Frame) -> anyhow::Result<()> {
        info!(id = frame.id, payload = ?frame.payload, "received {}", frame.kind.name());
        if frame.kind == MessageType::Ack {
            return Ok(());
        }
        self.write_frame(MessageType::Ack, vec![frame.kind as u8, frame.id]).await?;

        match frame.kind {
            MessageType::GetSensorStatus => {
                let cover = self.cover_present;
                let container = self.container_present;
                self.write_frame(
                    MessageType::SensorStateChange,
                    vec![Sensor::Cover as u8, u8::from(cover)],
                )
                .await?;
                self.write_frame(
                    MessageType::SensorStateChange,
                    vec![Sensor::Container as u8, u8::from(container)],
                )
                .await?;
            }
            MessageType::Restart => {
                self.cover_present = false;
                self.container_present = false;
            }
            _ => {}
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let port = tokio_serial::new(&args.port, args.baudrate)
        .timeout(Duration::from_secs(1))
        .open_native_async()
        .with_context(|| format!("cannot open serial port {}", args.port))?;
    info!(port = %args.port, baudrate = args.baudrate, "simulator listening");

    let mut sim = Sim {
        port,
        buffer: FrameBuffer::new(),
        id: 0,
        cover_present: false,
        container_present: false,
    };

    let mut script = Vec::new();
    if let Some(after) = args.press_button_after {
        script.push((Duration::from_secs(after), Event::Button));
        script.push((Duration::from_secs(after + args.insert_after), Event::Insert));
    }
    script.reverse();

    let started = tokio::time::Instant::now();
    let mut store_seen_at: Option<tokio::time::Instant> = None;
    let mut chunk = [0u8; 1024];

    loop {
        let next_event = script.last().map(|(at, _)| started + *at);
        let removal_due = store_seen_at.map(|at| at + Duration::from_secs(args.remove_after));

        tokio::select! {
            read = sim.port.read(&mut chunk) => {
                let n = read.context("serial read failed")?;
                if n == 0 {
                    warn!("controller hung up");
                    break;
                }
                let frames = sim.buffer.feed(&chunk[..n]);
                for frame in frames {
                    if frame.kind == MessageType::ActuatorMovement
                        && frame.payload.get(1) == Some(&0x00)
                        && store_seen_at.is_none()
                        && (sim.cover_present || sim.container_present)
                    {
                        store_seen_at = Some(tokio::time::Instant::now());
                    }
                    sim.handle(frame).await?;
                }
            }
            _ = sleep_until_opt(next_event), if next_event.is_some() => {
                if let Some((_, event)) = script.pop() {
                    match event {
                        Event::Button => {
                            info!("pressing activation button");
                            sim.write_frame(MessageType::ButtonPushed, Vec::new()).await?;
                        }
                        Event::Insert => {
                            info!("inserting cover and container");
                            sim.sensor_edge(Sensor::Cover, true).await?;
                            sim.sensor_edge(Sensor::Container, true).await?;
                        }
                    }
                }
            }
            _ = sleep_until_opt(removal_due), if removal_due.is_some() => {
                info!("reporting bays empty after store motion");
                sim.sensor_edge(Sensor::Cover, false).await?;
                sim.sensor_edge(Sensor::Container, false).await?;
                store_seen_at = None;
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Event {
    Button,
    Insert,
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
