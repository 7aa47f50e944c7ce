// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test harness: a scripted microcontroller stand-in driving the far
//! end of a duplex pipe, a programmable backend stub, and an in-memory
//! store constructor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

use crate::backend::{
    BackendClient, ContainerUpload, HealthcheckData, LogUpload, RemoteContainer,
    ValidatedContainer,
};
use crate::link::frame::{Frame, FrameBuffer, MessageType, Sensor};
use crate::store::Store;

/// Handle onto a spawned microcontroller simulator.
///
/// The simulator records every non-ACK frame the controller sends and, when
/// auto-ack is on, immediately acknowledges it. Frames are injected towards
/// the controller through [`McuHandle::inject`] and friends.
#[derive(Clone)]
pub struct McuHandle {
    commands: Arc<Mutex<Vec<Frame>>>,
    inject_tx: mpsc::UnboundedSender<(MessageType, Vec<u8>)>,
    auto_ack: Arc<AtomicBool>,
}

/// Spawn the simulator task on the far end of a duplex pipe.
pub fn spawn_mcu(transport: DuplexStream) -> McuHandle {
    let commands = Arc::new(Mutex::new(Vec::new()));
    let auto_ack = Arc::new(AtomicBool::new(true));
    let (inject_tx, mut inject_rx) = mpsc::unbounded_channel::<(MessageType, Vec<u8>)>();

    let task_commands = Arc::clone(&commands);
    let task_auto_ack = Arc::clone(&auto_ack);
    tokio::spawn(async move {
        let mut transport = transport;
        let mut buffer = FrameBuffer::new();
        let mut id: u8 = 0;
        let mut chunk = [0u8; 1024];
        loop {
            tokio::select! {
                injected = inject_rx.recv() => {
                    let Some((kind, payload)) = injected else { break };
                    id = (id + 1) % 100;
                    let Ok(wire) = Frame::new(kind, id, payload).encode() else { continue };
                    if transport.write_all(&wire).await.is_err() {
                        break;
                    }
                    let _ = transport.flush().await;
                }
                read = transport.read(&mut chunk) => {
                    let Ok(n) = read else { break };
                    if n == 0 {
                        break;
                    }
                    for frame in buffer.feed(&chunk[..n]) {
                        if frame.kind == MessageType::Ack {
                            continue;
                        }
                        task_commands
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(frame.clone());
                        if task_auto_ack.load(Ordering::Relaxed) {
                            let ack = Frame::new(
                                MessageType::Ack,
                                0,
                                vec![frame.kind as u8, frame.id],
                            );
                            if let Ok(wire) = ack.encode() {
                                if transport.write_all(&wire).await.is_err() {
                                    break;
                                }
                                let _ = transport.flush().await;
                            }
                        }
                    }
                }
            }
        }
    });

    McuHandle { commands, inject_tx, auto_ack }
}

impl McuHandle {
    /// Inject a frame towards the controller, then let the runtime settle so
    /// it is readable before the caller's next poll.
    pub async fn inject(&self, kind: MessageType, payload: Vec<u8>) {
        let _ = self.inject_tx.send((kind, payload));
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    pub async fn press_button(&self) {
        self.inject(MessageType::ButtonPushed, Vec::new()).await;
    }

    pub async fn sensor(&self, sensor: Sensor, present: bool) {
        self.inject(MessageType::SensorStateChange, vec![sensor as u8, u8::from(present)]).await;
    }

    pub async fn hardware_error(&self, text: &str) {
        self.inject(MessageType::ErrorMsg, text.as_bytes().to_vec()).await;
    }

    pub fn set_auto_ack(&self, on: bool) {
        self.auto_ack.store(on, Ordering::Relaxed);
    }

    /// Every non-ACK frame received from the controller so far.
    pub fn commands(&self) -> Vec<Frame> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn commands_of(&self, kind: MessageType) -> Vec<Frame> {
        self.commands().into_iter().filter(|f| f.kind == kind).collect()
    }

    pub fn clear_commands(&self) {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Programmable backend double.
#[derive(Debug, Clone)]
pub enum StubResponse<T> {
    /// `success = true` with this payload.
    Success(T),
    /// `success = false` from the backend.
    Rejected,
    /// Transport failure (connection refused, timeout, ...).
    Transport,
}

struct StubState {
    healthcheck: StubResponse<HealthcheckData>,
    sync: StubResponse<Vec<RemoteContainer>>,
    validate: StubResponse<ValidatedContainer>,
    healthcheck_calls: u32,
    sync_calls: u32,
    validate_calls: u32,
    sync_payloads: Vec<(Vec<LogUpload>, Vec<ContainerUpload>)>,
}

impl Default for StubState {
    fn default() -> Self {
        Self {
            healthcheck: StubResponse::Success(HealthcheckData::default()),
            sync: StubResponse::Success(Vec::new()),
            validate: StubResponse::Transport,
            healthcheck_calls: 0,
            sync_calls: 0,
            validate_calls: 0,
            sync_payloads: Vec::new(),
        }
    }
}

#[derive(Clone, Default)]
pub struct StubBackend {
    state: Arc<Mutex<StubState>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_healthcheck(&self, response: StubResponse<HealthcheckData>) {
        self.lock().healthcheck = response;
    }

    pub fn set_sync(&self, response: StubResponse<Vec<RemoteContainer>>) {
        self.lock().sync = response;
    }

    pub fn set_validate(&self, response: StubResponse<ValidatedContainer>) {
        self.lock().validate = response;
    }

    pub fn healthcheck_calls(&self) -> u32 {
        self.lock().healthcheck_calls
    }

    pub fn sync_calls(&self) -> u32 {
        self.lock().sync_calls
    }

    pub fn validate_calls(&self) -> u32 {
        self.lock().validate_calls
    }

    /// Payloads sent to the sync endpoint, oldest first.
    pub fn sync_payloads(&self) -> Vec<(Vec<LogUpload>, Vec<ContainerUpload>)> {
        self.lock().sync_payloads.clone()
    }
}

fn respond<T: Clone>(response: &StubResponse<T>) -> anyhow::Result<Option<T>> {
    match response {
        StubResponse::Success(value) => Ok(Some(value.clone())),
        StubResponse::Rejected => Ok(None),
        StubResponse::Transport => Err(anyhow::anyhow!("connection refused")),
    }
}

impl BackendClient for StubBackend {
    async fn healthcheck(
        &self,
        _version: &str,
        _update_failures: i64,
    ) -> anyhow::Result<Option<HealthcheckData>> {
        let mut state = self.lock();
        state.healthcheck_calls += 1;
        respond(&state.healthcheck)
    }

    async fn sync(
        &self,
        logs: Vec<LogUpload>,
        containers: Vec<ContainerUpload>,
    ) -> anyhow::Result<Option<Vec<RemoteContainer>>> {
        let mut state = self.lock();
        state.sync_calls += 1;
        state.sync_payloads.push((logs, containers));
        respond(&state.sync)
    }

    async fn validate_container(
        &self,
        _container_id: &str,
    ) -> anyhow::Result<Option<ValidatedContainer>> {
        let mut state = self.lock();
        state.validate_calls += 1;
        respond(&state.validate)
    }
}

/// A migrated in-memory store.
pub async fn memory_store() -> anyhow::Result<Store> {
    let store = Store::open_in_memory().await?;
    store.migrate("0.0.1").await?;
    Ok(store)
}
