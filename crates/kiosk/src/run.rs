// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level wiring and the ~1 Hz tick loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::MissedTickBehavior;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::audit::AuditLogger;
use crate::backend::ApiClient;
use crate::config::Config;
use crate::engine::Engine;
use crate::link::Link;
use crate::qr::QrValidator;
use crate::scanner;
use crate::store::{DeviceStatusUpdate, Store};
use crate::sync::SyncService;

/// Initialize logging from the configuration. Must run before anything logs.
pub fn init_tracing(config: &Config) -> anyhow::Result<()> {
    let level = config.effective_log_level().to_owned();
    let json = config.log_format == "json";

    match &config.log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("cannot create log directory {}", parent.display()))?;
                }
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            let writer = Arc::new(file);
            if json {
                tracing_subscriber::fmt()
                    .with_env_filter(EnvFilter::try_new(&level)?)
                    .json()
                    .with_writer(writer)
                    .init();
            } else {
                tracing_subscriber::fmt()
                    .with_env_filter(EnvFilter::try_new(&level)?)
                    .with_ansi(false)
                    .with_writer(writer)
                    .init();
            }
        }
        None => {
            if json {
                tracing_subscriber::fmt()
                    .with_env_filter(EnvFilter::try_new(&level)?)
                    .json()
                    .init();
            } else {
                tracing_subscriber::fmt().with_env_filter(EnvFilter::try_new(&level)?).init();
            }
        }
    }
    Ok(())
}

/// Run the controller until a shutdown signal arrives.
pub async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config)?;
    info!(version = %config.version, "container return controller starting");

    // Store first; everything else audits through it.
    let store = Store::open(&config.database_url).await.context("store open failed")?;
    store.migrate(&config.version).await.context("store migration failed")?;
    let audit = AuditLogger::new(store.clone());
    audit.log_database_init().await;

    // After an upgrade the persisted version lags the binary; healthchecks
    // report the persisted one, so bring it up to date.
    let persisted = store.device_status().await?;
    if persisted.version != config.version {
        store
            .update_device_status(DeviceStatusUpdate {
                version: Some(config.version.clone()),
                ..Default::default()
            })
            .await?;
        audit
            .log_configuration_change("version", &persisted.version, &config.version)
            .await;
    }

    // Serial link. Failure here is fatal.
    let serial = tokio_serial::new(&config.uart_port, config.uart_baudrate)
        .timeout(Duration::from_secs(1))
        .open_native_async()
        .with_context(|| format!("cannot open serial port {}", config.uart_port))?;
    let link = Link::new(serial);
    audit.log_link_connected(&config.uart_port).await;

    let api = ApiClient::new(&config)?;

    // QR scanner: degraded operation without it is acceptable (bench setups
    // rarely have the HID device), so a failure only warns.
    let (qr_tx, qr_rx) = scanner::handoff_slot();
    if let Err(e) = scanner::spawn(config.qr_scanner_device.clone(), qr_tx) {
        warn!("QR scanner unavailable: {e:#}");
    }

    let (mode_tx, mode_rx) = tokio::sync::mpsc::unbounded_channel();
    let status = store.device_status().await?;
    let mut sync = SyncService::new(api.clone(), store.clone(), audit.clone(), &config, mode_tx);
    sync.seed_observations(status.active, status.is_in_safe_mode);

    let mut engine = Engine::new(
        link,
        store.clone(),
        api,
        audit.clone(),
        QrValidator::new(&config.private_key_qr),
        qr_rx,
        mode_rx,
        !status.active,
        status.is_in_safe_mode,
    );

    audit.log_system_startup(&config.version).await;
    engine.apply_startup_modes().await;
    if let Err(e) = engine.request_sensor_snapshot().await {
        warn!("sensor snapshot request failed: {e}");
    }

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("entering main loop");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {}
        }
        engine.drain_mode_events().await;
        engine.process_messages().await;
        sync.check_and_run().await;
        engine.drain_idle_scans().await;
    }

    info!("shutdown requested");
    engine.shutdown().await;
    audit.log_system_shutdown("normal shutdown").await;
    Ok(())
}

fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("cannot install SIGTERM handler: {e}");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        shutdown.cancel();
    });
}
