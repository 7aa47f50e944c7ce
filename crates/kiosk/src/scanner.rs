// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! USB QR scanner hand-off.
//!
//! The scanner presents as a HID device that types the label and terminates
//! it with a newline; decoding scancodes into characters is the device's
//! (or kernel's) business, not ours. A blocking reader thread assembles
//! completed lines and hands them to the engine through a single-slot
//! channel: the engine either sees the whole string or nothing. A scan that
//! arrives while the slot is still occupied is dropped with a warning.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const MIN_SCAN_LEN: usize = 6;
pub const MAX_SCAN_LEN: usize = 200;

/// Create the single-slot hand-off channel.
pub fn handoff_slot() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
    mpsc::channel(1)
}

/// Spawn the blocking reader thread over the HID device path.
///
/// The thread is detached; it stops when the device goes away or the
/// receiving side is dropped.
pub fn spawn(device_path: PathBuf, slot: mpsc::Sender<String>) -> anyhow::Result<()> {
    let file = File::open(&device_path)
        .with_context(|| format!("cannot open scanner device {}", device_path.display()))?;
    info!(device = %device_path.display(), "QR scanner reader started");

    std::thread::Builder::new()
        .name("qr-scanner".to_owned())
        .spawn(move || read_loop(file, &slot))
        .context("failed to spawn scanner thread")?;
    Ok(())
}

fn read_loop(file: File, slot: &mpsc::Sender<String>) {
    let reader = BufReader::new(file);
    for line in reader.lines() {
        match line {
            Ok(raw) => deliver(&raw, slot),
            Err(e) => {
                error!("scanner read failed: {e}");
                break;
            }
        }
        if slot.is_closed() {
            break;
        }
    }
    info!("QR scanner reader stopped");
}

/// Validate a completed line and push it into the slot.
pub(crate) fn deliver(raw: &str, slot: &mpsc::Sender<String>) {
    let scan = raw.trim();
    if scan.len() < MIN_SCAN_LEN || scan.len() > MAX_SCAN_LEN {
        warn!(len = scan.len(), "discarding scan outside length bounds");
        return;
    }
    match slot.try_send(scan.to_owned()) {
        Ok(()) => debug!("scan delivered"),
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("scan dropped, previous scan not consumed yet");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

#[cfg(test)]
#[path = "scanner_tests.rs"]
mod tests;
