// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{deliver, handoff_slot};

#[tokio::test]
async fn delivers_trimmed_scan() {
    let (tx, mut rx) = handoff_slot();
    deliver("  https://paka.eco/QR/ABCDEF/AAAAAA \r\n", &tx);
    assert_eq!(rx.try_recv().unwrap(), "https://paka.eco/QR/ABCDEF/AAAAAA");
}

#[tokio::test]
async fn rejects_scans_outside_length_bounds() {
    let (tx, mut rx) = handoff_slot();
    deliver("short", &tx);
    deliver(&"x".repeat(201), &tx);
    assert!(rx.try_recv().is_err());

    deliver(&"x".repeat(200), &tx);
    assert!(rx.try_recv().is_ok());
}

#[tokio::test]
async fn slot_holds_exactly_one_scan() {
    let (tx, mut rx) = handoff_slot();
    deliver("AAAAAA", &tx);
    deliver("BBBBBB", &tx);

    // The second scan was dropped, not queued.
    assert_eq!(rx.try_recv().unwrap(), "AAAAAA");
    assert!(rx.try_recv().is_err());

    // Once consumed, the slot accepts the next scan.
    deliver("CCCCCC", &tx);
    assert_eq!(rx.try_recv().unwrap(), "CCCCCC");
}
