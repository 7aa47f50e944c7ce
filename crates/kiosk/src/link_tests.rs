// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use super::frame::{Frame, FrameBuffer, MessageType};
use super::{Link, WaitOutcome};

fn pipe() -> (Link<DuplexStream>, DuplexStream) {
    let (near, far) = tokio::io::duplex(16384);
    (Link::new(near), far)
}

/// Drain every frame currently readable on the far (microcontroller) side.
async fn drain_far(far: &mut DuplexStream) -> Vec<Frame> {
    let mut buffer = FrameBuffer::new();
    let mut frames = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match tokio::time::timeout(Duration::from_millis(10), far.read(&mut chunk)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => frames.extend(buffer.feed(&chunk[..n])),
            Ok(Err(e)) => panic!("far read failed: {e}"),
        }
    }
    frames
}

async fn inject(far: &mut DuplexStream, kind: MessageType, id: u8, payload: Vec<u8>) {
    let wire = Frame::new(kind, id, payload).encode().unwrap();
    far.write_all(&wire).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn ids_cycle_through_1_to_99_then_0() {
    let (mut link, mut far) = pipe();

    for _ in 0..101 {
        link.send(MessageType::GetSensorStatus, Vec::new()).await.unwrap();
    }

    let frames = drain_far(&mut far).await;
    assert_eq!(frames.len(), 101);
    let ids: Vec<u8> = frames.iter().map(|f| f.id).collect();
    assert_eq!(ids[0], 1);
    assert_eq!(ids[98], 99);
    assert_eq!(ids[99], 0);
    assert_eq!(ids[100], 1);
    assert!(ids.iter().all(|&id| id <= 99));
}

#[tokio::test(start_paused = true)]
async fn ack_uses_id_zero_and_carries_original_type_and_id() {
    let (mut link, mut far) = pipe();

    let original = Frame::new(MessageType::ButtonPushed, 17, vec![]);
    link.send_ack(&original).await.unwrap();

    let frames = drain_far(&mut far).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].kind, MessageType::Ack);
    assert_eq!(frames[0].id, 0);
    assert_eq!(frames[0].payload, vec![0x06, 17]);
}

#[tokio::test(start_paused = true)]
async fn receive_keeps_partial_trailing_bytes() {
    let (mut link, mut far) = pipe();
    let wire = Frame::new(MessageType::ButtonPushed, 4, vec![]).encode().unwrap();

    far.write_all(&wire[..3]).await.unwrap();
    assert!(link.receive().await.unwrap().is_empty());

    far.write_all(&wire[3..]).await.unwrap();
    let frames = link.receive().await.unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].kind, MessageType::ButtonPushed);
}

#[tokio::test(start_paused = true)]
async fn wait_for_ack_returns_true_on_ack() {
    let (mut link, mut far) = pipe();

    inject(&mut far, MessageType::Ack, 0, vec![0x08, 1]).await;
    assert!(link.wait_for_ack(Duration::from_secs(5)).await);
}

#[tokio::test(start_paused = true)]
async fn wait_for_ack_times_out() {
    let (mut link, _far) = pipe();
    assert!(!link.wait_for_ack(Duration::from_secs(5)).await);
}

#[tokio::test(start_paused = true)]
async fn wait_for_ack_absorbs_sensor_changes() {
    let (mut link, mut far) = pipe();

    inject(&mut far, MessageType::SensorStateChange, 12, vec![0x01, 0x01]).await;
    inject(&mut far, MessageType::Ack, 0, vec![0x04, 2]).await;

    assert!(link.wait_for_ack(Duration::from_secs(5)).await);
    assert!(link.sensors.container);
    assert!(!link.sensors.cover);

    // The sensor frame must still have been ACKed.
    let acks = drain_far(&mut far).await;
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].kind, MessageType::Ack);
    assert_eq!(acks[0].payload, vec![0x02, 12]);
}

#[tokio::test(start_paused = true)]
async fn wait_for_ack_acks_button_without_starting_anything() {
    let (mut link, mut far) = pipe();

    inject(&mut far, MessageType::ButtonPushed, 33, vec![]).await;

    // A button press is not an ack, so the wait still times out.
    assert!(!link.wait_for_ack(Duration::from_secs(2)).await);

    let acks = drain_far(&mut far).await;
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].payload, vec![0x06, 33]);
}

#[tokio::test(start_paused = true)]
async fn wait_for_ack_or_sensor_returns_early_on_sensor() {
    let (mut link, mut far) = pipe();

    inject(&mut far, MessageType::SensorStateChange, 8, vec![0x00, 0x01]).await;
    let outcome = link.wait_for_ack_or_sensor(Duration::from_secs(5)).await;

    assert_eq!(outcome, WaitOutcome::Sensor);
    assert!(link.sensors.cover);

    let acks = drain_far(&mut far).await;
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].payload, vec![0x02, 8]);
}

#[tokio::test(start_paused = true)]
async fn wait_for_ack_or_sensor_times_out() {
    let (mut link, _far) = pipe();
    let outcome = link.wait_for_ack_or_sensor(Duration::from_secs(1)).await;
    assert_eq!(outcome, WaitOutcome::Timeout);
}

#[tokio::test(start_paused = true)]
async fn all_lights_off_sends_both_positions() {
    let (mut link, mut far) = pipe();
    link.all_lights_off().await.unwrap();

    let frames = drain_far(&mut far).await;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].payload, vec![0x00, 0x03, 0x00]);
    assert_eq!(frames[1].payload, vec![0x01, 0x03, 0x00]);
}

#[tokio::test(start_paused = true)]
async fn restart_and_snapshot_commands_carry_no_payload() {
    let (mut link, mut far) = pipe();
    link.restart_mcu().await.unwrap();
    link.query_sensor_status().await.unwrap();

    let frames = drain_far(&mut far).await;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].kind, MessageType::Restart);
    assert_eq!(frames[1].kind, MessageType::GetSensorStatus);
    assert!(frames.iter().all(|f| f.payload.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn sensor_state_tracks_both_sensors() {
    let (mut link, mut far) = pipe();

    inject(&mut far, MessageType::SensorStateChange, 1, vec![0x00, 0x01]).await;
    inject(&mut far, MessageType::SensorStateChange, 2, vec![0x01, 0x01]).await;
    inject(&mut far, MessageType::Ack, 0, vec![0x01, 1]).await;
    assert!(link.wait_for_ack(Duration::from_secs(1)).await);
    assert!(link.sensors.cover);
    assert!(link.sensors.container);
    assert!(link.sensors.any_present());

    inject(&mut far, MessageType::SensorStateChange, 3, vec![0x00, 0x00]).await;
    inject(&mut far, MessageType::SensorStateChange, 4, vec![0x01, 0x00]).await;
    inject(&mut far, MessageType::Ack, 0, vec![0x01, 2]).await;
    assert!(link.wait_for_ack(Duration::from_secs(1)).await);
    assert!(!link.sensors.any_present());

    drain_far(&mut far).await;
}
