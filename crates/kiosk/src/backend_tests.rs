// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use chrono::{TimeZone, Utc};
use serde_json::json;

use super::*;

#[test]
fn healthcheck_request_uses_camel_case() {
    let body = HealthcheckRequest { version: "1.2.3".to_owned(), update_failures: 4 };
    let value = serde_json::to_value(&body).unwrap();
    assert_eq!(value, json!({ "version": "1.2.3", "updateFailures": 4 }));
}

#[test]
fn sync_request_shape_matches_the_wire() {
    let body = SyncRequest {
        logs: vec![LogUpload {
            kind: "RETURN_VALID".to_owned(),
            description: "accepted".to_owned(),
            is_offline_action: true,
            container_id: "c-1".to_owned(),
            created_at: "2025-01-01 00:00:00.000+00".to_owned(),
        }],
        containers: vec![ContainerUpload {
            id: "c-1".to_owned(),
            is_returnable: false,
            updated_at: "2025-01-02 00:00:00.000+00".to_owned(),
        }],
    };
    let value = serde_json::to_value(&body).unwrap();
    assert_eq!(
        value,
        json!({
            "logs": [{
                "type": "RETURN_VALID",
                "description": "accepted",
                "isOfflineAction": true,
                "containerId": "c-1",
                "createdAt": "2025-01-01 00:00:00.000+00",
            }],
            "containers": [{
                "id": "c-1",
                "isReturnable": false,
                "updatedAt": "2025-01-02 00:00:00.000+00",
            }],
        })
    );
}

#[test]
fn sync_response_parses_remote_containers() {
    let body = json!({
        "success": true,
        "data": [
            { "id": "c-1", "qrCode": "ABCDEF", "isReturnable": true, "dueTime": "2025-06-01T00:00:00Z" },
            { "id": "c-2", "qrCode": "GHJKMN", "isReturnable": false },
        ],
    });
    let envelope: Envelope<Vec<RemoteContainer>> = serde_json::from_value(body).unwrap();
    assert!(envelope.success);
    let containers = envelope.data.unwrap();
    assert_eq!(containers.len(), 2);
    assert_eq!(containers[0].qr_code, "ABCDEF");
    assert_eq!(containers[0].due_time.as_deref(), Some("2025-06-01T00:00:00Z"));
    assert!(containers[1].due_time.is_none());
}

#[test]
fn validate_response_parses_nested_container_data() {
    let body = json!({
        "success": true,
        "data": {
            "containerData": { "id": "c1", "isReturnable": true, "updatedAt": "2025-01-01T00:00:00Z" },
        },
    });
    let envelope: Envelope<ValidateData> = serde_json::from_value(body).unwrap();
    let data = envelope.data.unwrap();
    assert_eq!(data.container_data.id, "c1");
    assert!(data.container_data.is_returnable);
}

#[test]
fn envelope_failure_has_no_data_requirement() {
    let body = json!({ "success": false });
    let envelope: Envelope<ValidateData> = serde_json::from_value(body).unwrap();
    assert!(!envelope.success);
    assert!(envelope.data.is_none());
}

#[test]
fn wire_time_format_matches_backend_expectation() {
    let stamp = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).single().unwrap()
        + chrono::Duration::milliseconds(89);
    assert_eq!(format_wire_time(stamp), "2025-03-04 05:06:07.089+00");
}

#[test]
fn wire_time_parses_z_suffix_and_naive() {
    let zulu = parse_wire_time("2025-01-01T00:00:00Z").unwrap();
    let naive = parse_wire_time("2025-01-01 00:00:00").unwrap();
    assert_eq!(zulu, naive);
    assert_eq!(zulu, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().unwrap());
}
