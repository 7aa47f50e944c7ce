// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! QR label validation.
//!
//! Labels are URLs of the form `https://paka.eco/QR/<CODE>/<HASH>` where
//! CODE is six characters of the Base32 alphabet without I, L, O and U, and
//! HASH is the first six characters of the Base32-encoded HMAC-SHA256 of the
//! code under the device's private key. Scanners prepend vendor junk, so the
//! label is taken from the first `https` substring onwards; a scan without
//! one is malformed. Anything that does not parse into the canonical shape,
//! or whose hash does not verify, is classified as a fraud attempt.

use hmac::{Hmac, Mac};
use regex::Regex;
use sha2::Sha256;
use tracing::warn;

/// Hash characters carried in the label.
const HASH_LEN: usize = 6;

const URL_PATTERN: &str = r"(?i)https://paka\.eco/QR/([A-HJ-NP-Z2-9]{6})/([A-Z0-9]{6})$";

/// Result of structural and cryptographic QR evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// The label verified; the contained code identifies the container.
    Valid { code: String },
    /// The label is structurally wrong or its hash does not verify.
    Fraud { reason: String },
}

pub struct QrValidator {
    key: Vec<u8>,
    pattern: Regex,
}

impl QrValidator {
    pub fn new(private_key: &str) -> Self {
        #[allow(clippy::unwrap_used)] // the pattern is a compile-time constant
        let pattern = Regex::new(URL_PATTERN).unwrap();
        Self { key: private_key.as_bytes().to_vec(), pattern }
    }

    /// Evaluate a raw scanned string.
    pub fn evaluate(&self, raw: &str) -> Evaluation {
        let trimmed = raw.trim();

        // Strip any scanner prefix: the label starts at the first `https`.
        // No `https` at all means this is not one of our labels.
        let Some(https_pos) = trimmed.find("https") else {
            warn!("no https URL in scan");
            return Evaluation::Fraud { reason: "scan carries no https URL".to_owned() };
        };
        let candidate = &trimmed[https_pos..];

        let Some(caps) = self.pattern.captures(candidate) else {
            warn!("scan does not match the QR URL form");
            return Evaluation::Fraud {
                reason: "scan does not match https://paka.eco/QR/<code>/<hash>".to_owned(),
            };
        };

        let code = caps[1].to_uppercase();
        let provided = caps[2].to_uppercase();
        let Some(expected) = self.hash_for(&code) else {
            return Evaluation::Fraud { reason: "hash computation failed".to_owned() };
        };

        if !constant_time_eq(&provided, &expected) {
            warn!(%code, "QR hash does not verify");
            return Evaluation::Fraud { reason: format!("hash mismatch for code {code}") };
        }

        Evaluation::Valid { code }
    }

    /// First six characters of upper(Base32(HMAC-SHA256(key, code))).
    fn hash_for(&self, code: &str) -> Option<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.key).ok()?;
        mac.update(code.as_bytes());
        let digest = mac.finalize().into_bytes();
        let encoded = data_encoding::BASE32.encode(&digest);
        Some(encoded.chars().take(HASH_LEN).collect())
    }
}

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

#[cfg(test)]
#[path = "qr_tests.rs"]
mod tests;
