// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt::Write as _;
use std::path::PathBuf;

use clap::Parser;

/// Controller configuration, sourced from flags or the environment.
#[derive(Debug, Parser)]
#[command(name = "kiosk", about, disable_version_flag = true)]
pub struct Config {
    /// Device name reported to the backend (x-name header).
    #[arg(long, env = "RASPBERRY_NAME", default_value = "device_001")]
    pub raspberry_name: String,

    /// Backend base URL.
    #[arg(long, env = "BASE_API_URL", default_value = "")]
    pub base_api_url: String,

    /// Bearer token for the backend Authorization header.
    #[arg(long, env = "API_KEY", default_value = "")]
    pub api_key: String,

    /// Device API key sent in the x-api-key header.
    #[arg(long, env = "RASPBERRY_API_KEY", default_value = "")]
    pub raspberry_api_key: String,

    /// Seconds between healthchecks.
    #[arg(long, env = "HEALTHCHECK_INTERVAL", default_value = "180")]
    pub healthcheck_interval: u64,

    /// Seconds between backend syncs.
    #[arg(long, env = "SYNC_INTERVAL", default_value = "600")]
    pub sync_interval: u64,

    /// Backend request timeout in seconds.
    #[arg(long, env = "API_TIMEOUT", default_value = "30")]
    pub api_timeout: u64,

    /// Serial port of the microcontroller link.
    #[arg(long, env = "UART_PORT", default_value = "/dev/ttyUSB0")]
    pub uart_port: String,

    /// Serial baud rate.
    #[arg(long, env = "UART_BAUDRATE", default_value = "9600")]
    pub uart_baudrate: u32,

    /// Store location (path or sqlite:// URL).
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://container_system.db")]
    pub database_url: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Optional log file; stderr when unset.
    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Elevate logging to debug.
    #[arg(long, env = "DEBUG")]
    pub debug: bool,

    /// HMAC key for QR hash verification.
    #[arg(long, env = "PRIVATE_KEY_QR", default_value = "default_key")]
    pub private_key_qr: String,

    /// HID device path of the QR scanner.
    #[arg(long, env = "QR_SCANNER_DEVICE", default_value = "/dev/hidraw2")]
    pub qr_scanner_device: PathBuf,

    /// Firmware version reported in healthchecks.
    #[arg(long, env = "APP_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    pub version: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_api_url.is_empty() {
            anyhow::bail!("BASE_API_URL must be set");
        }
        if self.api_key.is_empty() {
            anyhow::bail!("API_KEY must be set");
        }
        if self.raspberry_api_key.is_empty() {
            anyhow::bail!("RASPBERRY_API_KEY must be set");
        }
        if self.healthcheck_interval == 0 || self.sync_interval == 0 {
            anyhow::bail!("HEALTHCHECK_INTERVAL and SYNC_INTERVAL must be positive");
        }
        if self.uart_baudrate == 0 {
            anyhow::bail!("UART_BAUDRATE must be positive");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    /// The level the process logger should run at.
    pub fn effective_log_level(&self) -> &str {
        if self.debug {
            "debug"
        } else {
            &self.log_level
        }
    }

    /// Render the resolved configuration with secrets masked.
    pub fn sanitized_dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "raspberry_name      = {}", self.raspberry_name);
        let _ = writeln!(out, "base_api_url        = {}", display(&self.base_api_url));
        let _ = writeln!(out, "api_key             = {}", mask(&self.api_key));
        let _ = writeln!(out, "raspberry_api_key   = {}", mask(&self.raspberry_api_key));
        let _ = writeln!(out, "healthcheck_interval = {}s", self.healthcheck_interval);
        let _ = writeln!(out, "sync_interval       = {}s", self.sync_interval);
        let _ = writeln!(out, "api_timeout         = {}s", self.api_timeout);
        let _ = writeln!(out, "uart_port           = {}", self.uart_port);
        let _ = writeln!(out, "uart_baudrate       = {}", self.uart_baudrate);
        let _ = writeln!(out, "database_url        = {}", self.database_url);
        let _ = writeln!(out, "log_level           = {}", self.effective_log_level());
        let _ = writeln!(
            out,
            "log_file            = {}",
            self.log_file.as_ref().map_or_else(|| "-".to_owned(), |p| p.display().to_string())
        );
        let _ = writeln!(out, "log_format          = {}", self.log_format);
        let _ = writeln!(out, "private_key_qr      = {}", mask(&self.private_key_qr));
        let _ = writeln!(out, "qr_scanner_device   = {}", self.qr_scanner_device.display());
        let _ = writeln!(out, "version             = {}", self.version);
        out
    }
}

fn display(value: &str) -> &str {
    if value.is_empty() {
        "NOT SET"
    } else {
        value
    }
}

fn mask(value: &str) -> String {
    if value.is_empty() {
        "NOT SET".to_owned()
    } else {
        format!("{}...", "*".repeat(value.len().min(8)))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
