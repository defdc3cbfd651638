// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{BrokerError, Result};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub ports: PortRangeConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// How to invoke the external transcoder binary.
#[derive(Debug, Deserialize, Clone)]
pub struct TranscoderConfig {
    /// Path to the transcoder binary (e.g. an `ffmpeg` build).
    pub binary_path: PathBuf,
    /// Stderr lines starting with this token are progress noise, not errors.
    #[serde(default = "default_progress_token")]
    pub progress_token: String,
}

fn default_progress_token() -> String {
    "frame=".into()
}

/// Host/port/base-path used to build the public-facing endpoint hint.
#[derive(Debug, Deserialize, Clone)]
pub struct EndpointConfig {
    #[serde(default = "default_advertised_host")]
    pub advertised_host: String,
    #[serde(default = "default_advertised_port")]
    pub advertised_port: u16,
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            advertised_host: default_advertised_host(),
            advertised_port: default_advertised_port(),
            base_path: default_base_path(),
        }
    }
}

fn default_advertised_host() -> String {
    "127.0.0.1".into()
}
fn default_advertised_port() -> u16 {
    8088
}
fn default_base_path() -> String {
    "/ws".into()
}

/// Half-open loopback port range the allocator leases from.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PortRangeConfig {
    #[serde(default = "default_port_start")]
    pub start: u16,
    #[serde(default = "default_port_end")]
    pub end: u16,
}

impl Default for PortRangeConfig {
    fn default() -> Self {
        Self {
            start: default_port_start(),
            end: default_port_end(),
        }
    }
}

fn default_port_start() -> u16 {
    10000
}
fn default_port_end() -> u16 {
    50000
}

/// Reaper tick interval and the grace/idle thresholds from spec §4.6.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ReaperConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    #[serde(default = "default_long_idle_secs")]
    pub long_idle_secs: u64,
    #[serde(default = "default_short_idle_secs")]
    pub short_idle_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            grace_secs: default_grace_secs(),
            long_idle_secs: default_long_idle_secs(),
            short_idle_secs: default_short_idle_secs(),
        }
    }
}

fn default_tick_secs() -> u64 {
    60
}
fn default_grace_secs() -> u64 {
    30
}
fn default_long_idle_secs() -> u64 {
    5 * 60
}
fn default_short_idle_secs() -> u64 {
    10
}

/// HTTP API configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            port: default_api_port(),
        }
    }
}

fn default_api_enabled() -> bool {
    true
}
fn default_api_port() -> u16 {
    8088
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BrokerError::InvalidConfiguration(format!("cannot read config file: {e}"))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| BrokerError::InvalidConfiguration(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.transcoder.binary_path.as_os_str().is_empty() {
            return Err(BrokerError::InvalidConfiguration(
                "transcoder.binary_path must not be empty".into(),
            ));
        }
        if !self.transcoder.binary_path.exists() {
            return Err(BrokerError::TranscoderBinaryMissing(
                self.transcoder.binary_path.display().to_string(),
            ));
        }
        if self.ports.start >= self.ports.end {
            return Err(BrokerError::InvalidConfiguration(
                "ports.start must be < ports.end".into(),
            ));
        }
        if self.reaper.tick_secs == 0 {
            return Err(BrokerError::InvalidConfiguration(
                "reaper.tick_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}
