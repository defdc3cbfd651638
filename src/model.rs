// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Core data model: source descriptors, channel keys, and channel snapshots.
//!
//! The dedup fingerprint deliberately excludes credentials (`username`,
//! `password`) — two callers requesting the same `(host, port, channel_no,
//! stream_type, width, height, start_time, end_time)` share one channel even
//! if their credentials differ. The first caller's credentials are the ones
//! the transcoder actually uses.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stream quality selector, mirrors the camera's own channel numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StreamType {
    Main = 1,
    Sub = 2,
    Tertiary = 3,
}

impl StreamType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Caller-supplied description of a camera source. Immutable input to `Start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Opaque caller-chosen identifier, used only for the `Stop` mapping.
    pub caller_source_id: String,
    pub host: String,
    pub port: u16,
    pub channel_no: u32,
    pub stream_type: StreamType,
    pub username: String,
    pub password: String,
    pub width: u32,
    pub height: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl SourceDescriptor {
    /// Structural identity used for dedup. Credentials are not part of it.
    pub fn fingerprint(&self) -> ChannelKey {
        ChannelKey {
            host: self.host.clone(),
            port: self.port,
            channel_no: self.channel_no,
            stream_type: self.stream_type,
            width: self.width,
            height: self.height,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

/// Canonical, stable, printable identity of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    pub host: String,
    pub port: u16,
    pub channel_no: u32,
    pub stream_type: StreamType,
    pub width: u32,
    pub height: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}_{}_{}",
            self.host,
            self.port,
            self.channel_no,
            self.stream_type.as_u8(),
            self.width,
            self.height,
        )?;
        if let Some(start) = self.start_time {
            write!(f, "_{}", start.format("%Y%m%d%H%M%S"))?;
        }
        if let Some(end) = self.end_time {
            write!(f, "_{}", end.format("%Y%m%d%H%M%S"))?;
        }
        Ok(())
    }
}

/// Monotonic lifecycle state of a [`crate::channel::Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelStatus {
    Starting,
    Running,
    ExitedNormally,
    ExitedWithError,
    Killed,
}

impl ChannelStatus {
    /// Terminal states are never re-opened; a channel in one of these is
    /// already scheduled for teardown.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChannelStatus::ExitedNormally | ChannelStatus::ExitedWithError | ChannelStatus::Killed
        )
    }
}

/// Read-only snapshot returned by `Inspect`.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSnapshot {
    pub key: String,
    pub status: ChannelStatus,
    pub subscriber_count: usize,
    pub local_port: u16,
    pub created_at: DateTime<Utc>,
    pub last_access_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
    pub last_error: Option<String>,
}

/// Result of a successful `Start` call.
#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub channel_key: String,
    pub endpoint_hint: String,
    pub local_port: u16,
    pub reused: bool,
}
