// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Transcoder binary not found: {0}")]
    TranscoderBinaryMissing(String),

    #[error("No loopback port available in the configured range")]
    NoPortAvailable,

    #[error("Failed to bind producer listener: {0}")]
    ListenerBindFailed(String),

    #[error("Failed to spawn transcoder process: {0}")]
    SpawnFailed(String),

    #[error("Channel '{0}' not found")]
    ChannelNotFound(String),

    #[error("Subscriber send failed: {0}")]
    SubscriberSendFailed(String),

    #[error("Transcoder for channel '{0}' exited")]
    SupervisorExited(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
