//! Error types for the relay and the panel client.
//!
//! Line decode errors are recovered where they occur. Serial errors are fatal
//! to the channel and escalate to the server. Client errors are surfaced to the
//! operator and never retried.

use std::{io, net::SocketAddr};

use thiserror::Error;

/// A single wire line that could not be turned into a command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("line {line}: expected `<id> <angle>` but got {tokens} token(s): {raw:?}")]
    TokenCount { line: usize, tokens: usize, raw: String },

    #[error("line {line}: not a valid number: {raw:?}")]
    InvalidNumber { line: usize, raw: String },
}

impl DecodeError {
    /// 1-based line number within the payload.
    pub fn line(&self) -> usize {
        match self {
            DecodeError::TokenCount { line, .. } | DecodeError::InvalidNumber { line, .. } => *line,
        }
    }

    /// The trimmed text of the offending line.
    pub fn raw(&self) -> &str {
        match self {
            DecodeError::TokenCount { raw, .. } | DecodeError::InvalidNumber { raw, .. } => raw,
        }
    }
}

/// Failures of the serial actuator channel. Any of these leaves the channel
/// unusable.
#[derive(Error, Debug)]
pub enum SerialError {
    #[error("failed to open serial device {device} at {baud} baud: {source}")]
    Open {
        device: String,
        baud: u32,
        #[source]
        source: serialport::Error,
    },

    #[error("serial write failed after {written} line(s) of the batch: {source}")]
    Write {
        written: usize,
        #[source]
        source: io::Error,
    },

    #[error("could not start the serial writer thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("serial channel is closed after an earlier failure")]
    Closed,
}

/// Send discipline failures on the panel side.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("could not reach bridge at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("write to bridge at {addr} failed: {source}")]
    Write {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("bridge at {addr} did not answer within {millis} ms")]
    Timeout { addr: SocketAddr, millis: u64 },
}

/// Configuration loading and validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that stop the relay service.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Serial(#[from] SerialError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
