use crate::types::{SettingType, StreamKind};
use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by the sensor transport layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Request rejected by device: {0}")]
    Rejected(String),

    #[error("Link error: {0}")]
    Link(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Bluetooth radio is powered off")]
    RadioOff,

    #[error("No device to connect to (set a device id or use auto-connect)")]
    NoTarget,

    #[error("No device connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("Stream settings can only be requested while connected")]
    NotConnected,

    #[error("Settings query for {0} timed out")]
    Timeout(StreamKind),

    #[error("Settings query for {0} was superseded by a newer request")]
    Superseded(StreamKind),

    #[error("Device disconnected while querying {0} settings")]
    Disconnected(StreamKind),

    #[error("Device reported no candidate values for {0}")]
    EmptyCandidates(SettingType),

    #[error("Value {value} is not a supported {setting}")]
    UnsupportedValue { setting: SettingType, value: u32 },

    #[error("Device has no {0} parameter for this stream")]
    UnknownSetting(SettingType),

    #[error("Settings query rejected: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Streams can only be started while connected")]
    NotConnected,

    #[error("Stream kind {0} is not supported")]
    Unsupported(StreamKind),

    #[error("{0} stream is already active")]
    AlreadyActive(StreamKind),

    #[error("{kind} stream failed: {source}")]
    Transport {
        kind: StreamKind,
        #[source]
        source: TransportError,
    },
}

/// A received frame that could not be turned into a [`crate::types::Sample`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Expected a {expected} frame, got {actual}")]
    KindMismatch {
        expected: StreamKind,
        actual: StreamKind,
    },

    #[error("Heart rate out of range: {0}")]
    InvalidHeartRate(i32),

    #[error("RR interval out of range: {0} ms")]
    InvalidInterval(i32),

    #[error("ECG frame contains no samples")]
    EmptyEcg,
}

#[derive(Error, Debug)]
pub enum LogWriteError {
    #[error("No sample log is kept for {0} data")]
    UnsupportedKind(StreamKind),

    #[error("Failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to append to {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors returned by the device session facade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Device session is shut down")]
    Closed,

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
