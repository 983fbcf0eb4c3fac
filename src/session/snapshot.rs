use crate::connection::DeviceCapabilities;
use crate::types::{
    ConnectionState, EcgSample, HeartRateSample, RecordingStatus, StreamKind, StreamSettings,
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Read-only view of everything the session publishes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub is_device_connected: bool,
    pub is_bluetooth_on: bool,
    pub auto_connect_active: bool,
    pub active_streams: BTreeSet<StreamKind>,

    pub recording_supported: bool,
    pub recording: Option<RecordingStatus>,
    pub supported_streams: BTreeSet<StreamKind>,
    pub battery_percent: Option<u8>,
    pub device_info: BTreeMap<String, String>,

    /// Candidate set of the last successful negotiation
    pub stream_settings: Option<StreamSettings>,
    /// Kind whose settings query is in flight
    pub negotiating: Option<StreamKind>,

    pub latest_heart_rate: Option<HeartRateSample>,
    pub latest_ecg: Option<EcgSample>,

    pub alert_active: bool,
    /// Sample log writes that failed since the session started
    pub log_write_failures: u64,
}

impl SessionSnapshot {
    pub(crate) fn set_capabilities(&mut self, caps: &DeviceCapabilities) {
        self.recording_supported = caps.recording_supported;
        self.recording = caps.recording.clone();
        self.supported_streams = caps.supported_streams.clone();
        self.battery_percent = caps.battery_percent;
        self.device_info = caps.device_info.clone();
    }

    pub fn is_stream_active(&self, kind: StreamKind) -> bool {
        self.active_streams.contains(&kind)
    }

    /// Live heart-rate line, e.g. `58 BPM  RR 812 ms`
    pub fn hr_message(&self) -> Option<String> {
        let hr = self.latest_heart_rate.as_ref()?;
        if hr.rr_intervals_ms.is_empty() {
            return Some(format!("{} BPM", hr.bpm));
        }
        let rr: Vec<String> = hr.rr_intervals_ms.iter().map(|rr| rr.to_string()).collect();
        Some(format!("{} BPM  RR {} ms", hr.bpm, rr.join("/")))
    }

    pub fn ecg_message(&self) -> Option<String> {
        let ecg = self.latest_ecg.as_ref()?;
        let last = ecg.samples.last()?;
        Some(format!(
            "ECG {} µV ({} samples @ {})",
            last,
            ecg.samples.len(),
            ecg.device_timestamp
        ))
    }

    pub fn battery_message(&self) -> Option<String> {
        self.battery_percent
            .map(|percent| format!("Battery {}%", percent))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Info,
    Error,
}

/// Notice for the operator, queued in arrival order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorMessage {
    pub level: MessageLevel,
    pub text: String,
    pub at: DateTime<Local>,
}

impl OperatorMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Info,
            text: text.into(),
            at: Local::now(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Error,
            text: text.into(),
            at: Local::now(),
        }
    }
}

impl fmt::Display for OperatorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            MessageLevel::Info => "info",
            MessageLevel::Error => "error",
        };
        write!(f, "[{}] {}", level, self.text)
    }
}
