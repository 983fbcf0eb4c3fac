use crate::error::NegotiationError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Opaque identifier of a physical sensor strap, assigned by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceHandle(String);

impl DeviceHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceHandle {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Link state of the single managed device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "device")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting(DeviceHandle),
    Connected(DeviceHandle),
}

impl ConnectionState {
    /// True only in `Connected`; `Connecting` does not count.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }

    pub fn device(&self) -> Option<&DeviceHandle> {
        match self {
            ConnectionState::Disconnected => None,
            ConnectionState::Connecting(device) | ConnectionState::Connected(device) => {
                Some(device)
            }
        }
    }

    pub fn connected_device(&self) -> Option<&DeviceHandle> {
        match self {
            ConnectionState::Connected(device) => Some(device),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting(device) => write!(f, "connecting {}", device),
            ConnectionState::Connected(device) => write!(f, "connected {}", device),
        }
    }
}

/// Physiological data channel offered by the strap.
///
/// Only [`StreamKind::HeartRate`] and [`StreamKind::Ecg`] can be streamed; the
/// remaining kinds are recognised so that requests for them can be answered
/// with an explicit "unsupported".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    HeartRate,
    Ecg,
    Acc,
    Gyro,
    Magnetometer,
    Ppg,
    Ppi,
}

impl StreamKind {
    pub const ALL: [StreamKind; 7] = [
        StreamKind::HeartRate,
        StreamKind::Ecg,
        StreamKind::Acc,
        StreamKind::Gyro,
        StreamKind::Magnetometer,
        StreamKind::Ppg,
        StreamKind::Ppi,
    ];

    pub fn is_supported(self) -> bool {
        matches!(self, StreamKind::HeartRate | StreamKind::Ecg)
    }

    /// Data-kind tag used in sample log file names and records.
    pub fn log_tag(self) -> Option<&'static str> {
        match self {
            StreamKind::HeartRate => Some("HR"),
            StreamKind::Ecg => Some("ECG"),
            _ => None,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamKind::HeartRate => "HR",
            StreamKind::Ecg => "ECG",
            StreamKind::Acc => "ACC",
            StreamKind::Gyro => "GYRO",
            StreamKind::Magnetometer => "MAGNETOMETER",
            StreamKind::Ppg => "PPG",
            StreamKind::Ppi => "PPI",
        };
        f.write_str(name)
    }
}

impl FromStr for StreamKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hr" | "heart-rate" | "heart_rate" | "heartrate" => Ok(StreamKind::HeartRate),
            "ecg" => Ok(StreamKind::Ecg),
            "acc" | "accelerometer" => Ok(StreamKind::Acc),
            "gyro" | "gyroscope" => Ok(StreamKind::Gyro),
            "mag" | "magnetometer" => Ok(StreamKind::Magnetometer),
            "ppg" => Ok(StreamKind::Ppg),
            "ppi" | "pulse-interval" => Ok(StreamKind::Ppi),
            other => Err(format!("unknown stream kind: {}", other)),
        }
    }
}

/// Tunable parameter of a stream.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SettingType {
    SampleRate,
    Resolution,
    Range,
    Channels,
}

impl fmt::Display for SettingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettingType::SampleRate => "sample rate",
            SettingType::Resolution => "resolution",
            SettingType::Range => "range",
            SettingType::Channels => "channels",
        };
        f.write_str(name)
    }
}

/// One parameter plus every value the device accepts for it, in device order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettingOption {
    pub setting: SettingType,
    pub values: Vec<u32>,
}

impl StreamSettingOption {
    /// Candidate values sorted ascending for display
    pub fn sorted_values(&self) -> Vec<u32> {
        let mut values = self.values.clone();
        values.sort_unstable();
        values
    }

    pub fn lowest(&self) -> Option<u32> {
        self.values.iter().copied().min()
    }

    pub fn contains(&self, value: u32) -> bool {
        self.values.contains(&value)
    }
}

/// Candidate set returned by a successful negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
    pub kind: StreamKind,
    pub options: Vec<StreamSettingOption>,
}

impl StreamSettings {
    pub fn option(&self, setting: SettingType) -> Option<&StreamSettingOption> {
        self.options.iter().find(|o| o.setting == setting)
    }

    /// Lowest candidate for every parameter.
    pub fn default_configuration(&self) -> StreamConfiguration {
        let mut config = StreamConfiguration::new(self.kind);
        for option in &self.options {
            if let Some(value) = option.lowest() {
                config.selections.insert(option.setting, value);
            }
        }
        config
    }

    /// Build a configuration from explicit choices; parameters without a choice
    /// get their lowest candidate.
    pub fn configure(
        &self,
        choices: &[(SettingType, u32)],
    ) -> Result<StreamConfiguration, NegotiationError> {
        let mut config = self.default_configuration();
        for &(setting, value) in choices {
            let option = self
                .option(setting)
                .ok_or(NegotiationError::UnknownSetting(setting))?;
            if !option.contains(value) {
                return Err(NegotiationError::UnsupportedValue { setting, value });
            }
            config.selections.insert(setting, value);
        }
        Ok(config)
    }
}

/// Chosen value per parameter, handed to the transport when opening a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfiguration {
    pub kind: StreamKind,
    pub selections: BTreeMap<SettingType, u32>,
}

impl StreamConfiguration {
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            selections: BTreeMap::new(),
        }
    }

    pub fn with(mut self, setting: SettingType, value: u32) -> Self {
        self.selections.insert(setting, value);
        self
    }

    pub fn get(&self, setting: SettingType) -> Option<u32> {
        self.selections.get(&setting).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateSample {
    pub bpm: u16,
    /// Beat-to-beat intervals in milliseconds, at most three
    pub rr_intervals_ms: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcgSample {
    /// Stream timestamp reported by the device
    pub device_timestamp: u64,
    /// Samples in microvolts, in device order
    pub samples: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SamplePayload {
    HeartRate(HeartRateSample),
    Ecg(EcgSample),
}

/// One decoded unit of stream data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub received_at: DateTime<Local>,
    pub payload: SamplePayload,
}

impl Sample {
    pub fn kind(&self) -> StreamKind {
        match self.payload {
            SamplePayload::HeartRate(_) => StreamKind::HeartRate,
            SamplePayload::Ecg(_) => StreamKind::Ecg,
        }
    }
}

/// Per-kind stream session state.
///
/// A failed stream returns straight to `Idle`; the failure is reported as an
/// event, not kept as a state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Idle,
    Active,
}

/// Device as announced by the transport in connection events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub handle: DeviceHandle,
    pub name: String,
    pub rssi: Option<i16>,
}

impl DeviceInfo {
    pub fn new(handle: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            handle: DeviceHandle::new(handle),
            name: name.into(),
            rssi: None,
        }
    }
}

/// On-device recording status of recording-capable straps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingStatus {
    pub ongoing: bool,
    pub entry_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ecg_settings() -> StreamSettings {
        StreamSettings {
            kind: StreamKind::Ecg,
            options: vec![
                StreamSettingOption {
                    setting: SettingType::SampleRate,
                    values: vec![260, 130],
                },
                StreamSettingOption {
                    setting: SettingType::Resolution,
                    values: vec![14],
                },
            ],
        }
    }

    #[test]
    fn test_connected_flag_only_in_connected() {
        let device = DeviceHandle::new("A1B2C3D4");
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(!ConnectionState::Connecting(device.clone()).is_connected());
        assert!(ConnectionState::Connected(device).is_connected());
    }

    #[test]
    fn test_only_hr_and_ecg_supported() {
        let supported: Vec<_> = StreamKind::ALL
            .iter()
            .copied()
            .filter(|k| k.is_supported())
            .collect();
        assert_eq!(supported, vec![StreamKind::HeartRate, StreamKind::Ecg]);
        assert_eq!(StreamKind::Ppg.log_tag(), None);
    }

    #[test]
    fn test_stream_kind_parse() {
        assert_eq!("ecg".parse::<StreamKind>(), Ok(StreamKind::Ecg));
        assert_eq!("HR".parse::<StreamKind>(), Ok(StreamKind::HeartRate));
        assert!("eeg".parse::<StreamKind>().is_err());
    }

    #[test]
    fn test_sorted_values_keep_device_order() {
        let settings = ecg_settings();
        let rate = settings.option(SettingType::SampleRate).unwrap();
        assert_eq!(rate.sorted_values(), vec![130, 260]);
        assert_eq!(rate.values, vec![260, 130]);
    }

    #[test]
    fn test_default_configuration_picks_lowest() {
        let config = ecg_settings().default_configuration();
        assert_eq!(config.kind, StreamKind::Ecg);
        assert_eq!(config.get(SettingType::SampleRate), Some(130));
        assert_eq!(config.get(SettingType::Resolution), Some(14));
    }

    #[test]
    fn test_configure_validates_choices() {
        let settings = ecg_settings();

        let config = settings
            .configure(&[(SettingType::SampleRate, 260)])
            .unwrap();
        assert_eq!(config.get(SettingType::SampleRate), Some(260));
        assert_eq!(config.get(SettingType::Resolution), Some(14));

        assert_eq!(
            settings.configure(&[(SettingType::SampleRate, 500)]),
            Err(NegotiationError::UnsupportedValue {
                setting: SettingType::SampleRate,
                value: 500
            })
        );
        assert_eq!(
            settings.configure(&[(SettingType::Range, 8)]),
            Err(NegotiationError::UnknownSetting(SettingType::Range))
        );
    }
}
