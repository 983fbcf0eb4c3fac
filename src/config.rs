use crate::types::DeviceHandle;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Stream-error alert always plays this many tones
pub const STREAM_ERROR_TONE_REPEATS: u32 = 2;

/// Alert playback parameters
#[derive(Debug, Clone, PartialEq)]
pub struct AlertConfig {
    /// Sound resource looped on connection loss
    pub alarm_sound: String,
    /// Vibration pulses issued on connection loss
    pub vibration_pulses: u32,
    pub vibration_interval: Duration,
    /// Delay between the stream-error tones
    pub tone_interval: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            alarm_sound: "alarm".to_string(),
            vibration_pulses: 5,
            vibration_interval: Duration::from_millis(1000),
            tone_interval: Duration::from_millis(1000),
        }
    }
}

/// Device session configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Directory receiving the per-day sample log files
    pub log_dir: PathBuf,
    /// Explicit device to connect to; otherwise the last connected one is used
    pub device_id: Option<DeviceHandle>,
    /// Minimum signal strength for auto-connect (dBm)
    pub rssi_threshold: i16,
    /// Device-type allow-list for auto-connect
    pub device_types: Vec<String>,
    /// Name markers of models that keep on-device recordings
    pub recording_models: Vec<String>,
    /// Bound on one transport connect request
    pub connect_timeout: Duration,
    pub negotiation_timeout: Duration,
    pub alert: AlertConfig,
    /// Minimum spacing between operator notices about failed log writes
    pub log_error_notice_interval: Duration,
    /// Frames buffered between a stream and the session task
    pub frame_queue_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            device_id: None,
            rssi_threshold: -55,
            device_types: vec!["polar".to_string()],
            recording_models: vec!["H10".to_string()],
            connect_timeout: Duration::from_secs(15),
            negotiation_timeout: Duration::from_secs(10),
            alert: AlertConfig::default(),
            log_error_notice_interval: Duration::from_secs(30),
            frame_queue_capacity: 256,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables (and a `.env` file if present)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        Ok(Self {
            log_dir: env::var("PSHR_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            device_id: env::var("PSHR_DEVICE_ID")
                .ok()
                .filter(|id| !id.trim().is_empty())
                .map(|id| DeviceHandle::new(id.trim())),
            rssi_threshold: parse_var("PSHR_RSSI_THRESHOLD", defaults.rssi_threshold)?,
            device_types: list_var("PSHR_DEVICE_TYPES").unwrap_or(defaults.device_types),
            recording_models: list_var("PSHR_RECORDING_MODELS")
                .unwrap_or(defaults.recording_models),
            connect_timeout: Duration::from_secs(parse_var(
                "PSHR_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout.as_secs(),
            )?),
            negotiation_timeout: Duration::from_secs(parse_var(
                "PSHR_NEGOTIATION_TIMEOUT_SECS",
                defaults.negotiation_timeout.as_secs(),
            )?),
            alert: AlertConfig {
                alarm_sound: env::var("PSHR_ALARM_SOUND")
                    .unwrap_or(defaults.alert.alarm_sound),
                vibration_pulses: parse_var(
                    "PSHR_VIBRATION_PULSES",
                    defaults.alert.vibration_pulses,
                )?,
                vibration_interval: Duration::from_millis(parse_var(
                    "PSHR_VIBRATION_INTERVAL_MS",
                    defaults.alert.vibration_interval.as_millis() as u64,
                )?),
                tone_interval: Duration::from_millis(parse_var(
                    "PSHR_TONE_INTERVAL_MS",
                    defaults.alert.tone_interval.as_millis() as u64,
                )?),
            },
            log_error_notice_interval: Duration::from_secs(parse_var(
                "PSHR_LOG_ERROR_NOTICE_SECS",
                defaults.log_error_notice_interval.as_secs(),
            )?),
            frame_queue_capacity: defaults.frame_queue_capacity,
        }
        .validated()?)
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.rssi_threshold > 0 {
            return Err(ConfigError::InvalidValue(format!(
                "PSHR_RSSI_THRESHOLD must be a negative dBm value, got {}",
                self.rssi_threshold
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "PSHR_CONNECT_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }
        if self.negotiation_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "PSHR_NEGOTIATION_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}

fn default_log_dir() -> PathBuf {
    dirs::document_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pshr-logs")
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber(name.to_string(), raw)),
        Err(_) => Ok(default),
    }
}

fn list_var(name: &str) -> Option<Vec<String>> {
    env::var(name).ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid number in {0}: {1:?}")]
    InvalidNumber(String, String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
