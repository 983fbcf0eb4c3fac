use clap::{Args, Parser, Subcommand};
use pshr_monitor::transport::SimulatedStrap;
use pshr_monitor::{DeviceHandle, StreamKind};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "pshr",
    version,
    about = "Heart-rate / ECG chest strap monitor",
    long_about = "Connect to a heart-rate chest strap, negotiate and run its HR / ECG streams,\n\
                  and append every sample to per-day log files.\n\
                  Runs against a simulated strap; configure with PSHR_* environment variables."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Connect, stream and log samples until Ctrl-C, --duration or link loss
    Monitor(MonitorArgs),
    /// Print the settings the strap supports for one stream kind
    Settings(SettingsArgs),
}

#[derive(Args)]
pub struct ConnectArgs {
    /// Device id to connect to
    #[arg(long, env = "PSHR_DEVICE_ID")]
    pub device: Option<String>,

    /// Search for an allowed device instead of connecting to a known one
    #[arg(long, default_value_t = false)]
    pub auto_connect: bool,

    /// Auto-connect signal threshold in dBm
    #[arg(long, allow_hyphen_values = true)]
    pub rssi: Option<i16>,

    /// Seconds to wait for the connection
    #[arg(long, default_value_t = 10.0)]
    pub connect_timeout: f64,
}

#[derive(Args)]
pub struct SimulationArgs {
    /// Device id of the simulated strap
    #[arg(long, default_value = "7E37D222")]
    pub sim_device: String,

    /// Model name of the simulated strap
    #[arg(long, default_value = "Polar H10")]
    pub sim_model: String,

    /// Signal strength of the simulated strap in dBm
    #[arg(long, default_value_t = -48, allow_hyphen_values = true)]
    pub sim_rssi: i16,

    /// Battery level of the simulated strap
    #[arg(long, default_value_t = 87)]
    pub sim_battery: u8,

    /// Resting heart rate of the simulated wearer
    #[arg(long, default_value_t = 62)]
    pub sim_bpm: u16,

    /// Milliseconds between simulated heart-rate frames
    #[arg(long, default_value_t = 1000)]
    pub sim_hr_interval_ms: u64,

    /// Milliseconds the simulated connect takes
    #[arg(long, default_value_t = 150)]
    pub sim_connect_delay_ms: u64,

    /// Drop the simulated link this many seconds after connecting
    #[arg(long)]
    pub drop_after: Option<f64>,
}

impl SimulationArgs {
    pub fn strap(&self) -> SimulatedStrap {
        SimulatedStrap {
            handle: DeviceHandle::new(self.sim_device.as_str()),
            name: format!("{} {}", self.sim_model, self.sim_device),
            rssi: self.sim_rssi,
            battery_percent: self.sim_battery,
            base_bpm: self.sim_bpm,
            hr_interval: Duration::from_millis(self.sim_hr_interval_ms),
            connect_delay: Duration::from_millis(self.sim_connect_delay_ms),
            drop_link_after: self
                .drop_after
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64),
        }
    }
}

#[derive(Args)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Stream kinds to run, comma separated (hr, ecg)
    #[arg(long, value_delimiter = ',', value_parser = parse_stream_kind, default_value = "hr")]
    pub streams: Vec<StreamKind>,

    /// Directory for the sample log files
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<f64>,

    /// Ring the terminal bell on alerts
    #[arg(long, default_value_t = false)]
    pub bell: bool,

    /// Print JSON lines instead of text
    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[command(flatten)]
    pub sim: SimulationArgs,
}

#[derive(Args)]
pub struct SettingsArgs {
    /// Stream kind (hr, ecg, acc, gyro, mag, ppg, ppi)
    #[arg(value_parser = parse_stream_kind)]
    pub kind: StreamKind,

    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[command(flatten)]
    pub sim: SimulationArgs,
}

pub fn parse_stream_kind(s: &str) -> Result<StreamKind, String> {
    s.parse()
}

/// Positive number of seconds
pub fn seconds(value: f64) -> Result<Duration, String> {
    if value.is_finite() && value > 0.0 {
        Ok(Duration::from_secs_f64(value))
    } else {
        Err(format!("Invalid duration: {} (expected seconds > 0)", value))
    }
}
