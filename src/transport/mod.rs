// Boundary to the vendor sensor transport
//
// The core never speaks the wireless protocol itself. A transport implements
// `SensorTransport` for the request/response primitives and reports everything
// the device does on its own (power changes, connection edges, battery, pushed
// heart rate) as `TransportEvent`s through the sink handed to it by the session.
//
// Implementations:
// - Simulated: in-process heart-rate strap for demos and tests

mod simulated;

use crate::error::TransportResult;
use crate::types::{
    DeviceHandle, DeviceInfo, RecordingStatus, SettingType, StreamConfiguration, StreamKind,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

pub use simulated::{SimulatedStrap, SimulatedTransport};

/// Channel the transport pushes its callbacks into
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

/// Unsolicited notifications from the transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    PowerStateChanged { powered: bool },
    DeviceConnecting(DeviceInfo),
    DeviceConnected(DeviceInfo),
    DeviceDisconnected(DeviceInfo),
    BatteryLevel { device: DeviceHandle, percent: u8 },
    DeviceInfoField {
        device: DeviceHandle,
        field: String,
        value: String,
    },
    /// Stream kinds the device can deliver, known once capability discovery ends
    FeaturesReady {
        device: DeviceHandle,
        kinds: Vec<StreamKind>,
    },
    /// Heart rate pushed outside an opened stream
    HeartRatePush { device: DeviceHandle, frame: RawFrame },
}

/// Undecoded unit of stream data as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    HeartRate { bpm: i32, rr_intervals_ms: Vec<i32> },
    Ecg { timestamp: u64, samples: Vec<i32> },
}

impl RawFrame {
    pub fn kind(&self) -> StreamKind {
        match self {
            RawFrame::HeartRate { .. } => StreamKind::HeartRate,
            RawFrame::Ecg { .. } => StreamKind::Ecg,
        }
    }
}

/// Request primitives of the vendor transport.
///
/// Every async method may be cancelled by dropping its future; the session
/// relies on this to dispose of superseded auto-connect searches, settings
/// queries and stopped streams.
#[async_trait]
pub trait SensorTransport: Send + Sync {
    /// Install the sink for [`TransportEvent`]s. Called once by the session.
    fn set_event_sink(&self, sink: EventSink);

    /// Radio power at the time of the call
    fn is_powered(&self) -> bool;

    async fn connect(&self, device: &DeviceHandle) -> TransportResult<()>;

    async fn disconnect(&self, device: &DeviceHandle) -> TransportResult<()>;

    /// Scan and connect to the first allowed device above the signal threshold.
    ///
    /// Resolves when the search ends; the resulting connection is reported
    /// through connection events.
    async fn auto_connect(
        &self,
        rssi_threshold: i16,
        device_types: &[String],
    ) -> TransportResult<()>;

    /// Raw parameter -> candidate values mapping, in device order
    async fn query_stream_settings(
        &self,
        device: &DeviceHandle,
        kind: StreamKind,
    ) -> TransportResult<Vec<(SettingType, Vec<u32>)>>;

    /// Run a stream, sending frames until it ends.
    ///
    /// `Ok(())` means the device ended the stream gracefully; `Err` is a
    /// stream failure.
    async fn open_stream(
        &self,
        device: &DeviceHandle,
        config: &StreamConfiguration,
        frames: mpsc::Sender<RawFrame>,
    ) -> TransportResult<()>;

    async fn recording_status(&self, device: &DeviceHandle) -> TransportResult<RecordingStatus>;
}
