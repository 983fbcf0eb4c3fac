// Simulated heart-rate strap
//
// Plays the role of the vendor transport without any radio: connects to a
// single virtual strap, reports battery / device info / features, and streams
// synthetic heart rate (about 1 Hz) and ECG (130 Hz in 73-sample frames).
// Useful for:
// - Demos of the monitor without hardware
// - CLI and end-to-end tests
// - Rehearsing link loss (`drop_link_after`)

use super::{EventSink, RawFrame, SensorTransport, TransportEvent};
use crate::error::{TransportError, TransportResult};
use crate::types::{
    DeviceHandle, DeviceInfo, RecordingStatus, SettingType, StreamConfiguration, StreamKind,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

const ECG_SAMPLE_RATE: u32 = 130;
const ECG_FRAME_SAMPLES: usize = 73;

/// Behaviour of the virtual strap
#[derive(Debug, Clone)]
pub struct SimulatedStrap {
    pub handle: DeviceHandle,
    pub name: String,
    pub rssi: i16,
    pub battery_percent: u8,
    pub base_bpm: u16,
    pub hr_interval: Duration,
    pub connect_delay: Duration,
    /// Drop the link this long after every successful connect
    pub drop_link_after: Option<Duration>,
}

impl Default for SimulatedStrap {
    fn default() -> Self {
        Self {
            handle: DeviceHandle::new("7E37D222"),
            name: "Polar H10 7E37D222".to_string(),
            rssi: -48,
            battery_percent: 87,
            base_bpm: 62,
            hr_interval: Duration::from_secs(1),
            connect_delay: Duration::from_millis(150),
            drop_link_after: None,
        }
    }
}

struct LinkState {
    powered: bool,
    connected: bool,
    // bumped on every link change so streams notice a drop
    epoch: u64,
}

struct Shared {
    strap: SimulatedStrap,
    link: Mutex<LinkState>,
    sink: Mutex<Option<EventSink>>,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        if let Some(sink) = self.sink.lock().as_ref() {
            if sink.send(event).is_err() {
                log::debug!("Simulated transport: event sink closed");
            }
        }
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            handle: self.strap.handle.clone(),
            name: self.strap.name.clone(),
            rssi: Some(self.strap.rssi),
        }
    }

    fn current_epoch(&self) -> Option<u64> {
        let link = self.link.lock();
        link.connected.then_some(link.epoch)
    }

    fn drop_link(&self, epoch: u64) {
        {
            let mut link = self.link.lock();
            if !link.connected || link.epoch != epoch {
                return;
            }
            link.connected = false;
            link.epoch += 1;
        }
        log::info!("Simulated transport: link to {} lost", self.strap.handle);
        self.emit(TransportEvent::DeviceDisconnected(self.info()));
    }
}

pub struct SimulatedTransport {
    shared: Arc<Shared>,
}

impl SimulatedTransport {
    pub fn new(strap: SimulatedStrap) -> Self {
        Self {
            shared: Arc::new(Shared {
                strap,
                link: Mutex::new(LinkState {
                    powered: true,
                    connected: false,
                    epoch: 0,
                }),
                sink: Mutex::new(None),
            }),
        }
    }

    pub fn strap(&self) -> &SimulatedStrap {
        &self.shared.strap
    }

    /// Toggle the virtual radio. Powering off drops an open link.
    pub fn set_powered(&self, powered: bool) {
        let dropped_epoch = {
            let mut link = self.shared.link.lock();
            link.powered = powered;
            (!powered && link.connected).then_some(link.epoch)
        };
        self.shared.emit(TransportEvent::PowerStateChanged { powered });
        if let Some(epoch) = dropped_epoch {
            self.shared.drop_link(epoch);
        }
    }

    fn require_connected(&self, device: &DeviceHandle) -> TransportResult<u64> {
        if device != &self.shared.strap.handle {
            return Err(TransportError::DeviceNotFound(device.to_string()));
        }
        self.shared
            .current_epoch()
            .ok_or(TransportError::Disconnected)
    }

    fn announce_capabilities(&self, epoch: u64) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            if shared.current_epoch() != Some(epoch) {
                return;
            }
            let device = shared.strap.handle.clone();
            shared.emit(TransportEvent::DeviceInfoField {
                device: device.clone(),
                field: "firmware".to_string(),
                value: "3.0.35".to_string(),
            });
            shared.emit(TransportEvent::BatteryLevel {
                device: device.clone(),
                percent: shared.strap.battery_percent,
            });
            shared.emit(TransportEvent::FeaturesReady {
                device,
                kinds: vec![StreamKind::HeartRate, StreamKind::Ecg],
            });

            if let Some(after) = shared.strap.drop_link_after {
                sleep(after).await;
                shared.drop_link(epoch);
            }
        });
    }

    async fn stream_heart_rate(
        &self,
        epoch: u64,
        frames: mpsc::Sender<RawFrame>,
    ) -> TransportResult<()> {
        let base = self.shared.strap.base_bpm as i32;
        loop {
            sleep(self.shared.strap.hr_interval).await;
            if self.shared.current_epoch() != Some(epoch) {
                return Err(TransportError::Disconnected);
            }

            let frame = {
                let mut rng = rand::rng();
                let bpm = base + rng.random_range(-3..=3);
                let rr = 60_000 / bpm.max(1);
                let intervals = if rng.random_bool(0.2) {
                    vec![rr + rng.random_range(-15..=15), rr + rng.random_range(-15..=15)]
                } else {
                    vec![rr + rng.random_range(-15..=15)]
                };
                RawFrame::HeartRate {
                    bpm,
                    rr_intervals_ms: intervals,
                }
            };

            if frames.send(frame).await.is_err() {
                return Ok(());
            }
        }
    }

    async fn stream_ecg(
        &self,
        epoch: u64,
        sample_rate: u32,
        frames: mpsc::Sender<RawFrame>,
    ) -> TransportResult<()> {
        let sample_rate = sample_rate.max(1);
        let frame_period =
            Duration::from_secs_f64(ECG_FRAME_SAMPLES as f64 / sample_rate as f64);
        let sample_ns = 1_000_000_000u64 / sample_rate as u64;
        let beat_samples = (sample_rate as u64 * 60) / self.shared.strap.base_bpm.max(1) as u64;
        let mut timestamp: u64 = 599_618_496_000_000_000;
        let mut index: u64 = 0;

        loop {
            sleep(frame_period).await;
            if self.shared.current_epoch() != Some(epoch) {
                return Err(TransportError::Disconnected);
            }

            let samples: Vec<i32> = {
                let mut rng = rand::rng();
                (0..ECG_FRAME_SAMPLES)
                    .map(|i| {
                        let phase = (index + i as u64) % beat_samples.max(1);
                        let wave = match phase {
                            0 => 1200,
                            1 => -300,
                            p if p < beat_samples / 3 => 150,
                            _ => 0,
                        };
                        wave + rng.random_range(-20..=20)
                    })
                    .collect()
            };
            index += ECG_FRAME_SAMPLES as u64;
            timestamp += sample_ns * ECG_FRAME_SAMPLES as u64;

            if frames
                .send(RawFrame::Ecg { timestamp, samples })
                .await
                .is_err()
            {
                return Ok(());
            }
        }
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new(SimulatedStrap::default())
    }
}

#[async_trait]
impl SensorTransport for SimulatedTransport {
    fn set_event_sink(&self, sink: EventSink) {
        *self.shared.sink.lock() = Some(sink);
    }

    fn is_powered(&self) -> bool {
        self.shared.link.lock().powered
    }

    async fn connect(&self, device: &DeviceHandle) -> TransportResult<()> {
        if device != &self.shared.strap.handle {
            return Err(TransportError::DeviceNotFound(device.to_string()));
        }
        if !self.is_powered() {
            return Err(TransportError::Link("radio powered off".to_string()));
        }

        log::info!("Simulated transport: connecting to {}", device);
        self.shared
            .emit(TransportEvent::DeviceConnecting(self.shared.info()));
        sleep(self.shared.strap.connect_delay).await;

        let epoch = {
            let mut link = self.shared.link.lock();
            link.connected = true;
            link.epoch += 1;
            link.epoch
        };
        self.shared
            .emit(TransportEvent::DeviceConnected(self.shared.info()));
        self.announce_capabilities(epoch);
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceHandle) -> TransportResult<()> {
        let epoch = self.require_connected(device)?;
        self.shared.drop_link(epoch);
        Ok(())
    }

    async fn auto_connect(
        &self,
        rssi_threshold: i16,
        device_types: &[String],
    ) -> TransportResult<()> {
        sleep(self.shared.strap.connect_delay).await;

        let name = self.shared.strap.name.to_lowercase();
        let allowed = device_types.is_empty()
            || device_types
                .iter()
                .any(|t| name.contains(&t.to_lowercase()));
        if !allowed || self.shared.strap.rssi < rssi_threshold {
            return Err(TransportError::DeviceNotFound(format!(
                "no allowed device above {} dBm",
                rssi_threshold
            )));
        }

        let handle = self.shared.strap.handle.clone();
        self.connect(&handle).await
    }

    async fn query_stream_settings(
        &self,
        device: &DeviceHandle,
        kind: StreamKind,
    ) -> TransportResult<Vec<(SettingType, Vec<u32>)>> {
        self.require_connected(device)?;
        sleep(Duration::from_millis(30)).await;

        match kind {
            StreamKind::Ecg => Ok(vec![
                (SettingType::SampleRate, vec![ECG_SAMPLE_RATE]),
                (SettingType::Resolution, vec![14]),
            ]),
            StreamKind::HeartRate => Ok(vec![]),
            other => Err(TransportError::NotSupported(format!("{} stream", other))),
        }
    }

    async fn open_stream(
        &self,
        device: &DeviceHandle,
        config: &StreamConfiguration,
        frames: mpsc::Sender<RawFrame>,
    ) -> TransportResult<()> {
        let epoch = self.require_connected(device)?;
        log::info!("Simulated transport: {} stream opened", config.kind);

        match config.kind {
            StreamKind::HeartRate => self.stream_heart_rate(epoch, frames).await,
            StreamKind::Ecg => {
                let rate = config
                    .get(SettingType::SampleRate)
                    .unwrap_or(ECG_SAMPLE_RATE);
                self.stream_ecg(epoch, rate, frames).await
            }
            other => Err(TransportError::NotSupported(format!("{} stream", other))),
        }
    }

    async fn recording_status(&self, device: &DeviceHandle) -> TransportResult<RecordingStatus> {
        self.require_connected(device)?;
        if !self.shared.strap.name.contains("H10") {
            return Err(TransportError::NotSupported("recording".to_string()));
        }
        Ok(RecordingStatus {
            ongoing: false,
            entry_id: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_strap() -> SimulatedStrap {
        SimulatedStrap {
            hr_interval: Duration::from_millis(10),
            connect_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_connect_emits_connection_edges() {
        let transport = SimulatedTransport::new(fast_strap());
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.set_event_sink(tx);

        let handle = transport.strap().handle.clone();
        transport.connect(&handle).await.unwrap();

        assert!(matches!(rx.recv().await, Some(TransportEvent::DeviceConnecting(_))));
        assert!(matches!(rx.recv().await, Some(TransportEvent::DeviceConnected(_))));
    }

    #[tokio::test]
    async fn test_unknown_device_rejected() {
        let transport = SimulatedTransport::new(fast_strap());
        let result = transport.connect(&DeviceHandle::new("FFFFFFFF")).await;
        assert!(matches!(result, Err(TransportError::DeviceNotFound(_))));
    }

    #[tokio::test]
    async fn test_ecg_settings_and_frames() {
        let transport = SimulatedTransport::new(fast_strap());
        let handle = transport.strap().handle.clone();
        transport.connect(&handle).await.unwrap();

        let settings = transport
            .query_stream_settings(&handle, StreamKind::Ecg)
            .await
            .unwrap();
        assert_eq!(settings[0], (SettingType::SampleRate, vec![130]));

        let (tx, mut rx) = mpsc::channel(4);
        let config = StreamConfiguration::new(StreamKind::Ecg).with(SettingType::SampleRate, 130);
        let stream = tokio::spawn(async move {
            let result = transport.open_stream(&handle, &config, tx).await;
            (transport, result)
        });

        match rx.recv().await {
            Some(RawFrame::Ecg { samples, .. }) => assert_eq!(samples.len(), ECG_FRAME_SAMPLES),
            other => panic!("unexpected frame: {:?}", other),
        }
        drop(rx);

        let (_transport, result) = stream.await.unwrap();
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_power_off_drops_link() {
        let transport = SimulatedTransport::new(fast_strap());
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.set_event_sink(tx);
        let handle = transport.strap().handle.clone();
        transport.connect(&handle).await.unwrap();

        transport.set_powered(false);

        let mut saw_disconnect = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, TransportEvent::DeviceDisconnected(_)) {
                saw_disconnect = true;
            }
        }
        assert!(saw_disconnect);
        assert!(!transport.is_powered());
    }
}
