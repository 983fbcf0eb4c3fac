#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use pshr_monitor::error::{TransportError, TransportResult};
use pshr_monitor::transport::{EventSink, RawFrame, SensorTransport, TransportEvent};
use pshr_monitor::{
    AlertPlayer, DeviceHandle, DeviceInfo, MonitorConfig, RecordingStatus, SessionSnapshot,
    SettingType, StreamConfiguration, StreamKind,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub const WAIT: Duration = Duration::from_secs(3);

/// What the test feeds into an open stream
pub enum StreamInput {
    Frame(RawFrame),
    End(TransportResult<()>),
}

/// What a successful `connect` call does besides returning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehaviour {
    /// Emit connecting and connected events, then return `Ok`
    Announce,
    /// Return `Ok` without any connection event
    Silent,
    /// Never return
    Hang,
}

/// Transport double driven entirely by the test
pub struct ScriptedTransport {
    info: DeviceInfo,
    sink: Mutex<Option<EventSink>>,
    powered: AtomicBool,
    connect_result: Mutex<TransportResult<()>>,
    connect_calls: AtomicUsize,
    connect_behaviour: Mutex<ConnectBehaviour>,
    settings: Mutex<TransportResult<Vec<(SettingType, Vec<u32>)>>>,
    settings_delay: Mutex<Duration>,
    streams: Mutex<HashMap<StreamKind, mpsc::UnboundedSender<StreamInput>>>,
    searches_started: AtomicUsize,
    live_searches: Arc<AtomicUsize>,
}

struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Self::with_device(DeviceInfo::new("D1", "Polar H10 D1"))
    }

    pub fn with_device(info: DeviceInfo) -> Arc<Self> {
        Arc::new(Self {
            info,
            sink: Mutex::new(None),
            powered: AtomicBool::new(true),
            connect_result: Mutex::new(Ok(())),
            connect_calls: AtomicUsize::new(0),
            connect_behaviour: Mutex::new(ConnectBehaviour::Announce),
            settings: Mutex::new(Ok(vec![
                (SettingType::SampleRate, vec![130]),
                (SettingType::Resolution, vec![14]),
            ])),
            settings_delay: Mutex::new(Duration::from_millis(1)),
            streams: Mutex::new(HashMap::new()),
            searches_started: AtomicUsize::new(0),
            live_searches: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn device(&self) -> DeviceHandle {
        self.info.handle.clone()
    }

    pub fn info(&self) -> DeviceInfo {
        self.info.clone()
    }

    pub fn emit(&self, event: TransportEvent) {
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.send(event).ok();
        }
    }

    pub fn set_connect_result(&self, result: TransportResult<()>) {
        *self.connect_result.lock() = result;
    }

    pub fn set_connect_behaviour(&self, behaviour: ConnectBehaviour) {
        *self.connect_behaviour.lock() = behaviour;
    }

    pub fn set_settings(&self, answer: TransportResult<Vec<(SettingType, Vec<u32>)>>) {
        *self.settings.lock() = answer;
    }

    pub fn set_settings_delay(&self, delay: Duration) {
        *self.settings_delay.lock() = delay;
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn searches_started(&self) -> usize {
        self.searches_started.load(Ordering::SeqCst)
    }

    pub fn live_searches(&self) -> usize {
        self.live_searches.load(Ordering::SeqCst)
    }

    /// Wait for the session to open a stream of `kind` and take its input
    pub async fn opened_stream(&self, kind: StreamKind) -> mpsc::UnboundedSender<StreamInput> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if let Some(input) = self.streams.lock().remove(&kind) {
                return input;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "{} stream was never opened",
                kind
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl SensorTransport for ScriptedTransport {
    fn set_event_sink(&self, sink: EventSink) {
        *self.sink.lock() = Some(sink);
    }

    fn is_powered(&self) -> bool {
        self.powered.load(Ordering::SeqCst)
    }

    async fn connect(&self, device: &DeviceHandle) -> TransportResult<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if device != &self.info.handle {
            return Err(TransportError::DeviceNotFound(device.to_string()));
        }
        let result = self.connect_result.lock().clone();
        result?;
        let behaviour = *self.connect_behaviour.lock();
        match behaviour {
            ConnectBehaviour::Announce => {
                self.emit(TransportEvent::DeviceConnecting(self.info()));
                self.emit(TransportEvent::DeviceConnected(self.info()));
            }
            ConnectBehaviour::Silent => {}
            ConnectBehaviour::Hang => std::future::pending::<()>().await,
        }
        Ok(())
    }

    async fn disconnect(&self, _device: &DeviceHandle) -> TransportResult<()> {
        self.emit(TransportEvent::DeviceDisconnected(self.info()));
        Ok(())
    }

    async fn auto_connect(&self, _rssi: i16, _types: &[String]) -> TransportResult<()> {
        self.searches_started.fetch_add(1, Ordering::SeqCst);
        let _live = LiveGuard::new(Arc::clone(&self.live_searches));
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn query_stream_settings(
        &self,
        _device: &DeviceHandle,
        _kind: StreamKind,
    ) -> TransportResult<Vec<(SettingType, Vec<u32>)>> {
        let delay = *self.settings_delay.lock();
        tokio::time::sleep(delay).await;
        self.settings.lock().clone()
    }

    async fn open_stream(
        &self,
        _device: &DeviceHandle,
        config: &StreamConfiguration,
        frames: mpsc::Sender<RawFrame>,
    ) -> TransportResult<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.streams.lock().insert(config.kind, tx);
        loop {
            match rx.recv().await {
                Some(StreamInput::Frame(frame)) => {
                    if frames.send(frame).await.is_err() {
                        return Ok(());
                    }
                }
                Some(StreamInput::End(result)) => return result,
                None => std::future::pending::<()>().await,
            }
        }
    }

    async fn recording_status(&self, _device: &DeviceHandle) -> TransportResult<RecordingStatus> {
        Ok(RecordingStatus {
            ongoing: true,
            entry_id: "rec-1".to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertCall {
    Loop(String),
    StopLoop,
    Tone(u32, Duration),
    Vibrate(u32, Duration),
}

#[derive(Default)]
pub struct RecordingPlayer {
    calls: Mutex<Vec<AlertCall>>,
}

impl RecordingPlayer {
    pub fn calls(&self) -> Vec<AlertCall> {
        self.calls.lock().clone()
    }

    pub fn tones(&self) -> Vec<AlertCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, AlertCall::Tone(..)))
            .collect()
    }
}

impl AlertPlayer for RecordingPlayer {
    fn play_looping(&self, sound: &str) {
        self.calls.lock().push(AlertCall::Loop(sound.to_string()));
    }

    fn stop_looping(&self) {
        self.calls.lock().push(AlertCall::StopLoop);
    }

    fn play_tone(&self, count: u32, interval: Duration) {
        self.calls.lock().push(AlertCall::Tone(count, interval));
    }

    fn vibrate(&self, count: u32, interval: Duration) {
        self.calls.lock().push(AlertCall::Vibrate(count, interval));
    }
}

pub fn test_config(log_dir: &Path) -> MonitorConfig {
    MonitorConfig {
        log_dir: log_dir.to_path_buf(),
        negotiation_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}

/// Poll `condition` until it holds or [`WAIT`] elapses
pub async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until the published snapshot satisfies `predicate`
pub async fn wait_until<F>(state: &mut watch::Receiver<SessionSnapshot>, predicate: F) -> SessionSnapshot
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    let snapshot = tokio::time::timeout(WAIT, state.wait_for(predicate))
        .await
        .expect("timed out waiting for session state")
        .expect("session closed");
    snapshot.clone()
}

pub fn hr_frame(bpm: i32, rr: &[i32]) -> RawFrame {
    RawFrame::HeartRate {
        bpm,
        rr_intervals_ms: rr.to_vec(),
    }
}

pub fn read_log_lines(dir: &Path, tag: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return lines;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&format!("{}_", tag)) {
            let content = std::fs::read_to_string(entry.path()).unwrap();
            lines.extend(content.lines().map(str::to_string));
        }
    }
    lines
}
