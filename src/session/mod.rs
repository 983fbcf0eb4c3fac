// Device session - the single externally visible orchestrator
//
// All state lives in one owner task (`DeviceSession`). Everything that can
// change it arrives as a message on one of its queues:
// - commands from `DeviceSessionHandle`
// - transport events from the sink installed on the transport
// - frames and end-of-stream from stream pump tasks
// - settings-query outcomes from the negotiator
// - completions of connect / disconnect / auto-connect / recording requests
//
// After every message the task publishes a fresh `SessionSnapshot` on a watch
// channel. Replies to commands are sent after that publish, so a caller that
// awaits a command observes its effect in the next snapshot it reads.

mod snapshot;

use crate::alert::{AlertPlayer, AlertProcedure};
use crate::config::MonitorConfig;
use crate::connection::ConnectionStateMachine;
use crate::error::{
    ConnectionError, NegotiationError, Result, SessionError, TransportError, TransportResult,
};
use crate::logger::{LogRecord, SampleLogger, WriteFailureReporter};
use crate::negotiator::{NegotiationOutcome, SettingsNegotiator};
use crate::streaming::{decode_frame, StreamMessage, StreamOutcome, StreamingSession};
use crate::transport::{RawFrame, SensorTransport, TransportEvent};
use crate::types::{
    ConnectionState, DeviceHandle, EcgSample, HeartRateSample, RecordingStatus, SamplePayload,
    StreamConfiguration, StreamKind, StreamSettings,
};
use chrono::Local;
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

pub use snapshot::{MessageLevel, OperatorMessage, SessionSnapshot};

/// Operator messages buffered per subscriber before the oldest are dropped
const MESSAGE_QUEUE_CAPACITY: usize = 128;

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Connect(Option<DeviceHandle>),
    Disconnect,
    AutoConnect {
        rssi_threshold: i16,
    },
    DismissAlert,
    RequestStreamSettings {
        kind: StreamKind,
        accepted: Reply<()>,
        completion: Option<oneshot::Sender<std::result::Result<StreamSettings, NegotiationError>>>,
    },
    StartStream {
        config: StreamConfiguration,
        reply: Reply<()>,
    },
    StopStream {
        kind: StreamKind,
        reply: oneshot::Sender<bool>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Completions of transport requests issued by the session
enum TaskMessage {
    /// Connect request resolved; the link state itself follows from events
    ConnectEnded {
        device: DeviceHandle,
        result: TransportResult<()>,
    },
    DisconnectFailed {
        device: DeviceHandle,
        error: TransportError,
    },
    AutoConnectEnded {
        generation: u64,
        result: TransportResult<()>,
    },
    RecordingStatus {
        device: DeviceHandle,
        result: TransportResult<RecordingStatus>,
    },
}

/// Cloneable handle to a running device session
#[derive(Clone)]
pub struct DeviceSessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionSnapshot>,
    messages: broadcast::Sender<OperatorMessage>,
    rssi_threshold: i16,
}

impl DeviceSessionHandle {
    /// Start the session owner task on the current tokio runtime.
    ///
    /// Installs the session's event sink on `transport`.
    pub fn spawn(
        config: MonitorConfig,
        transport: Arc<dyn SensorTransport>,
        player: Arc<dyn AlertPlayer>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        let (negotiation_tx, negotiation_rx) = mpsc::unbounded_channel();
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (messages, _) = broadcast::channel(MESSAGE_QUEUE_CAPACITY);

        transport.set_event_sink(event_tx);

        let connection =
            ConnectionStateMachine::new(transport.is_powered(), config.recording_models.clone());
        let initial = SessionSnapshot {
            is_bluetooth_on: connection.is_bluetooth_on(),
            ..Default::default()
        };
        let (state_tx, state_rx) = watch::channel(initial);

        let session = DeviceSession {
            streams: StreamingSession::new(Arc::clone(&transport), config.frame_queue_capacity),
            negotiator: SettingsNegotiator::new(
                Arc::clone(&transport),
                config.negotiation_timeout,
            ),
            logger: SampleLogger::new(config.log_dir.clone()),
            write_failures: WriteFailureReporter::new(config.log_error_notice_interval),
            alerts: AlertProcedure::new(player, config.alert.clone()),
            connection,
            transport,
            connect_pending: None,
            auto_connect: None,
            auto_connect_generation: 0,
            settings_waiter: None,
            latest_heart_rate: None,
            latest_ecg: None,
            shutdown: CancellationToken::new(),
            state_tx,
            messages: messages.clone(),
            stream_tx,
            negotiation_tx,
            task_tx,
            config: config.clone(),
        };

        log::info!(
            "Device session started (sample logs in {})",
            config.log_dir.display()
        );
        tokio::spawn(session.run(command_rx, event_rx, stream_rx, negotiation_rx, task_rx));

        Self {
            commands: command_tx,
            state: state_rx,
            messages,
            rssi_threshold: config.rssi_threshold,
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }

    /// Connect to the configured or last connected device.
    ///
    /// Failures are reported through operator messages and the published
    /// connection state, not returned.
    pub fn connect(&self) -> Result<()> {
        self.send(Command::Connect(None))
    }

    pub fn connect_to(&self, device: DeviceHandle) -> Result<()> {
        self.send(Command::Connect(Some(device)))
    }

    pub fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect)
    }

    /// Start a transport-managed search with the configured signal threshold,
    /// replacing any search still running.
    pub fn auto_connect(&self) -> Result<()> {
        self.auto_connect_with(self.rssi_threshold)
    }

    pub fn auto_connect_with(&self, rssi_threshold: i16) -> Result<()> {
        self.send(Command::AutoConnect { rssi_threshold })
    }

    pub fn dismiss_alert(&self) -> Result<()> {
        self.send(Command::DismissAlert)
    }

    /// Ask the device for the settings of `kind`. Returns once the query is
    /// issued; the candidate set is published when it resolves.
    pub async fn request_stream_settings(&self, kind: StreamKind) -> Result<()> {
        let (accepted, rx) = oneshot::channel();
        self.send(Command::RequestStreamSettings {
            kind,
            accepted,
            completion: None,
        })?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Query the settings of `kind` and wait for the answer.
    pub async fn negotiate(&self, kind: StreamKind) -> Result<StreamSettings> {
        let (accepted, accepted_rx) = oneshot::channel();
        let (completion, completion_rx) = oneshot::channel();
        self.send(Command::RequestStreamSettings {
            kind,
            accepted,
            completion: Some(completion),
        })?;
        accepted_rx.await.map_err(|_| SessionError::Closed)??;
        Ok(completion_rx.await.map_err(|_| SessionError::Closed)??)
    }

    /// Open a stream. `Ok` means the stream is `Active`, not that data arrived.
    pub async fn start_stream(&self, config: StreamConfiguration) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::StartStream { config, reply })?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Stop the stream of `kind`. Returns whether one was active.
    ///
    /// Nothing from the stopped stream is applied once this returns.
    pub async fn stop_stream(&self, kind: StreamKind) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::StopStream { kind, reply })?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub fn is_stream_active(&self, kind: StreamKind) -> bool {
        self.state.borrow().is_stream_active(kind)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Change notifications for the published snapshot
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }

    pub fn messages(&self) -> broadcast::Receiver<OperatorMessage> {
        self.messages.subscribe()
    }

    /// Stop all streams and pending requests and end the owner task.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply }).is_ok() {
            rx.await.ok();
        }
    }
}

struct PendingSearch {
    generation: u64,
    cancel: CancellationToken,
}

struct SettingsWaiter {
    generation: u64,
    kind: StreamKind,
    reply: oneshot::Sender<std::result::Result<StreamSettings, NegotiationError>>,
}

struct DeviceSession {
    config: MonitorConfig,
    transport: Arc<dyn SensorTransport>,

    connection: ConnectionStateMachine,
    streams: StreamingSession,
    negotiator: SettingsNegotiator,
    logger: SampleLogger,
    write_failures: WriteFailureReporter,
    alerts: AlertProcedure,

    connect_pending: Option<DeviceHandle>,
    auto_connect: Option<PendingSearch>,
    auto_connect_generation: u64,
    settings_waiter: Option<SettingsWaiter>,
    latest_heart_rate: Option<HeartRateSample>,
    latest_ecg: Option<EcgSample>,

    /// Cancels link requests still in flight when the session ends
    shutdown: CancellationToken,

    state_tx: watch::Sender<SessionSnapshot>,
    messages: broadcast::Sender<OperatorMessage>,
    stream_tx: mpsc::UnboundedSender<StreamMessage>,
    negotiation_tx: mpsc::UnboundedSender<NegotiationOutcome>,
    task_tx: mpsc::UnboundedSender<TaskMessage>,
}

impl DeviceSession {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut stream_rx: mpsc::UnboundedReceiver<StreamMessage>,
        mut negotiation_rx: mpsc::UnboundedReceiver<NegotiationOutcome>,
        mut task_rx: mpsc::UnboundedReceiver<TaskMessage>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.close();
                        self.publish();
                        reply.send(()).ok();
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.close();
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event),
                Some(message) = stream_rx.recv() => self.handle_stream(message),
                Some(outcome) = negotiation_rx.recv() => self.handle_negotiation(outcome),
                Some(message) = task_rx.recv() => self.handle_task(message),
            }
            self.publish();
        }
        log::info!("Device session stopped");
    }

    fn publish(&self) {
        let caps = self.connection.capabilities();
        let mut next = SessionSnapshot {
            connection: self.connection.state().clone(),
            is_device_connected: self.connection.is_device_connected(),
            is_bluetooth_on: self.connection.is_bluetooth_on(),
            auto_connect_active: self.auto_connect.is_some(),
            active_streams: self.streams.active_kinds(),
            stream_settings: self.negotiator.settings().cloned(),
            negotiating: self.negotiator.pending_kind(),
            latest_heart_rate: self.latest_heart_rate.clone(),
            latest_ecg: self.latest_ecg.clone(),
            alert_active: self.alerts.is_alarm_active(),
            log_write_failures: self.write_failures.total(),
            ..Default::default()
        };
        next.set_capabilities(caps);

        self.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn notify(&self, message: OperatorMessage) {
        // No subscribers is fine
        self.messages.send(message).ok();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(device) => self.connect(device),
            Command::Disconnect => self.disconnect(),
            Command::AutoConnect { rssi_threshold } => self.auto_connect(rssi_threshold),
            Command::DismissAlert => self.alerts.dismiss(),
            Command::RequestStreamSettings {
                kind,
                accepted,
                completion,
            } => {
                let result = self.request_stream_settings(kind, completion);
                self.publish();
                accepted.send(result).ok();
            }
            Command::StartStream { config, reply } => {
                let result = self.start_stream(config);
                self.publish();
                reply.send(result).ok();
            }
            Command::StopStream { kind, reply } => {
                let stopped = self.streams.stop(kind);
                self.publish();
                reply.send(stopped).ok();
            }
            Command::Shutdown { .. } => {}
        }
    }

    fn ensure_radio(&self) -> std::result::Result<(), ConnectionError> {
        if self.connection.is_bluetooth_on() {
            Ok(())
        } else {
            Err(ConnectionError::RadioOff)
        }
    }

    fn reject(&self, action: &str, error: ConnectionError) {
        log::warn!("{} refused: {}", action, error);
        self.notify(OperatorMessage::error(format!("{}: {}", action, error)));
    }

    fn connect(&mut self, explicit: Option<DeviceHandle>) {
        if let Err(e) = self.ensure_radio() {
            return self.reject("Connect", e);
        }
        if self.connection.state() != &ConnectionState::Disconnected {
            log::debug!("Connect ignored while {}", self.connection.state());
            return;
        }
        if let Some(device) = &self.connect_pending {
            log::debug!("Connect to {} already requested", device);
            return;
        }

        let Some(device) = explicit
            .or_else(|| self.config.device_id.clone())
            .or_else(|| self.connection.last_device().cloned())
        else {
            return self.reject("Connect", ConnectionError::NoTarget);
        };

        log::info!("Requesting connection to {}", device);
        self.connect_pending = Some(device.clone());

        let transport = Arc::clone(&self.transport);
        let tasks = self.task_tx.clone();
        let shutdown = self.shutdown.clone();
        let timeout = self.config.connect_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                result = tokio::time::timeout(timeout, transport.connect(&device)) => {
                    let result = result.unwrap_or_else(|_| {
                        Err(TransportError::Timeout(format!(
                            "no answer within {:.1}s",
                            timeout.as_secs_f64()
                        )))
                    });
                    tasks.send(TaskMessage::ConnectEnded { device, result }).ok();
                }
            }
        });
    }

    fn disconnect(&mut self) {
        let Some(device) = self.connection.state().connected_device().cloned() else {
            log::debug!("Disconnect ignored while {}", self.connection.state());
            return;
        };
        if let Err(e) = self.ensure_radio() {
            return self.reject("Disconnect", e);
        }

        log::info!("Requesting disconnect from {}", device);
        let transport = Arc::clone(&self.transport);
        let tasks = self.task_tx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                result = transport.disconnect(&device) => {
                    if let Err(error) = result {
                        tasks.send(TaskMessage::DisconnectFailed { device, error }).ok();
                    }
                }
            }
        });
    }

    fn auto_connect(&mut self, rssi_threshold: i16) {
        if let Err(e) = self.ensure_radio() {
            return self.reject("Auto-connect", e);
        }
        if self.connection.state() != &ConnectionState::Disconnected {
            log::debug!("Auto-connect ignored while {}", self.connection.state());
            return;
        }

        if let Some(previous) = self.auto_connect.take() {
            log::info!("Replacing running auto-connect search");
            previous.cancel.cancel();
        }

        self.auto_connect_generation += 1;
        let generation = self.auto_connect_generation;
        let cancel = CancellationToken::new();
        self.auto_connect = Some(PendingSearch {
            generation,
            cancel: cancel.clone(),
        });

        log::info!(
            "Auto-connect: searching for {:?} at {} dBm or better",
            self.config.device_types,
            rssi_threshold
        );

        let transport = Arc::clone(&self.transport);
        let device_types = self.config.device_types.clone();
        let tasks = self.task_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    log::debug!("Auto-connect search {} cancelled", generation);
                }

                result = transport.auto_connect(rssi_threshold, &device_types) => {
                    tasks.send(TaskMessage::AutoConnectEnded { generation, result }).ok();
                }
            }
        });
    }

    fn request_stream_settings(
        &mut self,
        kind: StreamKind,
        completion: Option<oneshot::Sender<std::result::Result<StreamSettings, NegotiationError>>>,
    ) -> Result<()> {
        let device = self
            .connection
            .state()
            .connected_device()
            .cloned()
            .ok_or(NegotiationError::NotConnected)?;
        self.ensure_radio()?;

        if let Some(waiter) = self.settings_waiter.take() {
            waiter
                .reply
                .send(Err(NegotiationError::Superseded(waiter.kind)))
                .ok();
        }

        let generation = self
            .negotiator
            .begin(device, kind, self.negotiation_tx.clone());
        if let Some(reply) = completion {
            self.settings_waiter = Some(SettingsWaiter {
                generation,
                kind,
                reply,
            });
        }
        Ok(())
    }

    fn start_stream(&mut self, config: StreamConfiguration) -> Result<()> {
        self.ensure_radio()?;
        let kind = config.kind;
        let connected = self.connection.state().connected_device().cloned();
        self.streams
            .start(connected.as_ref(), config, self.stream_tx.clone())
            .map_err(|e| {
                log::warn!("Cannot start {} stream: {}", kind, e);
                SessionError::from(e)
            })
    }

    fn handle_event(&mut self, event: TransportEvent) {
        let event = match event {
            TransportEvent::HeartRatePush { device, frame } => {
                if self.connection.state().connected_device() == Some(&device) {
                    // An open HR stream already logs every beat
                    let persist = self.streams.stream_device(StreamKind::HeartRate) != Some(&device);
                    self.apply_frame(StreamKind::HeartRate, &device, frame, persist);
                } else {
                    log::debug!("Ignoring heart rate pushed by {}", device);
                }
                return;
            }
            other => other,
        };

        let transition = self.connection.apply(&event);

        match &event {
            TransportEvent::DeviceConnecting(_) => self.connect_pending = None,
            TransportEvent::DeviceConnected(info) => {
                self.connect_pending = None;
                self.notify(OperatorMessage::info(format!(
                    "Connected to {} ({})",
                    info.name, info.handle
                )));
            }
            TransportEvent::DeviceDisconnected(info) => {
                self.connect_pending = None;
                self.notify(OperatorMessage::error(format!(
                    "Device {} disconnected",
                    info.handle
                )));
            }
            _ => {}
        }

        if transition.dismiss_alarm {
            self.alerts.dismiss();
        }
        if let Some(device) = transition.link_lost {
            self.link_lost(&device);
        }
        if transition.raise_alarm {
            self.alerts.connection_lost();
        }
        if let Some(device) = transition.query_recording {
            self.query_recording_status(device);
        }
    }

    /// Tear down everything bound to the lost link
    fn link_lost(&mut self, device: &DeviceHandle) {
        let stopped = self.streams.stop_all();
        if !stopped.is_empty() {
            let kinds: Vec<String> = stopped.iter().map(|k| k.to_string()).collect();
            log::warn!("Link to {} lost, stopped {} streams", device, kinds.join(", "));
            self.notify(OperatorMessage::error(format!(
                "Stopped {} streams: device disconnected",
                kinds.join(", ")
            )));
        }

        if let Some(kind) = self.negotiator.reset() {
            log::warn!("{} settings query abandoned, link to {} lost", kind, device);
            self.notify(OperatorMessage::error(format!(
                "{} settings query cancelled: device disconnected",
                kind
            )));
        }
        if let Some(waiter) = self.settings_waiter.take() {
            waiter
                .reply
                .send(Err(NegotiationError::Disconnected(waiter.kind)))
                .ok();
        }
    }

    fn query_recording_status(&self, device: DeviceHandle) {
        log::debug!("Querying recording status of {}", device);
        let transport = Arc::clone(&self.transport);
        let tasks = self.task_tx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                result = transport.recording_status(&device) => {
                    tasks.send(TaskMessage::RecordingStatus { device, result }).ok();
                }
            }
        });
    }

    fn handle_stream(&mut self, message: StreamMessage) {
        match message {
            StreamMessage::Frame {
                kind,
                generation,
                frame,
            } => {
                if !self.streams.accepts(kind, generation) {
                    log::debug!("Dropping {} frame from a stopped stream", kind);
                    return;
                }
                if let Some(device) = self.streams.stream_device(kind).cloned() {
                    self.apply_frame(kind, &device, frame, true);
                }
            }
            StreamMessage::Ended {
                kind,
                generation,
                result,
            } => match self.streams.finish(kind, generation, result) {
                None => {}
                Some(StreamOutcome::Completed(kind)) => {
                    self.notify(OperatorMessage::info(format!("{} stream ended", kind)));
                }
                Some(StreamOutcome::Failed(error)) => {
                    self.alerts.stream_failed(kind);
                    self.notify(OperatorMessage::error(error.to_string()));
                }
            },
        }
    }

    /// Decode one frame, append it to the sample log when `persist` is set
    /// and publish it as the latest value.
    fn apply_frame(
        &mut self,
        kind: StreamKind,
        device: &DeviceHandle,
        frame: RawFrame,
        persist: bool,
    ) {
        let sample = match decode_frame(kind, frame, Local::now()) {
            Ok(sample) => sample,
            Err(e) => {
                log::warn!("Dropping malformed {} frame from {}: {}", kind, device, e);
                return;
            }
        };

        if persist {
            self.append_record(&LogRecord::from_sample(&sample, device));
        }

        match sample.payload {
            SamplePayload::HeartRate(hr) => {
                log::debug!("HR {} bpm {:?}", hr.bpm, hr.rr_intervals_ms);
                self.latest_heart_rate = Some(hr);
            }
            SamplePayload::Ecg(ecg) => {
                log::debug!("ECG frame of {} samples", ecg.samples.len());
                self.latest_ecg = Some(ecg);
            }
        }
    }

    fn append_record(&mut self, record: &LogRecord) {
        // Keep other tasks on this worker moving while the append syncs
        let multi_thread = Handle::try_current()
            .is_ok_and(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread);
        let result = if multi_thread {
            tokio::task::block_in_place(|| self.logger.append(record))
        } else {
            self.logger.append(record)
        };

        if let Err(error) = result {
            log::error!("{}", error);
            if let Some(text) = self.write_failures.record(&error) {
                self.notify(OperatorMessage::error(text));
            }
        }
    }

    fn handle_negotiation(&mut self, outcome: NegotiationOutcome) {
        let generation = outcome.generation;
        let kind = outcome.kind;
        let Some(result) = self.negotiator.complete(outcome) else {
            return;
        };

        match &result {
            Ok(settings) => {
                let summary: Vec<String> = settings
                    .options
                    .iter()
                    .map(|o| format!("{} {:?}", o.setting, o.sorted_values()))
                    .collect();
                log::info!("{} settings: {}", kind, summary.join(", "));
            }
            Err(e) => {
                log::error!("{} settings query failed: {}", kind, e);
                self.notify(OperatorMessage::error(e.to_string()));
            }
        }

        if self
            .settings_waiter
            .as_ref()
            .is_some_and(|w| w.generation == generation)
        {
            if let Some(waiter) = self.settings_waiter.take() {
                self.publish();
                waiter.reply.send(result).ok();
            }
        }
    }

    fn handle_task(&mut self, message: TaskMessage) {
        match message {
            TaskMessage::ConnectEnded { device, result } => {
                if self.connect_pending.as_ref() == Some(&device) {
                    self.connect_pending = None;
                }
                match result {
                    Ok(()) => log::debug!("Connect request to {} finished", device),
                    Err(error) => {
                        log::error!("Connection to {} failed: {}", device, error);
                        self.notify(OperatorMessage::error(format!(
                            "Failed to connect to {}: {}",
                            device, error
                        )));
                    }
                }
            }
            TaskMessage::DisconnectFailed { device, error } => {
                log::error!("Disconnect from {} failed: {}", device, error);
                self.notify(OperatorMessage::error(format!(
                    "Failed to disconnect from {}: {}",
                    device, error
                )));
            }
            TaskMessage::AutoConnectEnded { generation, result } => {
                if !self
                    .auto_connect
                    .as_ref()
                    .is_some_and(|s| s.generation == generation)
                {
                    log::debug!("Ignoring end of replaced auto-connect search {}", generation);
                    return;
                }
                self.auto_connect = None;
                match result {
                    Ok(()) => log::info!("Auto-connect search finished"),
                    Err(e) => {
                        log::error!("Auto-connect failed: {}", e);
                        self.notify(OperatorMessage::error(format!("Auto-connect failed: {}", e)));
                    }
                }
            }
            TaskMessage::RecordingStatus { device, result } => match result {
                Ok(status) => {
                    log::info!(
                        "Recording on {}: {} ({})",
                        device,
                        if status.ongoing { "ongoing" } else { "idle" },
                        status.entry_id
                    );
                    self.connection.set_recording_status(&device, status);
                }
                Err(e) => log::warn!("Recording status of {} unavailable: {}", device, e),
            },
        }
    }

    fn close(&mut self) {
        if let Some(search) = self.auto_connect.take() {
            search.cancel.cancel();
        }
        self.streams.stop_all();
        self.negotiator.reset();
        self.alerts.dismiss();
        self.shutdown.cancel();
    }
}
