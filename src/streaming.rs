// Streaming session - lifecycle of the open data streams, one per kind
//
// Idle --start--> Active --stop / completion / error--> Idle
//
// `start` flips the kind to Active as soon as the transport stream is opened,
// before any frame arrives. Each open stream runs as a pump task that forwards
// frames and the final outcome to the session owner, tagged with a generation
// number. `stop` cancels the pump and bumps nothing else: the owner drops any
// message whose generation is no longer current, so nothing from a stopped
// stream is applied after `stop` returns.

use crate::error::{DecodeError, StreamError, TransportResult};
use crate::transport::{RawFrame, SensorTransport};
use crate::types::{
    DeviceHandle, EcgSample, HeartRateSample, Sample, SamplePayload, SessionState,
    StreamConfiguration, StreamKind,
};
use chrono::{DateTime, Local};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Heart-rate samples keep at most this many RR intervals
pub const MAX_RR_INTERVALS: usize = 3;

/// Messages from stream pump tasks to the session owner
#[derive(Debug)]
pub enum StreamMessage {
    Frame {
        kind: StreamKind,
        generation: u64,
        frame: RawFrame,
    },
    Ended {
        kind: StreamKind,
        generation: u64,
        result: TransportResult<()>,
    },
}

/// How a stream that was still current came to an end
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Device ended the stream gracefully
    Completed(StreamKind),
    Failed(StreamError),
}

struct ActiveStream {
    id: String,
    generation: u64,
    device: DeviceHandle,
    cancel: CancellationToken,
    started_at: Instant,
}

pub struct StreamingSession {
    transport: Arc<dyn SensorTransport>,
    streams: BTreeMap<StreamKind, ActiveStream>,
    next_generation: u64,
    frame_queue_capacity: usize,
}

impl StreamingSession {
    pub fn new(transport: Arc<dyn SensorTransport>, frame_queue_capacity: usize) -> Self {
        Self {
            transport,
            streams: BTreeMap::new(),
            next_generation: 0,
            frame_queue_capacity: frame_queue_capacity.max(1),
        }
    }

    pub fn state(&self, kind: StreamKind) -> SessionState {
        if self.streams.contains_key(&kind) {
            SessionState::Active
        } else {
            SessionState::Idle
        }
    }

    pub fn is_active(&self, kind: StreamKind) -> bool {
        self.state(kind) == SessionState::Active
    }

    pub fn active_kinds(&self) -> BTreeSet<StreamKind> {
        self.streams.keys().copied().collect()
    }

    /// Device the active stream of `kind` was opened on
    pub fn stream_device(&self, kind: StreamKind) -> Option<&DeviceHandle> {
        self.streams.get(&kind).map(|s| &s.device)
    }

    /// Open a stream on the connected device.
    ///
    /// `connected` is the currently connected device, `None` when not connected.
    pub fn start(
        &mut self,
        connected: Option<&DeviceHandle>,
        config: StreamConfiguration,
        messages: mpsc::UnboundedSender<StreamMessage>,
    ) -> Result<(), StreamError> {
        let kind = config.kind;
        let device = connected.ok_or(StreamError::NotConnected)?.clone();
        if !kind.is_supported() {
            return Err(StreamError::Unsupported(kind));
        }
        if self.streams.contains_key(&kind) {
            return Err(StreamError::AlreadyActive(kind));
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = CancellationToken::new();
        let id = uuid::Uuid::new_v4().to_string();

        log::info!(
            "Starting {} stream {} on {} with {:?}",
            kind,
            id,
            device,
            config.selections
        );

        tokio::spawn(pump(
            Arc::clone(&self.transport),
            device.clone(),
            config,
            generation,
            self.frame_queue_capacity,
            cancel.clone(),
            messages,
        ));

        self.streams.insert(
            kind,
            ActiveStream {
                id,
                generation,
                device,
                cancel,
                started_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Cancel the stream of `kind` if one is open. Returns whether it was active.
    pub fn stop(&mut self, kind: StreamKind) -> bool {
        match self.streams.remove(&kind) {
            Some(stream) => {
                stream.cancel.cancel();
                log::info!(
                    "Stopped {} stream {} after {:.1}s",
                    kind,
                    stream.id,
                    stream.started_at.elapsed().as_secs_f64()
                );
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&mut self) -> Vec<StreamKind> {
        let kinds: Vec<StreamKind> = self.streams.keys().copied().collect();
        for kind in &kinds {
            self.stop(*kind);
        }
        kinds
    }

    /// Whether a message from `generation` belongs to the current stream of `kind`
    pub fn accepts(&self, kind: StreamKind, generation: u64) -> bool {
        self.streams
            .get(&kind)
            .is_some_and(|s| s.generation == generation)
    }

    /// Apply the end of a stream. Stale generations yield `None`.
    pub fn finish(
        &mut self,
        kind: StreamKind,
        generation: u64,
        result: TransportResult<()>,
    ) -> Option<StreamOutcome> {
        if !self.accepts(kind, generation) {
            return None;
        }
        let stream = self.streams.remove(&kind)?;
        stream.cancel.cancel();

        match result {
            Ok(()) => {
                log::info!("{} stream {} completed", kind, stream.id);
                Some(StreamOutcome::Completed(kind))
            }
            Err(source) => {
                log::error!("{} stream {} failed: {}", kind, stream.id, source);
                Some(StreamOutcome::Failed(StreamError::Transport { kind, source }))
            }
        }
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        for stream in self.streams.values() {
            stream.cancel.cancel();
        }
    }
}

/// Run one transport stream, forwarding frames and then its outcome.
async fn pump(
    transport: Arc<dyn SensorTransport>,
    device: DeviceHandle,
    config: StreamConfiguration,
    generation: u64,
    capacity: usize,
    cancel: CancellationToken,
    messages: mpsc::UnboundedSender<StreamMessage>,
) {
    let kind = config.kind;
    let (tx, mut rx) = mpsc::channel::<RawFrame>(capacity);
    let open = transport.open_stream(&device, &config, tx);
    tokio::pin!(open);

    let mut outcome: Option<TransportResult<()>> = None;
    let mut frames_open = true;

    while outcome.is_none() || frames_open {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                log::debug!("{} stream pump cancelled", kind);
                return;
            }

            frame = rx.recv(), if frames_open => match frame {
                Some(frame) => {
                    if messages.send(StreamMessage::Frame { kind, generation, frame }).is_err() {
                        return;
                    }
                }
                None => frames_open = false,
            },

            result = &mut open, if outcome.is_none() => {
                outcome = Some(result);
            }
        }
    }

    if let Some(result) = outcome {
        // Owner may already be gone during shutdown
        messages
            .send(StreamMessage::Ended {
                kind,
                generation,
                result,
            })
            .ok();
    }
}

/// Decode a transport frame received on a `kind` stream.
pub fn decode_frame(
    kind: StreamKind,
    frame: RawFrame,
    received_at: DateTime<Local>,
) -> Result<Sample, DecodeError> {
    if frame.kind() != kind {
        return Err(DecodeError::KindMismatch {
            expected: kind,
            actual: frame.kind(),
        });
    }

    let payload = match frame {
        RawFrame::HeartRate {
            bpm,
            rr_intervals_ms,
        } => {
            let bpm = u16::try_from(bpm)
                .ok()
                .filter(|bpm| *bpm <= 255)
                .ok_or(DecodeError::InvalidHeartRate(bpm))?;
            if rr_intervals_ms.len() > MAX_RR_INTERVALS {
                log::debug!(
                    "Keeping {} of {} RR intervals",
                    MAX_RR_INTERVALS,
                    rr_intervals_ms.len()
                );
            }
            let rr_intervals_ms = rr_intervals_ms
                .into_iter()
                .take(MAX_RR_INTERVALS)
                .map(|rr| u16::try_from(rr).map_err(|_| DecodeError::InvalidInterval(rr)))
                .collect::<Result<Vec<u16>, _>>()?;
            SamplePayload::HeartRate(HeartRateSample {
                bpm,
                rr_intervals_ms,
            })
        }
        RawFrame::Ecg { timestamp, samples } => {
            if samples.is_empty() {
                return Err(DecodeError::EmptyEcg);
            }
            SamplePayload::Ecg(EcgSample {
                device_timestamp: timestamp,
                samples,
            })
        }
    };

    Ok(Sample {
        received_at,
        payload,
    })
}
