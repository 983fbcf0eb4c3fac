// Stream settings negotiation
//
// Asks the connected device which values it accepts for each parameter of a
// stream kind. At most one query is outstanding: a new request cancels the
// previous one, and a result that arrives for a superseded query is ignored.

use crate::error::NegotiationError;
use crate::transport::SensorTransport;
use crate::types::{DeviceHandle, SettingType, StreamKind, StreamSettingOption, StreamSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Result of one settings query, tagged with the request it answers
#[derive(Debug, Clone)]
pub struct NegotiationOutcome {
    pub generation: u64,
    pub kind: StreamKind,
    pub result: Result<StreamSettings, NegotiationError>,
}

/// Turn the device's raw parameter -> candidates mapping into options.
///
/// Every candidate is kept in device order; a parameter without candidates
/// makes the whole answer invalid.
pub fn decode_settings(
    kind: StreamKind,
    raw: Vec<(SettingType, Vec<u32>)>,
) -> Result<StreamSettings, NegotiationError> {
    let mut options = Vec::with_capacity(raw.len());
    for (setting, values) in raw {
        if values.is_empty() {
            return Err(NegotiationError::EmptyCandidates(setting));
        }
        options.push(StreamSettingOption { setting, values });
    }
    Ok(StreamSettings { kind, options })
}

/// Query and decode the settings for `kind`, bounded by `timeout`.
pub async fn negotiate(
    transport: &dyn SensorTransport,
    device: &DeviceHandle,
    kind: StreamKind,
    timeout: Duration,
) -> Result<StreamSettings, NegotiationError> {
    let raw = tokio::time::timeout(timeout, transport.query_stream_settings(device, kind))
        .await
        .map_err(|_| NegotiationError::Timeout(kind))??;
    decode_settings(kind, raw)
}

struct PendingQuery {
    generation: u64,
    kind: StreamKind,
    cancel: CancellationToken,
}

pub struct SettingsNegotiator {
    transport: Arc<dyn SensorTransport>,
    timeout: Duration,
    pending: Option<PendingQuery>,
    next_generation: u64,
    settings: Option<StreamSettings>,
}

impl SettingsNegotiator {
    pub fn new(transport: Arc<dyn SensorTransport>, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            pending: None,
            next_generation: 0,
            settings: None,
        }
    }

    /// Latest successfully negotiated candidate set
    pub fn settings(&self) -> Option<&StreamSettings> {
        self.settings.as_ref()
    }

    pub fn pending_kind(&self) -> Option<StreamKind> {
        self.pending.as_ref().map(|p| p.kind)
    }

    /// Start a query; any outstanding one is cancelled first.
    pub fn begin(
        &mut self,
        device: DeviceHandle,
        kind: StreamKind,
        results: mpsc::UnboundedSender<NegotiationOutcome>,
    ) -> u64 {
        if let Some(previous) = self.pending.take() {
            log::info!(
                "{} settings query superseded by {} query",
                previous.kind,
                kind
            );
            previous.cancel.cancel();
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = CancellationToken::new();
        self.pending = Some(PendingQuery {
            generation,
            kind,
            cancel: cancel.clone(),
        });

        let transport = Arc::clone(&self.transport);
        let timeout = self.timeout;
        log::debug!("Querying {} settings from {}", kind, device);

        tokio::spawn(async move {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    log::debug!("{} settings query cancelled", kind);
                }

                result = negotiate(transport.as_ref(), &device, kind, timeout) => {
                    let outcome = NegotiationOutcome { generation, kind, result };
                    if results.send(outcome).is_err() {
                        log::debug!("Session closed before {} settings arrived", kind);
                    }
                }
            }
        });

        generation
    }

    /// Apply a finished query. Returns `None` for superseded or cancelled ones.
    pub fn complete(
        &mut self,
        outcome: NegotiationOutcome,
    ) -> Option<Result<StreamSettings, NegotiationError>> {
        match &self.pending {
            Some(pending) if pending.generation == outcome.generation => {}
            _ => {
                log::debug!("Dropping stale {} settings result", outcome.kind);
                return None;
            }
        }
        self.pending = None;

        match outcome.result {
            Ok(settings) => {
                self.settings = Some(settings.clone());
                Some(Ok(settings))
            }
            Err(e) => {
                self.settings = None;
                Some(Err(e))
            }
        }
    }

    /// Cancel an outstanding query and forget the candidate set.
    /// Returns the kind that was being queried, if any.
    pub fn reset(&mut self) -> Option<StreamKind> {
        self.settings = None;
        self.pending.take().map(|pending| {
            pending.cancel.cancel();
            pending.kind
        })
    }
}
