use super::{connect, load_config, start_session};
use crate::cli::{seconds, MonitorArgs};
use crate::exit_codes;
use crate::output;
use pshr_monitor::{
    EcgSample, HeartRateSample, OperatorMessage, SessionSnapshot, StreamKind,
};
use serde::Serialize;
use std::future::pending;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::{sleep_until, Instant};

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum MonitorEvent<'a> {
    Connected {
        device: String,
    },
    StreamStarted {
        kind: StreamKind,
    },
    HeartRate {
        bpm: u16,
        rr_intervals_ms: &'a [u16],
    },
    Ecg {
        device_timestamp: u64,
        samples: usize,
    },
    Battery {
        percent: u8,
    },
    Message {
        message: &'a OperatorMessage,
    },
    Summary {
        log_dir: String,
        snapshot: &'a SessionSnapshot,
    },
}

/// Prints new values as they are published
struct Printer {
    json: bool,
    last_hr: Option<HeartRateSample>,
    last_ecg: Option<u64>,
    last_battery: Option<u8>,
}

impl Printer {
    fn new(json: bool) -> Self {
        Self {
            json,
            last_hr: None,
            last_ecg: None,
            last_battery: None,
        }
    }

    fn emit(&self, event: &MonitorEvent<'_>, text: impl FnOnce() -> String) {
        let result = if self.json {
            output::print_json_line(event)
        } else {
            output::write_line(&text())
        };
        if let Err(e) = result {
            log::error!("{}", e);
        }
    }

    fn snapshot(&mut self, snapshot: &SessionSnapshot) {
        if snapshot.battery_percent != self.last_battery {
            self.last_battery = snapshot.battery_percent;
            if let Some(percent) = snapshot.battery_percent {
                self.emit(&MonitorEvent::Battery { percent }, || {
                    snapshot.battery_message().unwrap_or_default()
                });
            }
        }

        if snapshot.latest_heart_rate != self.last_hr {
            self.last_hr = snapshot.latest_heart_rate.clone();
            if let Some(hr) = &snapshot.latest_heart_rate {
                self.emit(
                    &MonitorEvent::HeartRate {
                        bpm: hr.bpm,
                        rr_intervals_ms: &hr.rr_intervals_ms,
                    },
                    || snapshot.hr_message().unwrap_or_default(),
                );
            }
        }

        let ecg_timestamp = snapshot.latest_ecg.as_ref().map(|e| e.device_timestamp);
        if ecg_timestamp != self.last_ecg {
            self.last_ecg = ecg_timestamp;
            if let Some(EcgSample {
                device_timestamp,
                samples,
            }) = &snapshot.latest_ecg
            {
                self.emit(
                    &MonitorEvent::Ecg {
                        device_timestamp: *device_timestamp,
                        samples: samples.len(),
                    },
                    || snapshot.ecg_message().unwrap_or_default(),
                );
            }
        }
    }

    fn message(&self, message: &OperatorMessage) {
        self.emit(&MonitorEvent::Message { message }, || message.to_string());
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}

pub async fn execute(args: MonitorArgs) -> i32 {
    let config = match load_config(&args.connect, args.log_dir.clone()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::CONFIG_ERROR;
        }
    };
    let deadline = match args.duration.map(seconds).transpose() {
        Ok(duration) => duration,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::CONFIG_ERROR;
        }
    };
    let log_dir = config.log_dir.display().to_string();

    let mut session = start_session(config.clone(), &args.sim, args.bell);
    let mut printer = Printer::new(args.json);

    let device = match connect(&mut session, &args.connect, &config).await {
        Ok(device) => device,
        Err(e) => {
            eprintln!("Error: {}", e);
            session.handle.shutdown().await;
            return exit_codes::CONNECTION_ERROR;
        }
    };
    printer.emit(
        &MonitorEvent::Connected {
            device: device.to_string(),
        },
        || format!("Connected to {}", device),
    );

    for kind in &args.streams {
        let started = match session.handle.negotiate(*kind).await {
            Ok(settings) => {
                session
                    .handle
                    .start_stream(settings.default_configuration())
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            eprintln!("Error: Cannot start {} stream: {}", kind, e);
            session.handle.shutdown().await;
            return exit_codes::STREAM_ERROR;
        }
        printer.emit(&MonitorEvent::StreamStarted { kind: *kind }, || {
            format!("{} stream started, logging to {}", kind, log_dir)
        });
    }

    let mut state = session.handle.subscribe();
    let stop_at = until(deadline.map(|d| Instant::now() + d));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(stop_at);
    tokio::pin!(ctrl_c);

    let exit_code = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                log::info!("Interrupted");
                break exit_codes::SUCCESS;
            }
            _ = &mut stop_at => break exit_codes::SUCCESS,
            changed = state.changed() => {
                if changed.is_err() {
                    break exit_codes::EXECUTION_ERROR;
                }
                let snapshot = state.borrow_and_update().clone();
                printer.snapshot(&snapshot);
                if !snapshot.is_device_connected {
                    break exit_codes::LINK_LOST;
                }
            }
            message = session.messages.recv() => {
                if let Ok(message) = message {
                    printer.message(&message);
                }
            }
        }
    };

    for kind in &args.streams {
        session.handle.stop_stream(*kind).await.ok();
    }
    loop {
        match session.messages.try_recv() {
            Ok(message) => printer.message(&message),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }

    let snapshot = session.handle.snapshot();
    printer.emit(
        &MonitorEvent::Summary {
            log_dir: log_dir.clone(),
            snapshot: &snapshot,
        },
        || {
            let mut text = format!("Samples logged to {}", log_dir);
            if snapshot.log_write_failures > 0 {
                text.push_str(&format!(
                    " ({} log writes failed)",
                    snapshot.log_write_failures
                ));
            }
            if exit_code == exit_codes::LINK_LOST {
                text.push_str("\nMonitoring ended: device disconnected");
            }
            text
        },
    );

    session.handle.shutdown().await;
    exit_code
}
