// Operator alerts
//
// The core only issues playback intents; an `AlertPlayer` owns the actual
// sound / haptic hardware and must return from every call immediately,
// scheduling repeats on its own.
//
// Two procedures:
// - connection loss: looping alarm plus a fixed train of vibration pulses,
//   restarted (never stacked) on every further disconnect
// - stream failure: two tones with a fixed delay, while still connected

use crate::config::{AlertConfig, STREAM_ERROR_TONE_REPEATS};
use crate::types::StreamKind;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sound / haptic output
pub trait AlertPlayer: Send + Sync {
    /// Start looping `sound` until [`AlertPlayer::stop_looping`]
    fn play_looping(&self, sound: &str);

    fn stop_looping(&self);

    /// Play the alert tone `count` times, `interval` apart
    fn play_tone(&self, count: u32, interval: Duration);

    /// Vibrate `count` times, `interval` apart
    fn vibrate(&self, count: u32, interval: Duration);
}

pub struct AlertProcedure {
    player: Arc<dyn AlertPlayer>,
    config: AlertConfig,
    alarm_active: bool,
}

impl AlertProcedure {
    pub fn new(player: Arc<dyn AlertPlayer>, config: AlertConfig) -> Self {
        Self {
            player,
            config,
            alarm_active: false,
        }
    }

    pub fn is_alarm_active(&self) -> bool {
        self.alarm_active
    }

    /// Raise the connection-loss alarm. A still-sounding alarm is restarted.
    pub fn connection_lost(&mut self) {
        if self.alarm_active {
            self.player.stop_looping();
        }
        log::warn!("Connection lost, raising alarm");
        self.player.play_looping(&self.config.alarm_sound);
        self.player
            .vibrate(self.config.vibration_pulses, self.config.vibration_interval);
        self.alarm_active = true;
    }

    /// Stop the looping alarm, if any
    pub fn dismiss(&mut self) {
        if self.alarm_active {
            log::info!("Alarm dismissed");
            self.player.stop_looping();
            self.alarm_active = false;
        }
    }

    pub fn stream_failed(&self, kind: StreamKind) {
        log::warn!("{} stream failed, sounding alert tones", kind);
        self.player
            .play_tone(STREAM_ERROR_TONE_REPEATS, self.config.tone_interval);
    }
}

/// Renders alert intents as log lines (and a terminal bell) on background
/// tasks. Needs a running tokio runtime.
#[derive(Default)]
pub struct LogAlertPlayer {
    bell: bool,
    looping: parking_lot::Mutex<Option<CancellationToken>>,
}

impl LogAlertPlayer {
    pub fn new(bell: bool) -> Self {
        Self {
            bell,
            looping: parking_lot::Mutex::new(None),
        }
    }

    fn ring(bell: bool) {
        if bell {
            eprint!("\x07");
        }
    }

    fn pulses(&self, what: &'static str, count: u32, interval: Duration) {
        let bell = self.bell;
        tokio::spawn(async move {
            for i in 1..=count {
                log::warn!("{} {}/{}", what, i, count);
                Self::ring(bell);
                if i < count {
                    tokio::time::sleep(interval).await;
                }
            }
        });
    }
}

impl AlertPlayer for LogAlertPlayer {
    fn play_looping(&self, sound: &str) {
        let token = CancellationToken::new();
        if let Some(previous) = self.looping.lock().replace(token.clone()) {
            previous.cancel();
        }

        let sound = sound.to_string();
        let bell = self.bell;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(2));
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {
                        log::warn!("ALARM ({}): device connection lost", sound);
                        Self::ring(bell);
                    }
                }
            }
        });
    }

    fn stop_looping(&self) {
        if let Some(token) = self.looping.lock().take() {
            token.cancel();
        }
    }

    fn play_tone(&self, count: u32, interval: Duration) {
        self.pulses("Alert tone", count, interval);
    }

    fn vibrate(&self, count: u32, interval: Duration) {
        self.pulses("Vibration pulse", count, interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Loop(String),
        StopLoop,
        Tone(u32, Duration),
        Vibrate(u32, Duration),
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Call>>);

    impl AlertPlayer for Recorder {
        fn play_looping(&self, sound: &str) {
            self.0.lock().push(Call::Loop(sound.to_string()));
        }
        fn stop_looping(&self) {
            self.0.lock().push(Call::StopLoop);
        }
        fn play_tone(&self, count: u32, interval: Duration) {
            self.0.lock().push(Call::Tone(count, interval));
        }
        fn vibrate(&self, count: u32, interval: Duration) {
            self.0.lock().push(Call::Vibrate(count, interval));
        }
    }

    #[test]
    fn test_connection_lost_restarts_instead_of_stacking() {
        let recorder = Arc::new(Recorder::default());
        let config = AlertConfig::default();
        let mut alerts = AlertProcedure::new(recorder.clone(), config.clone());

        alerts.connection_lost();
        alerts.connection_lost();

        let calls = recorder.0.lock().clone();
        assert_eq!(
            calls,
            vec![
                Call::Loop(config.alarm_sound.clone()),
                Call::Vibrate(config.vibration_pulses, config.vibration_interval),
                Call::StopLoop,
                Call::Loop(config.alarm_sound.clone()),
                Call::Vibrate(config.vibration_pulses, config.vibration_interval),
            ]
        );
        assert!(alerts.is_alarm_active());
    }

    #[test]
    fn test_dismiss_is_idempotent() {
        let recorder = Arc::new(Recorder::default());
        let mut alerts = AlertProcedure::new(recorder.clone(), AlertConfig::default());

        alerts.dismiss();
        alerts.connection_lost();
        alerts.dismiss();
        alerts.dismiss();

        let stops = recorder
            .0
            .lock()
            .iter()
            .filter(|c| **c == Call::StopLoop)
            .count();
        assert_eq!(stops, 1);
        assert!(!alerts.is_alarm_active());
    }

    #[test]
    fn test_stream_failure_plays_two_tones() {
        let recorder = Arc::new(Recorder::default());
        let config = AlertConfig::default();
        let alerts = AlertProcedure::new(recorder.clone(), config.clone());

        alerts.stream_failed(StreamKind::Ecg);

        assert_eq!(
            recorder.0.lock().clone(),
            vec![Call::Tone(2, config.tone_interval)]
        );
    }
}
