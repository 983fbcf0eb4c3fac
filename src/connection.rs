// Connection state machine
//
//   Disconnected --connecting--> Connecting --connected--> Connected
//        ^                                                     |
//        +---------------------disconnected-------------------+
//
// Transitions are driven only by transport events. Each event sets the state
// its table entry names regardless of the current state; edges outside the
// nominal cycle are applied but logged, since event ordering is the
// transport's contract. Every disconnect event clears the device
// capabilities and asks for the connection-loss alarm.

use crate::transport::TransportEvent;
use crate::types::{ConnectionState, DeviceHandle, DeviceInfo, RecordingStatus, StreamKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What the device told us about itself while connected
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub recording_supported: bool,
    pub recording: Option<RecordingStatus>,
    pub supported_streams: BTreeSet<StreamKind>,
    pub battery_percent: Option<u8>,
    pub device_info: BTreeMap<String, String>,
}

/// Side effects the owner must carry out after applying an event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transition {
    pub changed: bool,
    pub raise_alarm: bool,
    pub dismiss_alarm: bool,
    /// Recording-capable device connected; query its recording status
    pub query_recording: Option<DeviceHandle>,
    /// Link lost; sessions bound to it must be torn down
    pub link_lost: Option<DeviceHandle>,
}

pub struct ConnectionStateMachine {
    state: ConnectionState,
    bluetooth_on: bool,
    capabilities: DeviceCapabilities,
    last_device: Option<DeviceHandle>,
    recording_models: Vec<String>,
}

impl ConnectionStateMachine {
    pub fn new(bluetooth_on: bool, recording_models: Vec<String>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            bluetooth_on,
            capabilities: DeviceCapabilities::default(),
            last_device: None,
            recording_models,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_device_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn is_bluetooth_on(&self) -> bool {
        self.bluetooth_on
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Most recently connected device
    pub fn last_device(&self) -> Option<&DeviceHandle> {
        self.last_device.as_ref()
    }

    pub fn is_recording_model(&self, info: &DeviceInfo) -> bool {
        self.recording_models
            .iter()
            .any(|marker| info.name.contains(marker.as_str()))
    }

    pub fn set_recording_status(&mut self, device: &DeviceHandle, status: RecordingStatus) {
        if self.state.connected_device() == Some(device) {
            self.capabilities.recording = Some(status);
        }
    }

    pub fn apply(&mut self, event: &TransportEvent) -> Transition {
        match event {
            TransportEvent::PowerStateChanged { powered } => {
                let changed = self.bluetooth_on != *powered;
                self.bluetooth_on = *powered;
                log::info!("Bluetooth radio powered {}", if *powered { "on" } else { "off" });
                Transition {
                    changed,
                    ..Default::default()
                }
            }

            TransportEvent::DeviceConnecting(info) => {
                if !matches!(self.state, ConnectionState::Disconnected) {
                    log::warn!("Connecting event for {} while {}", info.handle, self.state);
                }
                log::info!("Connecting to {} ({})", info.handle, info.name);
                self.set_state(ConnectionState::Connecting(info.handle.clone()))
            }

            TransportEvent::DeviceConnected(info) => {
                if !matches!(self.state, ConnectionState::Connecting(_)) {
                    log::warn!("Connected event for {} while {}", info.handle, self.state);
                }
                log::info!("Device connected: {} ({})", info.handle, info.name);
                let mut transition =
                    self.set_state(ConnectionState::Connected(info.handle.clone()));
                self.last_device = Some(info.handle.clone());
                transition.dismiss_alarm = true;
                if self.is_recording_model(info) {
                    self.capabilities.recording_supported = true;
                    transition.query_recording = Some(info.handle.clone());
                }
                transition
            }

            TransportEvent::DeviceDisconnected(info) => {
                if !matches!(self.state, ConnectionState::Connected(_)) {
                    log::warn!("Disconnected event for {} while {}", info.handle, self.state);
                }
                log::warn!("Device disconnected: {} ({})", info.handle, info.name);
                let mut transition = self.set_state(ConnectionState::Disconnected);
                self.capabilities = DeviceCapabilities::default();
                transition.changed = true;
                transition.raise_alarm = true;
                transition.link_lost = Some(info.handle.clone());
                transition
            }

            TransportEvent::BatteryLevel { device, percent } => {
                self.update_capabilities(device, |caps| caps.battery_percent = Some(*percent))
            }

            TransportEvent::DeviceInfoField {
                device,
                field,
                value,
            } => self.update_capabilities(device, |caps| {
                caps.device_info.insert(field.clone(), value.clone());
            }),

            TransportEvent::FeaturesReady { device, kinds } => {
                self.update_capabilities(device, |caps| {
                    caps.supported_streams = kinds.iter().copied().collect();
                })
            }

            TransportEvent::HeartRatePush { .. } => Transition::default(),
        }
    }

    fn set_state(&mut self, state: ConnectionState) -> Transition {
        let changed = self.state != state;
        self.state = state;
        Transition {
            changed,
            ..Default::default()
        }
    }

    fn update_capabilities<F>(&mut self, device: &DeviceHandle, update: F) -> Transition
    where
        F: FnOnce(&mut DeviceCapabilities),
    {
        if self.state.device() != Some(device) {
            log::debug!("Ignoring capability update from {}", device);
            return Transition::default();
        }
        update(&mut self.capabilities);
        Transition {
            changed: true,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h10() -> DeviceInfo {
        DeviceInfo::new("7E37D222", "Polar H10 7E37D222")
    }

    fn machine() -> ConnectionStateMachine {
        ConnectionStateMachine::new(true, vec!["H10".to_string()])
    }

    /// Expected state after an event, from the transition table alone
    fn table(state: &ConnectionState, event: &TransportEvent) -> ConnectionState {
        match event {
            TransportEvent::DeviceConnecting(info) => ConnectionState::Connecting(info.handle.clone()),
            TransportEvent::DeviceConnected(info) => ConnectionState::Connected(info.handle.clone()),
            TransportEvent::DeviceDisconnected(_) => ConnectionState::Disconnected,
            _ => state.clone(),
        }
    }

    #[test]
    fn test_nominal_cycle() {
        let mut m = machine();
        let device = h10().handle;

        m.apply(&TransportEvent::DeviceConnecting(h10()));
        assert_eq!(m.state(), &ConnectionState::Connecting(device.clone()));
        assert!(!m.is_device_connected());

        let t = m.apply(&TransportEvent::DeviceConnected(h10()));
        assert_eq!(m.state(), &ConnectionState::Connected(device.clone()));
        assert!(m.is_device_connected());
        assert_eq!(t.query_recording, Some(device.clone()));
        assert!(m.capabilities().recording_supported);
        assert_eq!(m.last_device(), Some(&device));

        let t = m.apply(&TransportEvent::DeviceDisconnected(h10()));
        assert_eq!(m.state(), &ConnectionState::Disconnected);
        assert!(t.raise_alarm);
        assert_eq!(t.link_lost, Some(device));
    }

    #[test]
    fn test_non_recording_model_skips_query() {
        let mut m = machine();
        let oh1 = DeviceInfo::new("A0B1C2D3", "Polar OH1 A0B1C2D3");
        m.apply(&TransportEvent::DeviceConnecting(oh1.clone()));
        let t = m.apply(&TransportEvent::DeviceConnected(oh1));
        assert_eq!(t.query_recording, None);
        assert!(!m.capabilities().recording_supported);
    }

    #[test]
    fn test_disconnect_clears_capabilities() {
        let mut m = machine();
        let device = h10().handle;
        m.apply(&TransportEvent::DeviceConnecting(h10()));
        m.apply(&TransportEvent::DeviceConnected(h10()));
        m.apply(&TransportEvent::FeaturesReady {
            device: device.clone(),
            kinds: vec![StreamKind::HeartRate, StreamKind::Ecg],
        });
        m.apply(&TransportEvent::BatteryLevel {
            device: device.clone(),
            percent: 80,
        });
        m.set_recording_status(
            &device,
            RecordingStatus {
                ongoing: true,
                entry_id: "exercise".to_string(),
            },
        );
        assert_eq!(m.capabilities().supported_streams.len(), 2);
        assert!(m.capabilities().recording.is_some());

        m.apply(&TransportEvent::DeviceDisconnected(h10()));
        assert_eq!(m.capabilities(), &DeviceCapabilities::default());
    }

    #[test]
    fn test_repeated_disconnect_always_raises_alarm() {
        let mut m = machine();
        assert!(m.apply(&TransportEvent::DeviceDisconnected(h10())).raise_alarm);
        assert!(m.apply(&TransportEvent::DeviceDisconnected(h10())).raise_alarm);
        assert_eq!(m.state(), &ConnectionState::Disconnected);
    }

    #[test]
    fn test_capability_update_from_other_device_ignored() {
        let mut m = machine();
        m.apply(&TransportEvent::DeviceConnecting(h10()));
        m.apply(&TransportEvent::DeviceConnected(h10()));
        let t = m.apply(&TransportEvent::BatteryLevel {
            device: DeviceHandle::new("OTHER"),
            percent: 12,
        });
        assert!(!t.changed);
        assert_eq!(m.capabilities().battery_percent, None);
    }

    #[test]
    fn test_power_state_tracked_independently() {
        let mut m = machine();
        m.apply(&TransportEvent::DeviceConnecting(h10()));
        m.apply(&TransportEvent::DeviceConnected(h10()));
        let t = m.apply(&TransportEvent::PowerStateChanged { powered: false });
        assert!(t.changed);
        assert!(!m.is_bluetooth_on());
        assert!(m.is_device_connected());
    }

    #[test]
    fn test_replay_matches_transition_table() {
        let other = DeviceInfo::new("0000AAAA", "Polar Verity Sense");
        let alphabet = [
            TransportEvent::DeviceConnecting(h10()),
            TransportEvent::DeviceConnected(h10()),
            TransportEvent::DeviceDisconnected(h10()),
            TransportEvent::DeviceConnecting(other.clone()),
            TransportEvent::DeviceConnected(other),
            TransportEvent::PowerStateChanged { powered: false },
            TransportEvent::PowerStateChanged { powered: true },
            TransportEvent::BatteryLevel {
                device: h10().handle,
                percent: 50,
            },
        ];

        // Deterministic pseudo-random event sequences
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        for _ in 0..200 {
            let mut m = machine();
            let mut expected = ConnectionState::Disconnected;
            for _ in 0..25 {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                let event = &alphabet[(seed % alphabet.len() as u64) as usize];

                m.apply(event);
                expected = table(&expected, event);

                assert_eq!(m.state(), &expected);
                assert_eq!(m.is_device_connected(), expected.is_connected());
                if !m.is_device_connected() {
                    assert!(m.state().connected_device().is_none());
                }
            }
        }
    }
}
