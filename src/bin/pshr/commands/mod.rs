pub mod monitor;
pub mod settings;

use crate::cli::{seconds, ConnectArgs, SimulationArgs};
use pshr_monitor::transport::SimulatedTransport;
use pshr_monitor::{
    DeviceHandle, DeviceSessionHandle, LogAlertPlayer, MessageLevel, MonitorConfig,
    OperatorMessage,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Environment configuration with command-line overrides applied
pub fn load_config(connect: &ConnectArgs, log_dir: Option<PathBuf>) -> Result<MonitorConfig, String> {
    let mut config = MonitorConfig::from_env().map_err(|e| e.to_string())?;
    if let Some(device) = &connect.device {
        config.device_id = Some(DeviceHandle::new(device.as_str()));
    }
    if let Some(rssi) = connect.rssi {
        config.rssi_threshold = rssi;
    }
    config.connect_timeout = seconds(connect.connect_timeout)?;
    if let Some(dir) = log_dir {
        config.log_dir = dir;
    }
    Ok(config)
}

/// Running session on a simulated strap, with its message queue subscribed
/// before any command is issued.
pub struct Session {
    pub handle: DeviceSessionHandle,
    pub messages: broadcast::Receiver<OperatorMessage>,
    pub strap: DeviceHandle,
}

pub fn start_session(config: MonitorConfig, sim: &SimulationArgs, bell: bool) -> Session {
    let transport = Arc::new(SimulatedTransport::new(sim.strap()));
    let strap = transport.strap().handle.clone();
    let handle = DeviceSessionHandle::spawn(config, transport, Arc::new(LogAlertPlayer::new(bell)));
    let messages = handle.messages();
    Session {
        handle,
        messages,
        strap,
    }
}

/// Connect (directly or by search) and wait until the link is up.
///
/// Fails on the first error message from the session or on timeout.
pub async fn connect(
    session: &mut Session,
    args: &ConnectArgs,
    config: &MonitorConfig,
) -> Result<DeviceHandle, String> {
    let timeout = seconds(args.connect_timeout)?;

    let issued = if args.auto_connect {
        log::info!("Searching for a device ({} dBm threshold)", config.rssi_threshold);
        session.handle.auto_connect()
    } else {
        let target = config
            .device_id
            .clone()
            .unwrap_or_else(|| session.strap.clone());
        log::info!("Connecting to {}", target);
        session.handle.connect_to(target)
    };
    issued.map_err(|e| e.to_string())?;

    let mut state = session.handle.subscribe();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        let connected = state
            .borrow_and_update()
            .connection
            .connected_device()
            .cloned();
        if let Some(device) = connected {
            return Ok(device);
        }

        tokio::select! {
            _ = &mut deadline => {
                return Err(format!("No connection within {:.1}s", timeout.as_secs_f64()));
            }
            changed = state.changed() => {
                if changed.is_err() {
                    return Err("Device session closed".to_string());
                }
            }
            message = session.messages.recv() => match message {
                Ok(message) if message.level == MessageLevel::Error => return Err(message.text),
                Ok(message) => log::info!("{}", message.text),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Err("Device session closed".to_string()),
            },
        }
    }
}
