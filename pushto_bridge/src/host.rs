//! Headless host.
//!
//! One logical thread owns the session, the tracking controller and the
//! view. Commands arrive on a channel and are handled between ticks, so
//! everything the session reports is processed in arrival order.

use crate::config::Config;
use crate::model::{BridgeError, BridgeResult};
use crate::view::SimulatedView;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use pushto_core::format::{AimReadout, REALIGN_MESSAGE};
use pushto_core::link::available_ports;
use pushto_core::{
    MountSession, PortOpener, SessionEvent, SiderealObserverFrame, TrackingController,
    TrackingState,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    Connect(String),
    Disconnect,
    /// Slew the view onto the telescope once.
    Center,
    Track,
    Stop,
    /// Align the telescope to the view.
    Sync,
    Status,
    Ports,
    Remember(bool),
    /// Point the view by hand (device-frame degrees).
    Look { az: f64, alt: f64 },
    Quit,
}

impl FromStr for HostCommand {
    type Err = BridgeError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words
            .next()
            .ok_or_else(|| BridgeError::CommandError("Empty command".to_string()))?;
        let args: Vec<&str> = words.collect();

        let command = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("connect", [port]) => HostCommand::Connect((*port).to_string()),
            ("disconnect", []) => HostCommand::Disconnect,
            ("center", []) => HostCommand::Center,
            ("track", []) => HostCommand::Track,
            ("stop", []) => HostCommand::Stop,
            ("sync", []) => HostCommand::Sync,
            ("status", []) => HostCommand::Status,
            ("ports", []) => HostCommand::Ports,
            ("remember", ["on"]) => HostCommand::Remember(true),
            ("remember", ["off"]) => HostCommand::Remember(false),
            ("look", [az, alt]) => HostCommand::Look {
                az: parse_angle(az)?,
                alt: parse_angle(alt)?,
            },
            ("quit" | "exit", []) => HostCommand::Quit,
            _ => {
                return Err(BridgeError::CommandError(format!(
                    "Unrecognized command: {}",
                    line.trim()
                )))
            }
        };
        Ok(command)
    }
}

fn parse_angle(word: &str) -> BridgeResult<f64> {
    word.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| BridgeError::CommandError(format!("Not an angle: {word}")))
}

pub struct Host<O: PortOpener> {
    config: Config,
    config_path: PathBuf,
    session: MountSession<O>,
    controller: TrackingController,
    observer: SiderealObserverFrame,
    view: SimulatedView,
}

impl<O: PortOpener> Host<O> {
    pub fn new(opener: O, config: Config, config_path: PathBuf, now: DateTime<Utc>) -> Self {
        let observer = SiderealObserverFrame::new(config.observer_location(), now);
        let session = MountSession::new(opener, config.link.clone())
            .with_inbound_unit(config.inbound_unit);
        Self {
            config,
            config_path,
            session,
            controller: TrackingController::new(),
            observer,
            view: SimulatedView::new(observer),
        }
    }

    /// Opens the remembered port, if any.
    pub fn auto_reconnect(&mut self) -> bool {
        let Some(port) = self.config.reconnect_port.clone() else {
            return false;
        };
        info!("Reconnecting to {port}");
        match self.connect(&port) {
            Ok(()) => true,
            Err(e) => {
                warn!("Auto-reconnect failed: {e}");
                false
            }
        }
    }

    pub fn connect(&mut self, port: &str) -> BridgeResult<()> {
        let result = self.session.connect(port);
        self.dispatch_events()?;
        Ok(result?)
    }

    pub fn handle_command(&mut self, command: HostCommand) -> BridgeResult<String> {
        debug!("Handling {command:?}");
        let reply = match command {
            HostCommand::Connect(port) => {
                self.connect(&port)?;
                format!("Connected to {port}")
            }
            HostCommand::Disconnect => {
                self.session.disconnect();
                self.dispatch_events()?;
                "Disconnected".to_string()
            }
            HostCommand::Center => {
                if self.controller.center_on_device(&self.session, &mut self.view) {
                    "Centering on telescope".to_string()
                } else {
                    "No telescope position yet".to_string()
                }
            }
            HostCommand::Track => {
                if self.controller.start_tracking(&self.session, &mut self.view) {
                    "Tracking telescope".to_string()
                } else {
                    "No telescope position yet".to_string()
                }
            }
            HostCommand::Stop => {
                self.controller.stop_tracking();
                "Tracking stopped".to_string()
            }
            HostCommand::Sync => {
                let sent = self.controller.sync_device_to_view(
                    &mut self.session,
                    &self.view,
                    &self.observer,
                );
                self.dispatch_events()?;
                if sent? {
                    "Telescope aligned to view".to_string()
                } else {
                    "Not connected".to_string()
                }
            }
            HostCommand::Status => self.status(),
            HostCommand::Ports => {
                let ports = available_ports()?;
                if ports.is_empty() {
                    "No serial ports found".to_string()
                } else {
                    ports.join("\n")
                }
            }
            HostCommand::Remember(enabled) => self.remember(enabled)?,
            HostCommand::Look { az, alt } => {
                self.view.look_at(az, alt);
                format!("Looking at az {az:.4}°, alt {alt:.4}°")
            }
            HostCommand::Quit => "Bye".to_string(),
        };
        Ok(reply)
    }

    /// One update step, `dt_secs` after the previous one.
    pub fn tick(&mut self, dt_secs: f64, now: DateTime<Utc>) -> BridgeResult<()> {
        self.observer.set_time(now);
        self.view.set_observer(self.observer);
        self.view.advance(dt_secs);

        let polled = self.session.poll();
        self.dispatch_events()?;
        polled?;

        let ticked =
            self.controller
                .tick(dt_secs, &mut self.session, &mut self.view, &self.observer);
        self.dispatch_events()?;
        Ok(ticked?)
    }

    pub fn status(&self) -> String {
        let mut lines = Vec::new();
        match self.session.port_name() {
            Some(port) => lines.push(format!("Connected to {port}")),
            None => lines.push("Not connected".to_string()),
        }
        let state = match self.controller.state() {
            TrackingState::Idle => "idle",
            TrackingState::SlewingToDevice => "slewing",
            TrackingState::Tracking => "tracking",
        };
        lines.push(format!("View: {state}"));
        if let Some(readout) = AimReadout::from_session(&self.session, &self.observer) {
            lines.push(readout.to_string());
        }
        lines.join("\n")
    }

    pub fn shutdown(&mut self) {
        self.session.disconnect();
        if let Err(e) = self.dispatch_events() {
            warn!("{e}");
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &MountSession<O> {
        &self.session
    }

    pub fn controller(&self) -> &TrackingController {
        &self.controller
    }

    pub fn view(&self) -> &SimulatedView {
        &self.view
    }

    fn remember(&mut self, enabled: bool) -> BridgeResult<String> {
        let port = if enabled {
            let Some(port) = self.session.port_name() else {
                return Ok("Connect first to remember a port".to_string());
            };
            Some(port.to_string())
        } else {
            None
        };

        self.config.set_reconnect_port(port);
        self.config.save_to(&self.config_path)?;
        Ok(match &self.config.reconnect_port {
            Some(port) => format!("Will reconnect to {port} on start"),
            None => "Auto-reconnect off".to_string(),
        })
    }

    fn dispatch_events(&mut self) -> BridgeResult<()> {
        for event in self.session.take_events() {
            self.controller.handle_event(&event, &mut self.view);
            match event {
                SessionEvent::Connected { port } => {
                    // Follow the user to a new port once auto-reconnect is on.
                    if self.config.reconnect_port.is_some()
                        && self.config.reconnect_port.as_deref() != Some(port.as_str())
                    {
                        self.config.set_reconnect_port(Some(port));
                        self.config.save_to(&self.config_path)?;
                    }
                }
                SessionEvent::ConnectionFailed { port, reason } => {
                    warn!("Could not open {port}: {reason}");
                }
                SessionEvent::DeviceFault(true) => warn!("{REALIGN_MESSAGE}"),
                SessionEvent::Disconnected
                | SessionEvent::AimUpdated(_)
                | SessionEvent::DeviceFault(false) => {}
            }
        }
        Ok(())
    }
}

/// Drives `host` until a [`HostCommand::Quit`] arrives or every command
/// sender is gone. Replies go to `replies`.
pub async fn run<O: PortOpener>(
    mut host: Host<O>,
    mut commands: mpsc::UnboundedReceiver<HostCommand>,
    replies: mpsc::UnboundedSender<String>,
    tick_period: Duration,
) -> BridgeResult<Host<O>> {
    let mut ticker = time::interval(tick_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last_tick).as_secs_f64();
                last_tick = now;
                if let Err(e) = host.tick(dt, Utc::now()) {
                    warn!("{e}");
                }
            }

            command = commands.recv() => {
                let Some(command) = command else { break };
                let quit = command == HostCommand::Quit;
                let reply = match host.handle_command(command) {
                    Ok(reply) => reply,
                    Err(e) => e.to_string(),
                };
                if replies.send(reply).is_err() || quit {
                    break;
                }
            }
        }
    }

    host.shutdown();
    Ok(host)
}

/// Parses lines from `reader` into commands. Unparseable lines are answered
/// on `replies` directly.
pub async fn forward_commands<R>(
    reader: R,
    commands: mpsc::UnboundedSender<HostCommand>,
    replies: mpsc::UnboundedSender<String>,
) -> BridgeResult<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| BridgeError::CommandError(format!("Failed to read command: {e}")))?
    {
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<HostCommand>() {
            Ok(command) => {
                let quit = command == HostCommand::Quit;
                if commands.send(command).is_err() || quit {
                    return Ok(());
                }
            }
            Err(e) => {
                let _ = replies.send(e.to_string());
            }
        }
    }

    let _ = commands.send(HostCommand::Quit);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pushto_core::codec::{encode_command, try_decode_frame, FRAME_LEN};
    use pushto_core::link::testing::MockOpener;
    use pushto_core::Tag;
    use tempfile::TempDir;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 23, 0, 0).unwrap()
    }

    fn host(opener: &MockOpener, dir: &TempDir) -> Host<MockOpener> {
        Host::new(
            opener.clone(),
            Config::default(),
            dir.path().join("config.json"),
            start(),
        )
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "connect /dev/ttyUSB0".parse::<HostCommand>().unwrap(),
            HostCommand::Connect("/dev/ttyUSB0".to_string())
        );
        assert_eq!("  TRACK ".parse::<HostCommand>().unwrap(), HostCommand::Track);
        assert_eq!(
            "remember off".parse::<HostCommand>().unwrap(),
            HostCommand::Remember(false)
        );
        assert_eq!(
            "look 120 35.5".parse::<HostCommand>().unwrap(),
            HostCommand::Look { az: 120.0, alt: 35.5 }
        );
        assert_eq!("exit".parse::<HostCommand>().unwrap(), HostCommand::Quit);
    }

    #[test]
    fn test_parse_rejects_bad_commands() {
        assert!("".parse::<HostCommand>().is_err());
        assert!("connect".parse::<HostCommand>().is_err());
        assert!("remember maybe".parse::<HostCommand>().is_err());
        assert!("look north 10".parse::<HostCommand>().is_err());
        assert!("look NaN 10".parse::<HostCommand>().is_err());
        assert!("fly".parse::<HostCommand>().is_err());
    }

    #[test]
    fn test_connect_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let opener = MockOpener::new();
        opener.fail_next_open("Permission denied");
        let mut host = host(&opener, &dir);

        let e = host
            .handle_command(HostCommand::Connect("/dev/ttyS9".to_string()))
            .unwrap_err();
        assert!(matches!(e, BridgeError::ConnectionError(_)));
        assert!(e.to_string().contains("Permission denied"));
        assert!(!host.session().is_connected());
    }

    #[test]
    fn test_track_follows_telescope() {
        let dir = TempDir::new().unwrap();
        let opener = MockOpener::new();
        let mut host = host(&opener, &dir);
        host.handle_command(HostCommand::Connect("COM3".to_string()))
            .unwrap();

        assert_eq!(
            host.handle_command(HostCommand::Track).unwrap(),
            "No telescope position yet"
        );

        opener.feed(&encode_command(Tag::DeviceNormal, 45.0, 30.0));
        host.tick(0.1, start()).unwrap();
        assert_eq!(
            host.handle_command(HostCommand::Track).unwrap(),
            "Tracking telescope"
        );
        assert_eq!(host.controller().state(), TrackingState::SlewingToDevice);

        // The centering animation takes one second.
        for _ in 0..12 {
            host.tick(0.1, start()).unwrap();
        }
        assert_eq!(host.controller().state(), TrackingState::Tracking);

        host.handle_command(HostCommand::Look { az: 90.0, alt: 10.0 })
            .unwrap();
        host.tick(0.1, start()).unwrap();
        assert_eq!(host.controller().state(), TrackingState::Idle);
    }

    #[test]
    fn test_sync_sends_view_aim() {
        let dir = TempDir::new().unwrap();
        let opener = MockOpener::new();
        let mut host = host(&opener, &dir);
        host.handle_command(HostCommand::Connect("COM3".to_string()))
            .unwrap();
        host.handle_command(HostCommand::Look { az: 90.0, alt: 10.0 })
            .unwrap();

        assert_eq!(
            host.handle_command(HostCommand::Sync).unwrap(),
            "Telescope aligned to view"
        );
        let written = opener.written();
        let packet = try_decode_frame(&written[..FRAME_LEN]).unwrap().unwrap();
        assert_eq!(packet.tag, Tag::UpdateAim);
        assert!((packet.first as f64 - 90f64.to_radians()).abs() < 1e-5);
        assert!((packet.second as f64 - 10f64.to_radians()).abs() < 1e-5);
        assert!(host.session().has_device_aim());
    }

    #[test]
    fn test_status_shows_fault() {
        let dir = TempDir::new().unwrap();
        let opener = MockOpener::new();
        let mut host = host(&opener, &dir);
        assert!(host.status().starts_with("Not connected"));

        host.handle_command(HostCommand::Connect("COM3".to_string()))
            .unwrap();
        opener.feed(&encode_command(Tag::DeviceFault, 45.0, 30.0));
        host.tick(0.1, start()).unwrap();

        let status = host.status();
        assert!(status.contains("Connected to COM3"));
        assert!(status.contains("Az/Alt: 45.0000°/30.0000°"));
        assert!(status.ends_with(REALIGN_MESSAGE));
    }

    #[test]
    fn test_unplugged_device_disconnects() {
        let dir = TempDir::new().unwrap();
        let opener = MockOpener::new();
        let mut host = host(&opener, &dir);
        host.handle_command(HostCommand::Connect("COM3".to_string()))
            .unwrap();
        opener.feed(&encode_command(Tag::DeviceNormal, 45.0, 30.0));
        host.tick(0.1, start()).unwrap();
        host.handle_command(HostCommand::Track).unwrap();

        opener.unplug();
        assert!(host.tick(0.1, start()).is_err());
        assert!(!host.session().is_connected());
        assert_eq!(host.controller().state(), TrackingState::Idle);
    }

    #[test]
    fn test_remember_persists_port() {
        let dir = TempDir::new().unwrap();
        let opener = MockOpener::new();
        let mut host = host(&opener, &dir);
        let path = dir.path().join("config.json");

        assert_eq!(
            host.handle_command(HostCommand::Remember(true)).unwrap(),
            "Connect first to remember a port"
        );
        host.handle_command(HostCommand::Connect("COM3".to_string()))
            .unwrap();
        host.handle_command(HostCommand::Remember(true)).unwrap();
        assert_eq!(
            Config::load_from(&path).unwrap().reconnect_port.as_deref(),
            Some("COM3")
        );

        // Switching ports while remembering follows the user.
        host.handle_command(HostCommand::Connect("COM4".to_string()))
            .unwrap();
        assert_eq!(host.config().reconnect_port.as_deref(), Some("COM4"));

        host.handle_command(HostCommand::Remember(false)).unwrap();
        assert_eq!(Config::load_from(&path).unwrap().reconnect_port, None);
    }

    #[test]
    fn test_auto_reconnect() {
        let dir = TempDir::new().unwrap();
        let opener = MockOpener::new();
        let mut config = Config::default();
        config.set_reconnect_port(Some("/dev/ttyACM0".to_string()));
        let mut host = Host::new(opener.clone(), config, dir.path().join("config.json"), start());

        assert!(host.auto_reconnect());
        assert_eq!(host.session().port_name(), Some("/dev/ttyACM0"));
        assert_eq!(opener.state.borrow().opened, vec!["/dev/ttyACM0".to_string()]);
    }

    #[test]
    fn test_auto_reconnect_without_port() {
        let dir = TempDir::new().unwrap();
        let opener = MockOpener::new();
        let mut host = host(&opener, &dir);

        assert!(!host.auto_reconnect());
        assert!(opener.state.borrow().opened.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_quit() {
        let dir = TempDir::new().unwrap();
        let opener = MockOpener::new();
        let host = host(&opener, &dir);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();

        let input: &[u8] = b"connect COM3\n\nfly\nstatus\nquit\nstatus\n";
        forward_commands(input, command_tx, reply_tx.clone())
            .await
            .unwrap();
        let host = run(host, command_rx, reply_tx, Duration::from_millis(100))
            .await
            .unwrap();

        let mut replies = Vec::new();
        while let Ok(reply) = reply_rx.try_recv() {
            replies.push(reply);
        }
        assert_eq!(replies[0], "CommandError: Unrecognized command: fly");
        assert_eq!(replies[1], "Connected to COM3");
        assert!(replies[2].starts_with("Connected to COM3\nView: idle"));
        assert_eq!(replies[3], "Bye");
        assert_eq!(replies.len(), 4);
        assert!(!host.session().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_when_input_closes() {
        let dir = TempDir::new().unwrap();
        let opener = MockOpener::new();
        let host = host(&opener, &dir);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (reply_tx, _reply_rx) = mpsc::unbounded_channel();
        drop(command_tx);

        let host = run(host, command_rx, reply_tx, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(host.controller().state(), TrackingState::Idle);
    }
}
