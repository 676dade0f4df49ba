//! Mount session module.
//!
//! Protocol-level client of the mount controller. Owns the connection state,
//! the last aim reported by the device and the device's fault flag. Anything
//! other components need to react to is queued as a [`SessionEvent`] and
//! handed out in order by [`MountSession::take_events`].

use crate::codec::{encode_command, Packet, Tag};
use crate::coords::{AnglePair, AngleUnit, DeviceAngles, Degrees, RaDec, Radians};
use crate::link::{LinkSettings, PortOpener, SerialLink};
use crate::PushToResult;
use log::{debug, info, warn};
use std::mem;

/// Something that happened on the session, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected { port: String },
    ConnectionFailed { port: String, reason: String },
    Disconnected,
    /// The device reported a new aim (device frame, degrees).
    AimUpdated(DeviceAngles<Degrees>),
    /// The device fault flag flipped.
    DeviceFault(bool),
}

/// Connection to one push-to mount.
pub struct MountSession<O: PortOpener> {
    link: SerialLink<O>,
    inbound_unit: AngleUnit,
    device_aim: DeviceAngles<Degrees>,
    aim_received: bool,
    device_error: bool,
    events: Vec<SessionEvent>,
}

impl<O: PortOpener> MountSession<O> {
    pub fn new(opener: O, settings: LinkSettings) -> Self {
        Self::from_link(SerialLink::new(opener, settings))
    }

    pub fn from_link(link: SerialLink<O>) -> Self {
        Self {
            link,
            inbound_unit: AngleUnit::Degrees,
            device_aim: AnglePair::default(),
            aim_received: false,
            device_error: false,
            events: Vec::new(),
        }
    }

    /// Unit the device uses for the angles it reports.
    pub fn with_inbound_unit(mut self, unit: AngleUnit) -> Self {
        self.inbound_unit = unit;
        self
    }

    /// Opens `port`. A reading from a previous connection is never trusted.
    pub fn connect(&mut self, port: &str) -> PushToResult<()> {
        if self.link.is_open() {
            self.disconnect();
        }

        self.reset_device_state();
        match self.link.open(port) {
            Ok(()) => {
                self.events.push(SessionEvent::Connected {
                    port: port.to_owned(),
                });
                Ok(())
            }
            Err(e) => {
                self.events.push(SessionEvent::ConnectionFailed {
                    port: port.to_owned(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Closes the port if open.
    pub fn disconnect(&mut self) {
        if self.link.close() {
            self.reset_device_state();
            self.events.push(SessionEvent::Disconnected);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_open()
    }

    pub fn port_name(&self) -> Option<&str> {
        self.link.port_name()
    }

    /// Last aim reported by (or aligned onto) the device, `None` until one
    /// has been received on this connection.
    pub fn device_aim(&self) -> Option<DeviceAngles<Degrees>> {
        self.aim_received.then_some(self.device_aim)
    }

    pub fn has_device_aim(&self) -> bool {
        self.aim_received
    }

    pub fn device_reports_error(&self) -> bool {
        self.device_error
    }

    pub fn link(&self) -> &SerialLink<O> {
        &self.link
    }

    /// Tells the device where it is pointing (device frame, degrees).
    ///
    /// Sent as radians. Does nothing while disconnected. Clears the fault
    /// flag since this is how the user re-aligns the encoders.
    pub fn send_aim_command(&mut self, aim: DeviceAngles<Degrees>) -> PushToResult<bool> {
        if !self.is_connected() {
            return Ok(false);
        }

        let radians = aim.to_radians();
        let frame = encode_command(Tag::UpdateAim, radians.first as f32, radians.second as f32);
        debug!("Sending aim update {:?}", frame);
        let sent = self.send_frame(&frame)?;
        if sent {
            self.set_device_error(false);
        }
        Ok(sent)
    }

    /// Sends the J2000 coordinates of the current aim. Does nothing while
    /// disconnected. Callers are expected to skip repeats.
    pub fn send_equatorial_target(&mut self, target: RaDec<Radians>) -> PushToResult<bool> {
        if !self.is_connected() {
            return Ok(false);
        }

        let frame = encode_command(
            Tag::EquatorialTarget,
            target.first as f32,
            target.second as f32,
        );
        self.send_frame(&frame)
    }

    /// Takes `aim` as the device's pointing and sends it to the device.
    pub fn align_to(&mut self, aim: DeviceAngles<Degrees>) -> PushToResult<bool> {
        if !self.is_connected() {
            return Ok(false);
        }

        self.device_aim = aim;
        self.aim_received = true;
        self.events.push(SessionEvent::AimUpdated(aim));
        self.send_aim_command(aim)
    }

    /// Applies one decoded frame from the device.
    pub fn on_frame_received(&mut self, packet: Packet) {
        if packet.tag.is_command() {
            debug!("Ignoring host command tag {:?} from device", packet.tag);
            return;
        }

        self.set_device_error(packet.tag.is_fault());
        let aim = AnglePair::new(
            self.inbound_unit.to_degrees(packet.first as f64),
            self.inbound_unit.to_degrees(packet.second as f64),
        );
        self.device_aim = aim;
        self.aim_received = true;
        self.events.push(SessionEvent::AimUpdated(aim));
    }

    /// Feeds raw bytes from the port. Only the last report of the batch is
    /// applied; earlier ones are already stale.
    pub fn receive_bytes(&mut self, data: &[u8]) {
        let packets = self.link.receive(data);
        self.apply_batch(packets);
    }

    /// Reads the port and applies what arrived. A transport failure closes
    /// the connection and queues [`SessionEvent::Disconnected`].
    pub fn poll(&mut self) -> PushToResult<()> {
        match self.link.poll() {
            Ok(packets) => {
                self.apply_batch(packets);
                Ok(())
            }
            Err(e) => {
                self.on_transport_lost();
                Err(e)
            }
        }
    }

    /// Events queued since the last call, oldest first.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        mem::take(&mut self.events)
    }

    fn apply_batch(&mut self, packets: Vec<Packet>) {
        if let Some(last) = packets.into_iter().filter(|p| !p.tag.is_command()).last() {
            self.on_frame_received(last);
        }
    }

    fn send_frame(&mut self, frame: &[u8]) -> PushToResult<bool> {
        let sent = self.link.send(frame);
        if sent.is_err() {
            self.on_transport_lost();
        }
        sent
    }

    fn on_transport_lost(&mut self) {
        if !self.link.is_open() {
            info!("Connection to the mount lost");
            self.reset_device_state();
            self.events.push(SessionEvent::Disconnected);
        }
    }

    fn set_device_error(&mut self, error: bool) {
        if self.device_error != error {
            if error {
                warn!("Device reports a measurement error, realignment needed");
            } else {
                info!("Device error cleared");
            }
            self.device_error = error;
            self.events.push(SessionEvent::DeviceFault(error));
        }
    }

    fn reset_device_state(&mut self) {
        self.aim_received = false;
        self.device_error = false;
    }
}
