//! Serial link module.
//!
//! Owns the port handle, buffers partial reads and hands complete frames to
//! the caller in arrival order. Opening goes through [`PortOpener`] so the
//! session can run against a real port ([`SystemPorts`]) or an in-memory one.

use crate::codec::{FrameBuffer, Packet, ResyncPolicy};
use crate::{PushToError, PushToResult};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
const DEFAULT_TIMEOUT_MS: u64 = 10;

/// Line settings. Framing is always 8 data bits, no parity, one stop bit and
/// no flow control; the speed, read timeout and how the inbound stream
/// recovers from corrupt bytes are adjustable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    pub baud_rate: u32,
    pub timeout_ms: u64,
    pub resync_policy: ResyncPolicy,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            resync_policy: ResyncPolicy::default(),
        }
    }
}

/// Byte-level access to an open port.
pub trait PortIo {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Appends the bytes already waiting on the port to `out` without
    /// blocking, returning how many were appended.
    fn read_available(&mut self, out: &mut Vec<u8>) -> io::Result<usize>;
}

/// Opens ports by name.
pub trait PortOpener {
    type Port: PortIo;

    fn open(&mut self, name: &str, settings: &LinkSettings) -> PushToResult<Self::Port>;
}

/// Opens operating-system serial ports through the `serialport` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortOpener for SystemPorts {
    type Port = Box<dyn SerialPort>;

    fn open(&mut self, name: &str, settings: &LinkSettings) -> PushToResult<Self::Port> {
        serialport::new(name, settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .flow_control(serialport::FlowControl::None)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(settings.timeout_ms))
            .open()
            .map_err(|e| PushToError::TransportOpenError(e.to_string()))
    }
}

impl PortIo for Box<dyn SerialPort> {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.flush()
    }

    fn read_available(&mut self, out: &mut Vec<u8>) -> io::Result<usize> {
        let waiting = self.bytes_to_read().map_err(io::Error::from)? as usize;
        if waiting == 0 {
            return Ok(0);
        }

        let start = out.len();
        out.resize(start + waiting, 0);
        match self.read(&mut out[start..]) {
            Ok(n) => {
                out.truncate(start + n);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                out.truncate(start);
                Ok(0)
            }
            Err(e) => {
                out.truncate(start);
                Err(e)
            }
        }
    }
}

/// macOS lists every device twice, as `tty.*` and as the call-out `cu.*`.
pub fn is_call_out_device(port_name: &str) -> bool {
    port_name
        .rsplit('/')
        .next()
        .map(|base| base.starts_with("cu"))
        .unwrap_or(false)
}

/// Names of the serial ports present on this machine, call-out duplicates
/// left out.
pub fn available_ports() -> PushToResult<Vec<String>> {
    let ports = serialport::available_ports()
        .map_err(|e| PushToError::TransportIoError(format!("Failed to list ports: {e}")))?;

    Ok(ports
        .into_iter()
        .map(|p| p.port_name)
        .filter(|name| !is_call_out_device(name))
        .collect())
}

struct OpenPort<P> {
    name: String,
    io: P,
}

/// A serial connection to the mount controller.
pub struct SerialLink<O: PortOpener> {
    opener: O,
    settings: LinkSettings,
    port: Option<OpenPort<O::Port>>,
    frames: FrameBuffer,
    scratch: Vec<u8>,
}

impl<O: PortOpener> SerialLink<O> {
    pub fn new(opener: O, settings: LinkSettings) -> Self {
        Self {
            frames: FrameBuffer::new(settings.resync_policy),
            opener,
            settings,
            port: None,
            scratch: Vec::with_capacity(256),
        }
    }

    /// Opens `name`, closing any port already open.
    pub fn open(&mut self, name: &str) -> PushToResult<()> {
        self.close();

        match self.opener.open(name, &self.settings) {
            Ok(io) => {
                info!(
                    "Opened {name} at {} baud, 8N1, no flow control",
                    self.settings.baud_rate
                );
                self.frames.clear();
                self.port = Some(OpenPort {
                    name: name.to_owned(),
                    io,
                });
                Ok(())
            }
            Err(e) => {
                warn!("Failed to open {name}: {e}");
                Err(e)
            }
        }
    }

    /// Closes the port. Returns `true` if a port was actually open.
    pub fn close(&mut self) -> bool {
        match self.port.take() {
            Some(port) => {
                info!("Closed {}", port.name);
                self.frames.clear();
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port.as_ref().map(|p| p.name.as_str())
    }

    /// Writes `bytes`. Returns `Ok(false)` without writing when closed.
    ///
    /// A write failure closes the link.
    pub fn send(&mut self, bytes: &[u8]) -> PushToResult<bool> {
        let Some(port) = self.port.as_mut() else {
            debug!("Link closed, dropping {} byte(s)", bytes.len());
            return Ok(false);
        };

        if let Err(e) = port.io.write_bytes(bytes) {
            let message = format!("Write to {} failed: {e}", port.name);
            warn!("{message}");
            self.close();
            return Err(PushToError::TransportIoError(message));
        }
        Ok(true)
    }

    /// Feeds received bytes and returns the frames they complete.
    pub fn receive(&mut self, data: &[u8]) -> Vec<Packet> {
        self.frames.push(data)
    }

    /// Reads whatever the port has buffered and returns the completed frames.
    ///
    /// A read failure closes the link.
    pub fn poll(&mut self) -> PushToResult<Vec<Packet>> {
        let Some(port) = self.port.as_mut() else {
            return Ok(Vec::new());
        };

        self.scratch.clear();
        if let Err(e) = port.io.read_available(&mut self.scratch) {
            let message = format!("Read from {} failed: {e}", port.name);
            warn!("{message}");
            self.close();
            return Err(PushToError::TransportIoError(message));
        }

        if self.scratch.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.frames.push(&self.scratch))
    }

    pub fn frame_buffer(&self) -> &FrameBuffer {
        &self.frames
    }
}

/// In-memory port for exercising the link without hardware.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::{LinkSettings, PortIo, PortOpener};
    use crate::{PushToError, PushToResult};
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    #[derive(Debug, Default)]
    pub struct MockState {
        /// Everything written to any port opened by this opener.
        pub written: Vec<u8>,
        /// Bytes waiting to be read.
        pub inbound: Vec<u8>,
        /// Names passed to `open`, successful or not.
        pub opened: Vec<String>,
        pub fail_open: Option<String>,
        pub fail_io: bool,
    }

    /// Opener handing out [`MockPort`]s that share one [`MockState`].
    #[derive(Debug, Clone, Default)]
    pub struct MockOpener {
        pub state: Rc<RefCell<MockState>>,
    }

    impl MockOpener {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn written(&self) -> Vec<u8> {
            self.state.borrow().written.clone()
        }

        pub fn clear_written(&self) {
            self.state.borrow_mut().written.clear();
        }

        /// Queues bytes for the next `read_available`.
        pub fn feed(&self, bytes: &[u8]) {
            self.state.borrow_mut().inbound.extend_from_slice(bytes);
        }

        pub fn fail_next_open(&self, message: &str) {
            self.state.borrow_mut().fail_open = Some(message.to_owned());
        }

        /// Makes every later read and write fail, as an unplugged adapter would.
        pub fn unplug(&self) {
            self.state.borrow_mut().fail_io = true;
        }
    }

    pub struct MockPort {
        state: Rc<RefCell<MockState>>,
    }

    impl PortOpener for MockOpener {
        type Port = MockPort;

        fn open(&mut self, name: &str, _settings: &LinkSettings) -> PushToResult<MockPort> {
            let mut state = self.state.borrow_mut();
            state.opened.push(name.to_owned());
            if let Some(message) = state.fail_open.take() {
                return Err(PushToError::TransportOpenError(message));
            }
            state.fail_io = false;
            Ok(MockPort {
                state: Rc::clone(&self.state),
            })
        }
    }

    impl PortIo for MockPort {
        fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
            let mut state = self.state.borrow_mut();
            if state.fail_io {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
            state.written.extend_from_slice(bytes);
            Ok(())
        }

        fn read_available(&mut self, out: &mut Vec<u8>) -> io::Result<usize> {
            let mut state = self.state.borrow_mut();
            if state.fail_io {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
            let n = state.inbound.len();
            out.append(&mut state.inbound);
            Ok(n)
        }
    }
}
