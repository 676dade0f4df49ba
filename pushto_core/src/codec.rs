//! Wire codec for the 10-byte frames exchanged with the mount controller.
//!
//! ```text
//! offset  size  field
//! 0       1     tag      'U' update aim, 'J' equatorial target, 'A' normal, 'E' fault
//! 1       4     angle 1  f32, little-endian
//! 5       4     angle 2  f32, little-endian
//! 9       1     trailer  0x79
//! ```
//!
//! Both ends of the link (AVR firmware, x86/ARM hosts) are little-endian, so
//! the payload is read and written explicitly as little-endian.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of every frame in both directions.
pub const FRAME_LEN: usize = 10;

/// Last byte of every frame.
pub const MAGIC_TRAILER: u8 = 0x79;

const TAG_UPDATE_AIM: u8 = b'U';
const TAG_EQUATORIAL_TARGET: u8 = b'J';
const TAG_DEVICE_FAULT: u8 = b'E';
const TAG_DEVICE_NORMAL: u8 = b'A';

/// Frame tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// Host tells the device where it is pointing (alignment), radians.
    UpdateAim,
    /// Host tells the device the J2000 coordinates of its aim, radians.
    EquatorialTarget,
    /// Device reports its aim but has lost encoder sync.
    DeviceFault,
    /// Device reports its aim.
    DeviceNormal,
}

impl Tag {
    /// `None` for bytes that are not a tag of the protocol.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            TAG_UPDATE_AIM => Some(Tag::UpdateAim),
            TAG_EQUATORIAL_TARGET => Some(Tag::EquatorialTarget),
            TAG_DEVICE_FAULT => Some(Tag::DeviceFault),
            TAG_DEVICE_NORMAL => Some(Tag::DeviceNormal),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Tag::UpdateAim => TAG_UPDATE_AIM,
            Tag::EquatorialTarget => TAG_EQUATORIAL_TARGET,
            Tag::DeviceFault => TAG_DEVICE_FAULT,
            Tag::DeviceNormal => TAG_DEVICE_NORMAL,
        }
    }

    pub fn is_fault(self) -> bool {
        matches!(self, Tag::DeviceFault)
    }

    /// True for tags only the host sends.
    pub fn is_command(self) -> bool {
        matches!(self, Tag::UpdateAim | Tag::EquatorialTarget)
    }
}

/// A decoded frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Packet {
    pub tag: Tag,
    pub first: f32,
    pub second: f32,
}

impl Packet {
    pub fn new(tag: Tag, first: f32, second: f32) -> Self {
        Self { tag, first, second }
    }

    pub fn encode(&self) -> [u8; FRAME_LEN] {
        encode_command(self.tag, self.first, self.second)
    }
}

/// Why a 10-byte window was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum FrameError {
    #[error("trailer byte {0:#04x} is not 0x79")]
    BadTrailer(u8),
    #[error("unexpected tag byte {0:#04x}")]
    BadTag(u8),
    #[error("payload contains NaN")]
    NanPayload,
}

/// Lays out one frame. Always exactly [`FRAME_LEN`] bytes, whatever the tag.
pub fn encode_command(tag: Tag, first: f32, second: f32) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = tag.to_byte();
    LittleEndian::write_f32(&mut frame[1..5], first);
    LittleEndian::write_f32(&mut frame[5..9], second);
    frame[9] = MAGIC_TRAILER;
    frame
}

/// Interprets the first [`FRAME_LEN`] bytes of `bytes`.
///
/// Returns `Ok(None)` when fewer than [`FRAME_LEN`] bytes are available.
pub fn try_decode_frame(bytes: &[u8]) -> Result<Option<Packet>, FrameError> {
    if bytes.len() < FRAME_LEN {
        return Ok(None);
    }

    let trailer = bytes[FRAME_LEN - 1];
    if trailer != MAGIC_TRAILER {
        return Err(FrameError::BadTrailer(trailer));
    }

    let tag = Tag::from_byte(bytes[0]).ok_or(FrameError::BadTag(bytes[0]))?;

    let first = LittleEndian::read_f32(&bytes[1..5]);
    let second = LittleEndian::read_f32(&bytes[5..9]);
    if first.is_nan() || second.is_nan() {
        return Err(FrameError::NanPayload);
    }

    Ok(Some(Packet::new(tag, first, second)))
}

/// [`try_decode_frame`] for traffic from the device: host command tags are
/// rejected too.
pub fn try_decode_device_frame(bytes: &[u8]) -> Result<Option<Packet>, FrameError> {
    match try_decode_frame(bytes)? {
        Some(packet) if packet.tag.is_command() => Err(FrameError::BadTag(packet.tag.to_byte())),
        decoded => Ok(decoded),
    }
}

/// What to drop from the stream when the window at its head is corrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResyncPolicy {
    /// Drop the whole 10-byte window. A single lost byte on the line keeps
    /// every later window misaligned.
    DiscardFrame,
    /// Drop up to and including the next trailer byte and try the window
    /// that follows it.
    #[default]
    ScanForTrailer,
}

/// Bytes to drop so the buffer starts right after the next trailer byte.
/// Without one, the whole buffer goes.
fn next_frame_start(buffer: &[u8]) -> usize {
    buffer
        .iter()
        .position(|&b| b == MAGIC_TRAILER)
        .map_or(buffer.len(), |i| i + 1)
}

/// Append-only receive buffer that cuts the device byte stream into frames.
///
/// Every call to [`FrameBuffer::push`] drains all complete frames; only an
/// incomplete tail (fewer than [`FRAME_LEN`] bytes) is kept for next time.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: Vec<u8>,
    policy: ResyncPolicy,
    corrupt_windows: u64,
    skipped_bytes: u64,
}

impl FrameBuffer {
    pub fn new(policy: ResyncPolicy) -> Self {
        Self {
            buffer: Vec::with_capacity(4 * FRAME_LEN),
            policy,
            corrupt_windows: 0,
            skipped_bytes: 0,
        }
    }

    /// Appends `data` and returns every valid frame now complete, in order.
    pub fn push(&mut self, data: &[u8]) -> Vec<Packet> {
        self.buffer.extend_from_slice(data);
        let mut packets = Vec::new();

        while self.buffer.len() >= FRAME_LEN {
            match try_decode_device_frame(&self.buffer) {
                Ok(Some(packet)) => {
                    self.buffer.drain(..FRAME_LEN);
                    packets.push(packet);
                }
                Ok(None) => break,
                Err(e) => {
                    self.corrupt_windows += 1;
                    let skip = match self.policy {
                        ResyncPolicy::DiscardFrame => FRAME_LEN,
                        ResyncPolicy::ScanForTrailer => next_frame_start(&self.buffer),
                    };
                    debug!("Corrupt frame ({e}), skipping {skip} byte(s)");
                    self.buffer.drain(..skip);
                    self.skipped_bytes += skip as u64;
                }
            }
        }

        packets
    }

    pub fn policy(&self) -> ResyncPolicy {
        self.policy
    }

    /// Bytes waiting for the rest of their frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Number of rejected 10-byte windows since creation.
    pub fn corrupt_windows(&self) -> u64 {
        self.corrupt_windows
    }

    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
