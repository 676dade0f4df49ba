//! PushTo Core
//!
//! Host-side protocol and pointing logic for a push-to alt/az telescope mount
//! bridged to the computer by a microcontroller on a serial line.
//!
//! The crate is split leaf-first:
//! - [`coords`] converts between the device frame, local horizontal and J2000
//! - [`codec`] encodes and validates the fixed 10-byte wire frames
//! - [`link`] owns the serial port and turns raw bytes into frames
//! - [`session`] tracks connection state and the last aim the device reported
//! - [`tracking`] keeps the on-screen view and the telescope in step

use thiserror::Error;

pub mod codec;
pub mod coords;
pub mod format;
pub mod link;
pub mod observer;
pub mod session;
pub mod tracking;

pub use codec::{FrameBuffer, Packet, ResyncPolicy, Tag};
pub use coords::{AngleUnit, AzAlt, DeviceAngles, Degrees, ObserverFrame, Radians, RaDec};
pub use link::{LinkSettings, PortOpener, SerialLink, SystemPorts};
pub use observer::{ObserverLocation, SiderealObserverFrame};
pub use session::{MountSession, SessionEvent};
pub use tracking::{TrackingController, TrackingState, ViewMovement};

/// Result type alias for push-to operations.
pub type PushToResult<T> = Result<T, PushToError>;

/// Error types for push-to operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PushToError {
    #[error("TransportOpenError: {0}")]
    TransportOpenError(String),
    #[error("TransportIoError: {0}")]
    TransportIoError(String),
}
