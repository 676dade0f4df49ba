//! Text for the telescope readout.

use crate::coords::{device_degrees_to_equatorial, DeviceAngles, Degrees, ObserverFrame};
use crate::link::PortOpener;
use crate::session::MountSession;
use std::fmt;

/// Shown while the device reports a measurement fault.
pub const REALIGN_MESSAGE: &str = "Measurement error, please realign.";

/// Splits a non-negative value into whole units, minutes and tenths of
/// seconds. Rounding carries into the larger fields so 60 never shows up.
fn sexagesimal(value: f64) -> (i64, i64, i64) {
    let tenths = (value * 36_000.0).round() as i64;
    (tenths / 36_000, (tenths / 600) % 60, tenths % 600)
}

/// Signed degrees as `+DD°MM'SS.S"`.
pub fn dms(degrees: f64) -> String {
    let sign = if degrees < 0.0 { '-' } else { '+' };
    let (d, m, s) = sexagesimal(degrees.abs());
    format!("{sign}{d:02}°{m:02}'{:02}.{}\"", s / 10, s % 10)
}

/// Right ascension in degrees as `HHhMMmSS.Ss`, wrapped into 0-24h.
pub fn hms(degrees: f64) -> String {
    let (mut h, m, s) = sexagesimal(degrees.rem_euclid(360.0) / 15.0);
    if h == 24 {
        h = 0;
    }
    format!("{h:02}h{m:02}m{:02}.{}s", s / 10, s % 10)
}

/// Ready-to-render description of where the telescope points.
#[derive(Debug, Clone, PartialEq)]
pub struct AimReadout {
    pub az_alt: String,
    pub ra_dec: String,
    pub device_error: bool,
}

impl AimReadout {
    pub fn new<F>(aim: DeviceAngles<Degrees>, observer: &F, device_error: bool) -> Self
    where
        F: ObserverFrame + ?Sized,
    {
        let ra_dec = device_degrees_to_equatorial(observer, aim).to_degrees();
        let azimuth = aim.first.rem_euclid(360.0);
        Self {
            az_alt: format!("Az/Alt: {:.4}°/{:.4}°", azimuth, aim.second),
            ra_dec: format!("RA/Dec (J2000): {}/{}", hms(ra_dec.first), dms(ra_dec.second)),
            device_error,
        }
    }

    /// `None` until the device has reported an aim on this connection.
    pub fn from_session<O, F>(session: &MountSession<O>, observer: &F) -> Option<Self>
    where
        O: PortOpener,
        F: ObserverFrame + ?Sized,
    {
        let aim = session.device_aim()?;
        Some(Self::new(aim, observer, session.device_reports_error()))
    }

    pub fn lines(&self) -> Vec<&str> {
        let mut lines = vec![self.az_alt.as_str(), self.ra_dec.as_str()];
        if self.device_error {
            lines.push(REALIGN_MESSAGE);
        }
        lines
    }
}

impl fmt::Display for AimReadout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lines().join("\n"))
    }
}
