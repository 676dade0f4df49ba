//! Observer frame module.
//!
//! Geometric horizontal <-> equatorial rotation for a site on Earth at a given
//! UTC instant. No refraction, no precession or nutation: J2000 is taken as
//! the equator of date, which is well inside the pointing accuracy of a
//! push-to mount.

use crate::coords::ObserverFrame;
use chrono::{DateTime, Utc};
use nalgebra::{Rotation3, Vector3};
use std::f64::consts::FRAC_PI_2;

/// Observer location on Earth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserverLocation {
    /// Latitude in degrees (-90 to 90)
    pub latitude: f64,
    /// Longitude in degrees, east positive (-180 to 180)
    pub longitude: f64,
    /// Altitude in meters above sea level
    pub altitude: f64,
}

/// Julian date of a UTC instant.
pub fn julian_date(timestamp: DateTime<Utc>) -> f64 {
    let unix = timestamp.timestamp() as f64;
    let sub = timestamp.timestamp_subsec_nanos() as f64 * 1e-9;
    2440587.5 + (unix + sub) / 86400.0
}

/// Greenwich mean sidereal time in degrees, 0-360.
pub fn greenwich_mean_sidereal_time(timestamp: DateTime<Utc>) -> f64 {
    let jd = julian_date(timestamp);
    let n = jd - 2451545.0;
    let t = n / 36525.0;
    (280.46061837 + 360.98564736629 * n + 0.000387933 * t.powi(2) - t.powi(3) / 38710000.0)
        .rem_euclid(360.0)
}

/// [`ObserverFrame`] built from site latitude and local sidereal time.
///
/// Horizontal vectors use the host convention: x toward South, y toward
/// East, z toward the zenith.
#[derive(Debug, Clone, Copy)]
pub struct SiderealObserverFrame {
    location: ObserverLocation,
    local_sidereal_time: f64,
    to_horizontal: Rotation3<f64>,
}

impl SiderealObserverFrame {
    pub fn new(location: ObserverLocation, timestamp: DateTime<Utc>) -> Self {
        let mut frame = Self {
            location,
            local_sidereal_time: 0.0,
            to_horizontal: Rotation3::identity(),
        };
        frame.set_time(timestamp);
        frame
    }

    /// Re-derives the rotation for a new instant.
    pub fn set_time(&mut self, timestamp: DateTime<Utc>) {
        let lst_deg =
            (greenwich_mean_sidereal_time(timestamp) + self.location.longitude).rem_euclid(360.0);
        self.local_sidereal_time = lst_deg.to_radians();

        // Equatorial -> hour angle frame, then tilt the pole down to the
        // site latitude.
        let hour_angle = Rotation3::from_axis_angle(&Vector3::z_axis(), -self.local_sidereal_time);
        let tilt = Rotation3::from_axis_angle(
            &Vector3::y_axis(),
            self.location.latitude.to_radians() - FRAC_PI_2,
        );
        self.to_horizontal = tilt * hour_angle;
    }

    /// Local sidereal time in radians, 0-2π.
    pub fn local_sidereal_time(&self) -> f64 {
        self.local_sidereal_time
    }
}

impl ObserverFrame for SiderealObserverFrame {
    fn horizontal_to_equatorial(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.to_horizontal.inverse() * *v
    }

    fn equatorial_to_horizontal(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.to_horizontal * *v
    }
}
