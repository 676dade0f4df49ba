//! Coordinate transforms module.
//!
//! Angle pairs carry their reference frame and unit in the type so that a
//! device-frame reading can never be handed to code expecting horizontal or
//! equatorial coordinates by accident.
//!
//! Three frames are involved:
//! - the device frame: compass azimuth (0 = North, 90° = East) and altitude,
//!   as reported by the encoders of the mount
//! - the horizontal frame of the host: azimuth measured from South towards
//!   East, altitude above the horizon
//! - J2000 equatorial: right ascension and declination
//!
//! None of the functions here range-reduce azimuth or right ascension. Use
//! [`AnglePair::wrapped_distance`] when comparing two readings.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::marker::PhantomData;

/// Marker for the device-native spherical frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeviceFrame;

/// Marker for the local horizontal frame of the host.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HorizontalFrame;

/// Marker for the J2000 equatorial frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EquatorialFrame;

/// Unit of the two components of an [`AnglePair`].
pub trait Unit: Copy + Default + fmt::Debug + PartialEq {
    /// Half a full turn expressed in this unit.
    const HALF_TURN: f64;
    const KIND: AngleUnit;
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Radians;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Degrees;

impl Unit for Radians {
    const HALF_TURN: f64 = PI;
    const KIND: AngleUnit = AngleUnit::Radians;
}

impl Unit for Degrees {
    const HALF_TURN: f64 = 180.0;
    const KIND: AngleUnit = AngleUnit::Degrees;
}

/// Runtime counterpart of the [`Unit`] markers, used where the unit comes
/// from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AngleUnit {
    #[default]
    Degrees,
    Radians,
}

impl AngleUnit {
    /// Converts a value expressed in this unit to degrees.
    pub fn to_degrees(self, value: f64) -> f64 {
        match self {
            AngleUnit::Degrees => value,
            AngleUnit::Radians => value.to_degrees(),
        }
    }
}

/// Two angles in frame `F` and unit `U`.
///
/// `first` is the azimuth-like component (azimuth, right ascension) and is
/// implicitly periodic. `second` is the altitude-like component (altitude,
/// declination) and is expected within ±90°.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AnglePair<F, U> {
    pub first: f64,
    pub second: f64,
    _tag: PhantomData<(F, U)>,
}

pub type DeviceAngles<U> = AnglePair<DeviceFrame, U>;
pub type AzAlt<U> = AnglePair<HorizontalFrame, U>;
pub type RaDec<U> = AnglePair<EquatorialFrame, U>;

impl<F, U: Unit> AnglePair<F, U> {
    pub const fn new(first: f64, second: f64) -> Self {
        Self {
            first,
            second,
            _tag: PhantomData,
        }
    }

    /// Plain Euclidean distance over the two components.
    pub fn distance(&self, other: &Self) -> f64 {
        ((self.first - other.first).powi(2) + (self.second - other.second).powi(2)).sqrt()
    }

    /// Euclidean distance with the first component difference reduced to
    /// half a turn either way, so 359.9° and 0.1° are 0.2° apart.
    pub fn wrapped_distance(&self, other: &Self) -> f64 {
        let full_turn = 2.0 * U::HALF_TURN;
        let mut d_first = (self.first - other.first).rem_euclid(full_turn);
        if d_first > U::HALF_TURN {
            d_first -= full_turn;
        }
        (d_first.powi(2) + (self.second - other.second).powi(2)).sqrt()
    }

    pub fn unit(&self) -> AngleUnit {
        U::KIND
    }
}

impl<F> AnglePair<F, Degrees> {
    pub fn to_radians(self) -> AnglePair<F, Radians> {
        degrees_to_radians(self)
    }
}

impl<F> AnglePair<F, Radians> {
    pub fn to_degrees(self) -> AnglePair<F, Degrees> {
        radians_to_degrees(self)
    }
}

pub fn degrees_to_radians<F>(angles: AnglePair<F, Degrees>) -> AnglePair<F, Radians> {
    AnglePair::new(angles.first * PI / 180.0, angles.second * PI / 180.0)
}

pub fn radians_to_degrees<F>(angles: AnglePair<F, Radians>) -> AnglePair<F, Degrees> {
    AnglePair::new(angles.first * 180.0 / PI, angles.second * 180.0 / PI)
}

/// Maps the device frame onto the horizontal frame of the host.
///
/// Only the azimuth changes (`az = π - az`). The mapping is its own inverse,
/// see [`horizontal_to_device_frame`].
pub fn device_frame_to_horizontal(angles: DeviceAngles<Radians>) -> AzAlt<Radians> {
    AnglePair::new(PI - angles.first, angles.second)
}

pub fn horizontal_to_device_frame(angles: AzAlt<Radians>) -> DeviceAngles<Radians> {
    AnglePair::new(PI - angles.first, angles.second)
}

/// Unit vector pointing at longitude `first`, latitude `second`.
pub fn spherical_to_rect<F>(angles: AnglePair<F, Radians>) -> Vector3<f64> {
    let (sin_lng, cos_lng) = angles.first.sin_cos();
    let (sin_lat, cos_lat) = angles.second.sin_cos();
    Vector3::new(cos_lat * cos_lng, cos_lat * sin_lng, sin_lat)
}

/// Inverse of [`spherical_to_rect`]. The vector does not need to be
/// normalized. Longitude comes back in (-π, π].
pub fn rect_to_spherical<F>(v: &Vector3<f64>) -> AnglePair<F, Radians> {
    let lng = v.y.atan2(v.x);
    let lat = v.z.atan2(v.x.hypot(v.y));
    AnglePair::new(lng, lat)
}

/// Rotation between the horizontal and the J2000 equatorial frame for the
/// current observer (site, time). Implementations must not apply refraction.
pub trait ObserverFrame {
    fn horizontal_to_equatorial(&self, v: &Vector3<f64>) -> Vector3<f64>;
    fn equatorial_to_horizontal(&self, v: &Vector3<f64>) -> Vector3<f64>;
}

pub fn horizontal_to_equatorial<O: ObserverFrame + ?Sized>(
    observer: &O,
    az_alt: AzAlt<Radians>,
) -> RaDec<Radians> {
    let rect = observer.horizontal_to_equatorial(&spherical_to_rect(az_alt));
    rect_to_spherical(&rect)
}

pub fn equatorial_to_horizontal<O: ObserverFrame + ?Sized>(
    observer: &O,
    ra_dec: RaDec<Radians>,
) -> AzAlt<Radians> {
    let rect = observer.equatorial_to_horizontal(&spherical_to_rect(ra_dec));
    rect_to_spherical(&rect)
}

/// Device-frame reading (degrees) straight to J2000 (radians).
pub fn device_degrees_to_equatorial<O: ObserverFrame + ?Sized>(
    observer: &O,
    aim: DeviceAngles<Degrees>,
) -> RaDec<Radians> {
    horizontal_to_equatorial(observer, device_frame_to_horizontal(aim.to_radians()))
}

/// Horizontal unit vector the host should look along to see `aim`.
pub fn device_degrees_to_horizontal_rect(aim: DeviceAngles<Degrees>) -> Vector3<f64> {
    spherical_to_rect(device_frame_to_horizontal(aim.to_radians()))
}

/// Equatorial view direction of the host expressed as a device-frame reading.
pub fn equatorial_rect_to_device_degrees<O: ObserverFrame + ?Sized>(
    observer: &O,
    direction: &Vector3<f64>,
) -> DeviceAngles<Degrees> {
    let horizontal = observer.equatorial_to_horizontal(direction);
    horizontal_to_device_frame(rect_to_spherical(&horizontal)).to_degrees()
}
