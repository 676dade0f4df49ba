//! Stand-in for a planetarium view.
//!
//! Holds a view direction in the horizontal frame and plays move requests
//! back over their duration. With host tracking on the view stays fixed on
//! the sky instead, drifting in alt/az as time passes.

use nalgebra::Vector3;
use pushto_core::coords::{device_degrees_to_horizontal_rect, AnglePair};
use pushto_core::{ObserverFrame, SiderealObserverFrame, ViewMovement};

#[derive(Debug, Clone, Copy)]
struct Animation {
    from: Vector3<f64>,
    to: Vector3<f64>,
    duration: f64,
    elapsed: f64,
}

#[derive(Debug, Clone)]
pub struct SimulatedView {
    observer: SiderealObserverFrame,
    horizontal: Vector3<f64>,
    animation: Option<Animation>,
    host_tracking: bool,
    equatorial_mount: bool,
}

impl SimulatedView {
    /// Starts out looking due south, 45° up.
    pub fn new(observer: SiderealObserverFrame) -> Self {
        Self {
            observer,
            horizontal: device_degrees_to_horizontal_rect(AnglePair::new(180.0, 45.0)),
            animation: None,
            host_tracking: false,
            equatorial_mount: false,
        }
    }

    /// Moves the observer to a new instant. A tracking view keeps its
    /// equatorial direction, others keep their alt/az.
    pub fn set_observer(&mut self, observer: SiderealObserverFrame) {
        if self.host_tracking && self.animation.is_none() {
            let equatorial = self.view_direction_equatorial();
            self.horizontal = observer.equatorial_to_horizontal(&equatorial);
        }
        self.observer = observer;
    }

    /// Plays the running animation forward by `dt_secs`.
    pub fn advance(&mut self, dt_secs: f64) {
        let Some(animation) = self.animation.as_mut() else {
            return;
        };

        animation.elapsed += dt_secs;
        if animation.elapsed >= animation.duration {
            self.horizontal = animation.to;
            self.animation = None;
            return;
        }

        let t = animation.elapsed / animation.duration;
        let blended = animation.from.lerp(&animation.to, t);
        // Opposite endpoints blend through the origin.
        if blended.norm() > 1e-9 {
            self.horizontal = blended.normalize();
        }
    }

    /// Points the view by hand at a device-frame az/alt in degrees,
    /// cancelling any animation.
    pub fn look_at(&mut self, az: f64, alt: f64) {
        self.animation = None;
        self.horizontal = device_degrees_to_horizontal_rect(AnglePair::new(az, alt));
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    pub fn host_tracking(&self) -> bool {
        self.host_tracking
    }

    pub fn equatorial_mount(&self) -> bool {
        self.equatorial_mount
    }
}

impl ViewMovement for SimulatedView {
    fn view_direction_equatorial(&self) -> Vector3<f64> {
        self.observer.horizontal_to_equatorial(&self.horizontal)
    }

    fn move_view_to(&mut self, direction: Vector3<f64>, _up: Vector3<f64>, duration_secs: f64) {
        let to = direction.normalize();
        if duration_secs <= 0.0 {
            self.animation = None;
            self.horizontal = to;
            return;
        }
        self.animation = Some(Animation {
            from: self.horizontal,
            to,
            duration: duration_secs,
            elapsed: 0.0,
        });
    }

    fn set_tracking_enabled(&mut self, enabled: bool) {
        self.host_tracking = enabled;
    }

    fn set_equatorial_mount_mode(&mut self, enabled: bool) {
        self.equatorial_mount = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pushto_core::coords::equatorial_rect_to_device_degrees;
    use pushto_core::ObserverLocation;

    fn observer() -> SiderealObserverFrame {
        let site = ObserverLocation {
            latitude: 45.5,
            longitude: -73.6,
            altitude: 100.0,
        };
        SiderealObserverFrame::new(site, Utc.with_ymd_and_hms(2026, 10, 19, 23, 0, 0).unwrap())
    }

    fn device_aim(view: &SimulatedView) -> (f64, f64) {
        let aim = equatorial_rect_to_device_degrees(&view.observer, &view.view_direction_equatorial());
        (aim.first.rem_euclid(360.0), aim.second)
    }

    #[test]
    fn test_instant_move() {
        let mut view = SimulatedView::new(observer());
        view.move_view_to(device_degrees_to_horizontal_rect(AnglePair::new(45.0, 30.0)), Vector3::z(), 0.0);

        let (az, alt) = device_aim(&view);
        assert!((az - 45.0).abs() < 1e-9);
        assert!((alt - 30.0).abs() < 1e-9);
        assert!(!view.is_animating());
    }

    #[test]
    fn test_animated_move_arrives_after_duration() {
        let mut view = SimulatedView::new(observer());
        view.look_at(10.0, 10.0);
        view.move_view_to(device_degrees_to_horizontal_rect(AnglePair::new(45.0, 30.0)), Vector3::z(), 1.0);

        view.advance(0.5);
        let (az, _) = device_aim(&view);
        assert!(az > 10.0 && az < 45.0);
        assert!(view.is_animating());

        view.advance(0.6);
        let (az, alt) = device_aim(&view);
        assert!((az - 45.0).abs() < 1e-9);
        assert!((alt - 30.0).abs() < 1e-9);
        assert!(!view.is_animating());
    }

    #[test]
    fn test_look_at_cancels_animation() {
        let mut view = SimulatedView::new(observer());
        view.move_view_to(device_degrees_to_horizontal_rect(AnglePair::new(45.0, 30.0)), Vector3::z(), 1.0);
        view.look_at(200.0, 20.0);
        view.advance(2.0);

        let (az, alt) = device_aim(&view);
        assert!((az - 200.0).abs() < 1e-9);
        assert!((alt - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_tracking_view_drifts_in_alt_az() {
        let start = observer();
        let mut later = start;
        later.set_time(Utc.with_ymd_and_hms(2026, 10, 19, 23, 10, 0).unwrap());

        let mut fixed = SimulatedView::new(start);
        fixed.look_at(180.0, 40.0);
        let mut tracking = fixed.clone();
        tracking.set_tracking_enabled(true);

        fixed.set_observer(later);
        tracking.set_observer(later);

        let (az, alt) = device_aim(&fixed);
        assert!((az - 180.0).abs() < 1e-9 && (alt - 40.0).abs() < 1e-9);
        let (az, _) = device_aim(&tracking);
        assert!((az - 180.0).abs() > 0.5);
    }
}
