//! Tracking controller module.
//!
//! Keeps the host's view and the telescope in step. Two user requests drive
//! it: "center on the telescope" (a one-shot slew) and "track the telescope"
//! (follow every reported aim until the user looks elsewhere). A periodic
//! [`TrackingController::tick`] settles slews, notices when the user has taken
//! the view over, and publishes the J2000 position of the telescope back to
//! the device.

use crate::coords::{
    device_degrees_to_equatorial, device_degrees_to_horizontal_rect,
    equatorial_rect_to_device_degrees, DeviceAngles, Degrees, ObserverFrame, RaDec, Radians,
};
use crate::link::PortOpener;
use crate::session::{MountSession, SessionEvent};
use crate::PushToResult;
use log::{debug, info};
use nalgebra::Vector3;

/// A slew that has not reached its target after this long is abandoned.
pub const SLEW_TIMEOUT_SECS: f64 = 1.5;

/// Two device-frame aims closer than this (degrees) are the same aim.
pub const AIM_MATCH_TOLERANCE: f64 = 1e-5;

/// Smallest change of the J2000 aim (radians, about 6") worth sending.
pub const EQUATORIAL_RESEND_TOLERANCE: f64 = 0.00003;

/// Animation length when centering on the telescope.
pub const CENTER_MOVE_DURATION_SECS: f64 = 1.0;

/// Follow moves while tracking jump straight to the new aim.
const FOLLOW_MOVE_DURATION_SECS: f64 = 0.0;

/// The part of the host application that owns the view direction.
pub trait ViewMovement {
    /// Current view direction as a J2000 unit vector.
    fn view_direction_equatorial(&self) -> Vector3<f64>;

    /// Animates the view to `direction`, a unit vector in the horizontal
    /// frame, over `duration_secs`.
    fn move_view_to(&mut self, direction: Vector3<f64>, up: Vector3<f64>, duration_secs: f64);

    /// Host-side sidereal tracking of the view.
    fn set_tracking_enabled(&mut self, enabled: bool);

    fn set_equatorial_mount_mode(&mut self, enabled: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    Idle,
    SlewingToDevice,
    Tracking,
}

#[derive(Debug, Clone, Copy)]
struct Slew {
    target: DeviceAngles<Degrees>,
    elapsed: f64,
}

#[derive(Debug, Default)]
pub struct TrackingController {
    tracking: bool,
    slew: Option<Slew>,
    /// Last aim the view was sent to while following the telescope.
    follow_target: Option<DeviceAngles<Degrees>>,
    last_equatorial: Option<RaDec<Radians>>,
}

impl TrackingController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TrackingState {
        match (self.slew.is_some(), self.tracking) {
            (true, _) => TrackingState::SlewingToDevice,
            (false, true) => TrackingState::Tracking,
            (false, false) => TrackingState::Idle,
        }
    }

    /// Whether the view follows the telescope, slewing or not.
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Where the user is looking, as a device-frame reading.
    pub fn user_aim<V, F>(view: &V, observer: &F) -> DeviceAngles<Degrees>
    where
        V: ViewMovement + ?Sized,
        F: ObserverFrame + ?Sized,
    {
        equatorial_rect_to_device_degrees(observer, &view.view_direction_equatorial())
    }

    /// Slews the view onto the telescope. Ignored until the device has
    /// reported an aim on the current connection.
    pub fn center_on_device<O, V>(&mut self, session: &MountSession<O>, view: &mut V) -> bool
    where
        O: PortOpener,
        V: ViewMovement + ?Sized,
    {
        let Some(aim) = session.device_aim().filter(|_| session.is_connected()) else {
            debug!("Center request ignored, no telescope aim yet");
            return false;
        };

        view.set_equatorial_mount_mode(false);
        view.set_tracking_enabled(false);
        self.slew_to(aim, CENTER_MOVE_DURATION_SECS, view);
        info!(
            "Centering on telescope at az {:.4}°, alt {:.4}°",
            aim.first, aim.second
        );
        true
    }

    /// Centers on the telescope and keeps following it.
    pub fn start_tracking<O, V>(&mut self, session: &MountSession<O>, view: &mut V) -> bool
    where
        O: PortOpener,
        V: ViewMovement + ?Sized,
    {
        if !self.center_on_device(session, view) {
            debug!("Track request ignored, not connected or no telescope aim yet");
            return false;
        }
        if !self.tracking {
            info!("Tracking telescope");
        }
        self.tracking = true;
        true
    }

    pub fn stop_tracking(&mut self) {
        if self.tracking {
            info!("Stopped tracking telescope");
        }
        self.tracking = false;
        self.follow_target = None;
    }

    /// Tells the device it is pointing where the user is looking.
    pub fn sync_device_to_view<O, V, F>(
        &mut self,
        session: &mut MountSession<O>,
        view: &V,
        observer: &F,
    ) -> PushToResult<bool>
    where
        O: PortOpener,
        V: ViewMovement + ?Sized,
        F: ObserverFrame + ?Sized,
    {
        if !session.is_connected() {
            debug!("Sync request ignored, not connected");
            return Ok(false);
        }

        let aim = Self::user_aim(view, observer);
        info!(
            "Aligning telescope to az {:.4}°, alt {:.4}°",
            aim.first, aim.second
        );
        session.align_to(aim)
    }

    /// Reacts to one session event.
    pub fn handle_event<V>(&mut self, event: &SessionEvent, view: &mut V)
    where
        V: ViewMovement + ?Sized,
    {
        match event {
            SessionEvent::Connected { .. } | SessionEvent::Disconnected => {
                self.stop_tracking();
                self.slew = None;
                self.last_equatorial = None;
            }
            SessionEvent::AimUpdated(aim) if self.tracking => {
                // A repeated report must not pull the view back from where
                // the user moved it.
                let moved = self
                    .follow_target
                    .map_or(true, |last| last.wrapped_distance(aim) >= AIM_MATCH_TOLERANCE);
                if moved {
                    view.set_equatorial_mount_mode(false);
                    self.slew_to(*aim, FOLLOW_MOVE_DURATION_SECS, view);
                }
            }
            _ => {}
        }
    }

    /// Periodic update, `dt_secs` since the previous call.
    pub fn tick<O, V, F>(
        &mut self,
        dt_secs: f64,
        session: &mut MountSession<O>,
        view: &mut V,
        observer: &F,
    ) -> PushToResult<()>
    where
        O: PortOpener,
        V: ViewMovement + ?Sized,
        F: ObserverFrame + ?Sized,
    {
        let current = Self::user_aim(view, observer);

        if let Some(slew) = self.slew.as_mut() {
            slew.elapsed += dt_secs;
            if slew.elapsed > SLEW_TIMEOUT_SECS {
                // Something else took the view over mid-slew.
                info!("Slew to telescope timed out after {:.2}s", slew.elapsed);
                self.slew = None;
                self.stop_tracking();
            } else if current.wrapped_distance(&slew.target) < AIM_MATCH_TOLERANCE {
                debug!("Slew settled after {:.2}s", slew.elapsed);
                self.slew = None;
            }
        } else if self.tracking {
            if let Some(aim) = session.device_aim() {
                if current.wrapped_distance(&aim) >= AIM_MATCH_TOLERANCE {
                    info!("View moved away from the telescope");
                    self.stop_tracking();
                }
            }
        }

        self.publish_equatorial(session, observer)
    }

    fn slew_to<V>(&mut self, target: DeviceAngles<Degrees>, duration_secs: f64, view: &mut V)
    where
        V: ViewMovement + ?Sized,
    {
        self.slew = Some(Slew {
            target,
            elapsed: 0.0,
        });
        self.follow_target = Some(target);
        view.move_view_to(
            device_degrees_to_horizontal_rect(target),
            Vector3::z(),
            duration_secs,
        );
    }

    fn publish_equatorial<O, F>(
        &mut self,
        session: &mut MountSession<O>,
        observer: &F,
    ) -> PushToResult<()>
    where
        O: PortOpener,
        F: ObserverFrame + ?Sized,
    {
        if !session.is_connected() {
            return Ok(());
        }
        let Some(aim) = session.device_aim() else {
            return Ok(());
        };

        let ra_dec = device_degrees_to_equatorial(observer, aim);
        let changed = self
            .last_equatorial
            .map_or(true, |last| last.distance(&ra_dec) > EQUATORIAL_RESEND_TOLERANCE);
        if changed && session.send_equatorial_target(ra_dec)? {
            self.last_equatorial = Some(ra_dec);
        }
        Ok(())
    }
}
