use chrono::{TimeZone, Utc};
use nalgebra::Vector3;
use pushto_core::codec::{encode_command, try_decode_frame, FRAME_LEN};
use pushto_core::coords::{device_degrees_to_horizontal_rect, AnglePair};
use pushto_core::link::testing::MockOpener;
use pushto_core::{
    LinkSettings, MountSession, ObserverFrame, ObserverLocation, SiderealObserverFrame, Tag,
    TrackingController, TrackingState, ViewMovement,
};

/// Host view kept in horizontal coordinates, optionally snapping to every
/// requested target.
struct TestView {
    observer: SiderealObserverFrame,
    horizontal: Vector3<f64>,
    follow: bool,
    moves: Vec<Vector3<f64>>,
}

impl TestView {
    fn new(observer: SiderealObserverFrame, az: f64, alt: f64, follow: bool) -> Self {
        Self {
            observer,
            horizontal: device_degrees_to_horizontal_rect(AnglePair::new(az, alt)),
            follow,
            moves: Vec::new(),
        }
    }
}

impl ViewMovement for TestView {
    fn view_direction_equatorial(&self) -> Vector3<f64> {
        self.observer.horizontal_to_equatorial(&self.horizontal)
    }

    fn move_view_to(&mut self, direction: Vector3<f64>, _up: Vector3<f64>, _duration: f64) {
        self.moves.push(direction);
        if self.follow {
            self.horizontal = direction;
        }
    }

    fn set_tracking_enabled(&mut self, _enabled: bool) {}

    fn set_equatorial_mount_mode(&mut self, _enabled: bool) {}
}

fn observer() -> SiderealObserverFrame {
    let site = ObserverLocation {
        latitude: 45.503575,
        longitude: -73.587090,
        altitude: 100.0,
    };
    SiderealObserverFrame::new(site, Utc.with_ymd_and_hms(2026, 10, 19, 23, 0, 0).unwrap())
}

fn connected_session(opener: &MockOpener) -> MountSession<MockOpener> {
    let mut session = MountSession::new(opener.clone(), LinkSettings::default());
    session.connect("/dev/ttyACM0").unwrap();
    session
}

fn pump(
    session: &mut MountSession<MockOpener>,
    controller: &mut TrackingController,
    view: &mut TestView,
) {
    session.poll().unwrap();
    for event in session.take_events() {
        controller.handle_event(&event, view);
    }
}

#[test]
fn test_device_report_becomes_session_aim() {
    let opener = MockOpener::new();
    let mut session = connected_session(&opener);

    opener.feed(&encode_command(Tag::DeviceNormal, 45.0, 30.0));
    session.poll().unwrap();

    assert_eq!(session.device_aim(), Some(AnglePair::new(45.0, 30.0)));
    assert!(!session.device_reports_error());
    assert!(session.has_device_aim());
}

#[test]
fn test_aim_command_while_disconnected_writes_nothing() {
    let opener = MockOpener::new();
    let mut session = MountSession::new(opener.clone(), LinkSettings::default());

    assert_eq!(session.send_aim_command(AnglePair::new(10.0, 20.0)), Ok(false));
    assert!(opener.written().is_empty());
}

#[test]
fn test_center_times_out_when_view_stays_put() {
    let opener = MockOpener::new();
    let observer = observer();
    let mut session = connected_session(&opener);
    let mut view = TestView::new(observer, 10.0, 10.0, false);
    let mut controller = TrackingController::new();

    opener.feed(&encode_command(Tag::DeviceNormal, 45.0, 30.0));
    pump(&mut session, &mut controller, &mut view);

    assert!(controller.start_tracking(&session, &mut view));
    assert_eq!(controller.state(), TrackingState::SlewingToDevice);

    for _ in 0..8 {
        controller.tick(0.2, &mut session, &mut view, &observer).unwrap();
    }
    assert_eq!(controller.state(), TrackingState::Idle);
    assert!(!controller.is_tracking());
}

#[test]
fn test_tracking_follows_device_and_stops_on_disconnect() {
    let opener = MockOpener::new();
    let observer = observer();
    let mut session = connected_session(&opener);
    let mut view = TestView::new(observer, 10.0, 10.0, true);
    let mut controller = TrackingController::new();

    opener.feed(&encode_command(Tag::DeviceNormal, 45.0, 30.0));
    pump(&mut session, &mut controller, &mut view);
    assert!(controller.start_tracking(&session, &mut view));
    controller.tick(0.05, &mut session, &mut view, &observer).unwrap();
    assert_eq!(controller.state(), TrackingState::Tracking);

    // Two arc-minutes in altitude.
    opener.feed(&encode_command(Tag::DeviceNormal, 45.0, 30.0 + 2.0 / 60.0));
    pump(&mut session, &mut controller, &mut view);
    assert_eq!(view.moves.len(), 2);
    assert_ne!(view.moves[0], view.moves[1]);
    controller.tick(0.05, &mut session, &mut view, &observer).unwrap();
    assert_eq!(controller.state(), TrackingState::Tracking);

    session.disconnect();
    for event in session.take_events() {
        controller.handle_event(&event, &mut view);
    }
    assert_eq!(controller.state(), TrackingState::Idle);
    assert!(!session.has_device_aim());
}

#[test]
fn test_split_stream_and_equatorial_publish() {
    let opener = MockOpener::new();
    let observer = observer();
    let mut session = connected_session(&opener);
    let mut view = TestView::new(observer, 10.0, 10.0, false);
    let mut controller = TrackingController::new();

    let mut stream = encode_command(Tag::DeviceNormal, 120.0, 15.0).to_vec();
    stream.extend_from_slice(&encode_command(Tag::DeviceNormal, 121.0, 15.5));
    opener.feed(&stream[..7]);
    pump(&mut session, &mut controller, &mut view);
    assert!(!session.has_device_aim());

    opener.feed(&stream[7..]);
    pump(&mut session, &mut controller, &mut view);
    assert_eq!(session.device_aim(), Some(AnglePair::new(121.0, 15.5)));
    assert_eq!(session.link().frame_buffer().pending(), 0);

    controller.tick(0.05, &mut session, &mut view, &observer).unwrap();
    let written = opener.written();
    assert_eq!(written.len(), FRAME_LEN);
    let packet = try_decode_frame(&written).unwrap().unwrap();
    assert_eq!(packet.tag, Tag::EquatorialTarget);
}
