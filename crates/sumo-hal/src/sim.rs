//! In-process simulated robot for CI/CD testing without physical hardware.
//!
//! [`SimSumo`] implements [`SumoDriver`] by recording every primitive call
//! and letting tests inject state changes and camera frames.  This lets the
//! bridge run in headless tests and CI pipelines without a robot on the
//! network.
//!
//! # Example
//!
//! ```rust
//! use sumo_hal::sim::{DriverCall, SimSumo};
//! use sumo_hal::{StateNotifier, SumoDriver};
//!
//! let mut robot = SimSumo::new();
//! let (notifier, _events) = StateNotifier::channel();
//! robot.connect(notifier).expect("sim connect must succeed");
//!
//! robot.high_jump().expect("sim jump must succeed");
//! assert_eq!(robot.calls(), &[DriverCall::HighJump]);
//! ```

use sumo_types::{Alert, Posture, SumoError, Telemetry};
use tracing::debug;

use crate::driver::SumoDriver;
use crate::frame::VideoFrame;
use crate::state::{RobotEvent, RobotState, StateNotifier};

/// A primitive call received by [`SimSumo`].
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    SetSpeeds { linear: f32, angular: f32 },
    SetPosture(String),
    Anim(String),
    SharpTurn(f32),
    HighJump,
    LongJump,
}

/// Simulated robot.
///
/// * Connecting reports a plausible initial state (full battery, standing,
///   no alert, good link).
/// * `set_posture` with a known name is echoed back as a posture change,
///   the way the real robot reports the new posture once it is reached.
/// * Pushed frames are only handed out while decoding is enabled.
#[derive(Debug, Default)]
pub struct SimSumo {
    unreachable: bool,
    notifier: Option<StateNotifier>,
    state: RobotState,
    calls: Vec<DriverCall>,
    decoding: bool,
    frame: Option<VideoFrame>,
    frame_requests: usize,
}

impl SimSumo {
    /// Create a simulated robot that accepts connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a simulated robot whose `connect` always fails.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Every primitive call received so far, oldest first.
    pub fn calls(&self) -> &[DriverCall] {
        &self.calls
    }

    /// Drain the recorded primitive calls.
    pub fn take_calls(&mut self) -> Vec<DriverCall> {
        std::mem::take(&mut self.calls)
    }

    /// Number of times [`SumoDriver::latest_frame`] was called.
    pub fn frame_requests(&self) -> usize {
        self.frame_requests
    }

    /// State as last reported to the bridge.
    pub fn state(&self) -> &RobotState {
        &self.state
    }

    /// Simulate a state transition on the robot.
    ///
    /// The bridge is notified only when the value actually changed. Returns
    /// whether a notification was sent.
    pub fn inject(&mut self, value: Telemetry) -> bool {
        if !self.state.apply(value) {
            return false;
        }
        self.notify(RobotEvent::Changed(value))
    }

    /// Simulate the firmware reporting raw posture code `code`
    /// (0 standing, 1 jumper, 2 kicker, anything else unknown).
    pub fn inject_posture_code(&mut self, code: u8) -> bool {
        self.inject(Telemetry::Posture(Posture::from_code(code)))
    }

    /// Simulate the firmware reporting raw alert code `code`
    /// (0 none, 1 critical battery, 2 low battery, anything else unknown).
    pub fn inject_alert_code(&mut self, code: u8) -> bool {
        self.inject(Telemetry::Alert(Alert::from_code(code)))
    }

    /// Simulate a frame arriving on the video stream.
    pub fn push_frame(&mut self, frame: VideoFrame) -> bool {
        self.frame = Some(frame);
        self.notify(RobotEvent::FrameAvailable)
    }

    fn notify(&self, event: RobotEvent) -> bool {
        match &self.notifier {
            Some(notifier) => notifier.notify(event),
            None => false,
        }
    }

    fn record(&mut self, call: DriverCall) -> Result<(), SumoError> {
        if self.notifier.is_none() {
            return Err(SumoError::Driver {
                component: "sim_sumo".to_string(),
                details: format!("{call:?} before connect"),
            });
        }
        debug!(?call, "sim robot primitive");
        self.calls.push(call);
        Ok(())
    }
}

impl SumoDriver for SimSumo {
    fn connect(&mut self, notifier: StateNotifier) -> Result<(), SumoError> {
        if self.unreachable {
            return Err(SumoError::ConnectionFailed(
                "simulated robot is unreachable".to_string(),
            ));
        }
        self.notifier = Some(notifier);
        // Power-on state as the firmware reports it.
        self.inject(Telemetry::BatteryPercentage(100));
        self.inject_posture_code(0);
        self.inject(Telemetry::Volume(0));
        self.inject_alert_code(0);
        self.inject(Telemetry::LinkQuality(5));
        self.inject(Telemetry::Outdoor(0));
        Ok(())
    }

    fn set_speeds(&mut self, linear: f32, angular: f32) -> Result<(), SumoError> {
        self.record(DriverCall::SetSpeeds { linear, angular })
    }

    fn set_posture(&mut self, posture: &str) -> Result<(), SumoError> {
        self.record(DriverCall::SetPosture(posture.to_string()))?;
        if let Ok(reached) = posture.parse::<Posture>() {
            self.inject(Telemetry::Posture(reached));
        }
        Ok(())
    }

    fn anim(&mut self, name: &str) -> Result<(), SumoError> {
        self.record(DriverCall::Anim(name.to_string()))
    }

    fn sharp_turn(&mut self, angle_rad: f32) -> Result<(), SumoError> {
        self.record(DriverCall::SharpTurn(angle_rad))
    }

    fn high_jump(&mut self) -> Result<(), SumoError> {
        self.record(DriverCall::HighJump)
    }

    fn long_jump(&mut self) -> Result<(), SumoError> {
        self.record(DriverCall::LongJump)
    }

    fn latest_frame(&mut self) -> Result<VideoFrame, SumoError> {
        self.frame_requests += 1;
        if !self.decoding {
            return Ok(VideoFrame::empty());
        }
        Ok(self.frame.clone().unwrap_or_default())
    }

    fn enable_frame_decoding(&mut self) {
        self.decoding = true;
    }

    fn disable_frame_decoding(&mut self) {
        self.decoding = false;
    }

    fn frame_decoding_enabled(&self) -> bool {
        self.decoding
    }
}
