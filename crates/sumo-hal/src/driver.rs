//! The `SumoDriver` capability trait.
//!
//! The wireless transport, motor control and MJPEG decoding of the robot live
//! behind this trait.  The bridge only ever talks to the trait, so the
//! physical driver and [`SimSumo`][crate::sim::SimSumo] are interchangeable.

use sumo_types::SumoError;

use crate::frame::VideoFrame;
use crate::state::StateNotifier;

/// Control surface of a jumping robot.
///
/// Primitive calls are one-shot and do not wait for the robot to finish the
/// motion.  State changes are pushed through the [`StateNotifier`] handed to
/// [`connect`][Self::connect], at most once per actual transition.
pub trait SumoDriver: Send {
    /// Establish the link to the robot and start reporting state changes to
    /// `notifier`.
    ///
    /// # Errors
    ///
    /// Returns [`SumoError::ConnectionFailed`] when the robot cannot be
    /// reached.  Callers must not use the driver after a failed connect.
    fn connect(&mut self, notifier: StateNotifier) -> Result<(), SumoError>;

    /// Continuous motion: `linear` in m/s, `angular` in rad/s in the robot's
    /// own sign convention.
    fn set_speeds(&mut self, linear: f32, angular: f32) -> Result<(), SumoError>;

    /// Switch to a predefined posture ("standing", "kicker", "jumper").
    fn set_posture(&mut self, posture: &str) -> Result<(), SumoError>;

    /// Play a predefined animation (metronome, ondulation, slalom,
    /// slowshake, spin, spinJump, spinToPosture, spiral, tap).
    fn anim(&mut self, name: &str) -> Result<(), SumoError>;

    /// On-the-spot turn. Positive angles turn counter-clockwise.
    fn sharp_turn(&mut self, angle_rad: f32) -> Result<(), SumoError>;

    fn high_jump(&mut self) -> Result<(), SumoError>;

    fn long_jump(&mut self) -> Result<(), SumoError>;

    /// Return the most recently decoded frame without blocking.
    ///
    /// The frame is empty when decoding is disabled or nothing has been
    /// decoded yet.
    fn latest_frame(&mut self) -> Result<VideoFrame, SumoError>;

    /// Start decoding the incoming video stream.
    fn enable_frame_decoding(&mut self);

    /// Stop decoding the incoming video stream.
    fn disable_frame_decoding(&mut self);

    fn frame_decoding_enabled(&self) -> bool;
}
