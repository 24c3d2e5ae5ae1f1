//! `sumo-hal` – the robot abstraction.
//!
//! Everything the bridge needs from the physical robot, behind one trait.
//!
//! # Modules
//!
//! - [`driver`] – [`SumoDriver`][driver::SumoDriver]: connect, motion,
//!   posture, animation, jump and video-decoding primitives.
//! - [`state`] – [`RobotEvent`][state::RobotEvent] change notifications, the
//!   [`StateNotifier`][state::StateNotifier] that carries them, and
//!   [`RobotState`][state::RobotState] change detection.
//! - [`frame`] – [`VideoFrame`][frame::VideoFrame], a decoded BGR8 image.
//! - [`sim`] – [`SimSumo`][sim::SimSumo]: a recording, scriptable robot for
//!   headless tests.

pub mod driver;
pub mod frame;
pub mod sim;
pub mod state;

pub use driver::SumoDriver;
pub use frame::VideoFrame;
pub use sim::{DriverCall, SimSumo};
pub use state::{RobotEvent, RobotState, StateNotifier};
