//! `sumo-runtime` – the two reactive loops of the Sumo bridge.
//!
//! # Modules
//!
//! - [`bridge`] – [`TelemetryBridge`][bridge::TelemetryBridge]: forwards the
//!   command topics to a [`SumoDriver`][sumo_hal::SumoDriver] and publishes
//!   every robot state change on its telemetry topic, mirrored into the
//!   parameter store.  Camera frames are decoded and published only while
//!   `rgb` has a consumer.
//! - [`teleop`] – [`arbitrate`][teleop::arbitrate] and
//!   [`TeleopNode`][teleop::TeleopNode]: turn raw joystick samples into
//!   discrete robot commands on rising edges, falling back to a velocity
//!   command.
//! - [`edge`] – [`EdgeDetector`][edge::EdgeDetector] and the axis/button
//!   activity thresholds.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with optional OTLP export.

pub mod bridge;
pub mod edge;
pub mod telemetry;
pub mod teleop;

pub use bridge::{BridgeConfig, TelemetryBridge, run_bridge};
pub use edge::EdgeDetector;
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use teleop::{TeleopConfig, TeleopNode, TeleopState, arbitrate};
