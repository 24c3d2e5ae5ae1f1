//! Joystick teleoperation: the input arbitrator.
//!
//! Converts the stream of raw [`JoySample`] reports published on `joy` into
//! robot [`Command`]s.  Each tick:
//!
//! 1. **90° turn axis** – rising edge → sharp turn of +π/2 when the axis is
//!    pushed negative, −π/2 otherwise.
//! 2. **180° turn axis** – rising edge → sharp turn of +2π when the axis is
//!    pushed positive, −π otherwise.
//! 3. **High-jump button** – rising edge → high jump.
//! 4. **Posture button** – rising edge → advance the posture cycle
//!    standing → jumper → kicker → standing and request it.
//! 5. **Animation button** – rising edge → the `"tap"` animation.
//! 6. **Fallback** – if none of the above fired, a velocity command built
//!    from the raw linear/angular axes times their scale factors.
//!
//! All five detectors run on every tick; they only exclude the velocity
//! fallback, not each other.
//!
//! Bindings are plain indices into the sample, so a sample shorter than the
//! highest configured index is rejected before any detector runs.

use std::f32::consts::{FRAC_PI_2, PI, TAU};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sumo_middleware::{EventBus, Topic};
use sumo_types::{Command, EventPayload, JoySample, Posture, SumoError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::edge::{EdgeDetector, axis_active, button_active};

/// Source tag stamped on events published by the arbitrator.
pub const TELEOP_SOURCE: &str = "sumo-runtime::teleop";

/// Animation played by the animation button.
pub const BUTTON_ANIMATION: &str = "tap";

/// How often the loop checks the shutdown flag while no sample arrives.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Axis/button bindings and velocity scaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeleopConfig {
    /// Axis driving forward/backward speed.
    pub axis_linear: usize,
    /// Axis driving rotation speed.
    pub axis_angular: usize,
    /// Axis triggering quarter turns.
    pub axis_90turn: usize,
    /// Axis triggering half turns.
    pub axis_180turn: usize,
    /// Button triggering a high jump.
    pub button_high_jump: usize,
    /// Button advancing the posture cycle.
    pub button_posture: usize,
    /// Button playing the `"tap"` animation.
    pub button_anim: usize,
    /// Multiplier from axis reading to m/s.
    pub scale_linear: f32,
    /// Multiplier from axis reading to rad/s.
    pub scale_angular: f32,
}

impl Default for TeleopConfig {
    fn default() -> Self {
        Self {
            axis_linear: 1,
            axis_angular: 2,
            axis_90turn: 3,
            axis_180turn: 4,
            button_high_jump: 1,
            button_posture: 2,
            button_anim: 3,
            scale_linear: 1.0,
            scale_angular: 1.0,
        }
    }
}

impl TeleopConfig {
    /// Highest axis index referenced by the bindings.
    pub fn max_axis(&self) -> usize {
        self.axis_linear
            .max(self.axis_angular)
            .max(self.axis_90turn)
            .max(self.axis_180turn)
    }

    /// Highest button index referenced by the bindings.
    pub fn max_button(&self) -> usize {
        self.button_high_jump
            .max(self.button_posture)
            .max(self.button_anim)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

/// Mutable arbitrator state carried from one tick to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeleopState {
    turn_90: EdgeDetector,
    turn_180: EdgeDetector,
    high_jump: EdgeDetector,
    posture_button: EdgeDetector,
    anim_button: EdgeDetector,
    /// Last posture requested through the posture button.
    posture: Posture,
}

impl Default for TeleopState {
    fn default() -> Self {
        Self::with_posture(Posture::Jumper)
    }
}

impl TeleopState {
    /// All detectors idle, posture cycle starting from `jumper`.
    pub fn new() -> Self {
        Self::default()
    }

    /// All detectors idle, posture cycle starting from `posture`.
    pub fn with_posture(posture: Posture) -> Self {
        Self {
            turn_90: EdgeDetector::new(),
            turn_180: EdgeDetector::new(),
            high_jump: EdgeDetector::new(),
            posture_button: EdgeDetector::new(),
            anim_button: EdgeDetector::new(),
            posture,
        }
    }

    /// Current value of the posture cycle.
    pub fn posture(&self) -> Posture {
        self.posture
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Arbitration
// ─────────────────────────────────────────────────────────────────────────────

/// Run one arbitration tick over `sample`.
///
/// Returns the commands to publish, in priority order.  At least one command
/// is returned for every accepted sample: either the discrete commands whose
/// edges fired, or a single velocity command.
///
/// # Errors
///
/// Returns [`SumoError::InvalidSample`] when the sample has too few axes or
/// buttons for the configured bindings.  `state` is left untouched.
pub fn arbitrate(
    config: &TeleopConfig,
    state: &mut TeleopState,
    sample: &JoySample,
) -> Result<Vec<Command>, SumoError> {
    let (naxes, nbuttons) = (sample.axes.len(), sample.buttons.len());
    if naxes <= config.max_axis() {
        return Err(SumoError::InvalidSample(format!(
            "expected at least {} axes, got {naxes}",
            config.max_axis() + 1
        )));
    }
    if nbuttons <= config.max_button() {
        return Err(SumoError::InvalidSample(format!(
            "expected at least {} buttons, got {nbuttons}",
            config.max_button() + 1
        )));
    }

    let axis = |index: usize| sample.axes[index];
    let button = |index: usize| sample.buttons[index];
    let mut commands = Vec::new();

    let turn_90 = axis(config.axis_90turn);
    if state.turn_90.update(axis_active(turn_90)) {
        let angle_rad = if turn_90 < 0.0 { FRAC_PI_2 } else { -FRAC_PI_2 };
        commands.push(Command::SharpTurn { angle_rad });
    }

    let turn_180 = axis(config.axis_180turn);
    if state.turn_180.update(axis_active(turn_180)) {
        let angle_rad = if turn_180 > 0.0 { TAU } else { -PI };
        commands.push(Command::SharpTurn { angle_rad });
    }

    if state
        .high_jump
        .update(button_active(button(config.button_high_jump)))
    {
        info!("starting high jump");
        commands.push(Command::HighJump);
    }

    if state
        .posture_button
        .update(button_active(button(config.button_posture)))
    {
        state.posture = state.posture.next_in_cycle();
        commands.push(Command::SetPosture(state.posture.as_str().to_string()));
    }

    if state
        .anim_button
        .update(button_active(button(config.button_anim)))
    {
        commands.push(Command::Animation(BUTTON_ANIMATION.to_string()));
    }

    if commands.is_empty() {
        commands.push(Command::Velocity {
            linear: axis(config.axis_linear) * config.scale_linear,
            angular: axis(config.axis_angular) * config.scale_angular,
        });
    }
    Ok(commands)
}

// ─────────────────────────────────────────────────────────────────────────────
// Node
// ─────────────────────────────────────────────────────────────────────────────

/// Bus-facing arbitrator: reads `joy`, publishes command topics.
pub struct TeleopNode {
    bus: Arc<EventBus>,
    config: TeleopConfig,
    state: TeleopState,
}

impl TeleopNode {
    pub fn new(bus: Arc<EventBus>, config: TeleopConfig) -> Self {
        Self {
            bus,
            config,
            state: TeleopState::new(),
        }
    }

    /// Arbitrate one sample and publish the resulting commands.
    ///
    /// Returns the number of commands emitted.
    ///
    /// # Errors
    ///
    /// Returns [`SumoError::InvalidSample`] for a sample too short for the
    /// bindings.  The rejection is logged at `warn` and nothing is published.
    pub fn handle_sample(&mut self, sample: &JoySample) -> Result<usize, SumoError> {
        let commands = arbitrate(&self.config, &mut self.state, sample).inspect_err(|e| {
            warn!(error = %e, "rejecting joystick sample");
        })?;
        let emitted = commands.len();
        for command in commands {
            if let Err(e) = self.bus.publish_command(TELEOP_SOURCE, command) {
                debug!(error = %e, "teleop command not delivered");
            }
        }
        Ok(emitted)
    }

    /// Process `joy` samples until `shutdown` is set or the bus closes.
    pub async fn run(mut self, shutdown: Arc<AtomicBool>) {
        let mut joy = self.bus.subscribe_to(Topic::Joy);
        let mut poll = tokio::time::interval(SHUTDOWN_POLL);
        info!(config = ?self.config, "teleop started");

        loop {
            tokio::select! {
                result = joy.recv() => match result {
                    Ok(event) => match event.payload {
                        EventPayload::Joy(sample) => {
                            // Rejections are already logged.
                            let _ = self.handle_sample(&sample);
                        }
                        other => debug!(payload = ?other, "ignoring non-joystick event"),
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(lagged_by = n, "teleop lagged behind joystick samples");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = poll.tick() => {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }
        info!("teleop stopped");
    }
}
