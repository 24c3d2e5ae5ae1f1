//! Robot state tracking and change notifications.
//!
//! A [`SumoDriver`][crate::driver::SumoDriver] reports state transitions as
//! [`RobotEvent`] values through the [`StateNotifier`] it receives on
//! connect.  [`RobotState`] records the last known value of every field and
//! tells whether a new value is an actual change, so both the driver and the
//! bridge can ignore repeats.

use sumo_types::{Alert, Posture, Telemetry};
use tokio::sync::mpsc;

/// Change notification emitted by the robot abstraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotEvent {
    /// A telemetry field took a new value.
    Changed(Telemetry),
    /// A new video frame was received from the robot.
    FrameAvailable,
}

/// Sending half of the driver-to-bridge notification channel.
#[derive(Debug, Clone)]
pub struct StateNotifier {
    tx: mpsc::UnboundedSender<RobotEvent>,
}

impl StateNotifier {
    /// Create a notifier and the receiver the bridge loop reads from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RobotEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver `event`.  Returns `false` once the receiving side is gone.
    pub fn notify(&self, event: RobotEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Last known value of each robot telemetry field.
///
/// Fields are `None` until first observed, so the first report of any value
/// always counts as a change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotState {
    pub battery_percentage: Option<u8>,
    pub posture: Option<Posture>,
    pub volume: Option<u8>,
    pub alert: Option<Alert>,
    pub link_quality: Option<u8>,
    pub outdoor: Option<u8>,
}

impl RobotState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value`. Returns `true` if it differs from the stored value.
    pub fn apply(&mut self, value: Telemetry) -> bool {
        match value {
            Telemetry::BatteryPercentage(v) => replace(&mut self.battery_percentage, v),
            Telemetry::Posture(v) => replace(&mut self.posture, v),
            Telemetry::Volume(v) => replace(&mut self.volume, v),
            Telemetry::Alert(v) => replace(&mut self.alert, v),
            Telemetry::LinkQuality(v) => replace(&mut self.link_quality, v),
            Telemetry::Outdoor(v) => replace(&mut self.outdoor, v),
        }
    }
}

fn replace<T: PartialEq>(slot: &mut Option<T>, value: T) -> bool {
    if slot.as_ref() == Some(&value) {
        return false;
    }
    *slot = Some(value);
    true
}
