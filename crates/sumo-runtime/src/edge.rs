//! [`EdgeDetector`] – rising-edge detection over a sampled condition.
//!
//! Each monitored joystick axis or button is either *idle* or *active* on a
//! given sample.  The detector remembers the previous state and reports a
//! rising edge only on the idle → active transition, so a press held for
//! many samples fires exactly once and must be released before it can fire
//! again.
//!
//! # Example
//!
//! ```rust
//! use sumo_runtime::edge::EdgeDetector;
//!
//! let mut edge = EdgeDetector::new();
//!
//! assert!(edge.update(true)); // pressed → fires
//! assert!(!edge.update(true)); // still held → silent
//! assert!(!edge.update(false)); // released → silent
//! assert!(edge.update(true)); // pressed again → fires
//! ```

/// An axis is active when its magnitude exceeds this value.
pub const AXIS_THRESHOLD: f32 = 0.9;

/// `true` when an axis reading counts as active.
pub fn axis_active(value: f32) -> bool {
    value.abs() > AXIS_THRESHOLD
}

/// `true` when a button reading counts as active.
pub fn button_active(value: i32) -> bool {
    value != 0
}

/// Two-state (idle/active) rising-edge detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeDetector {
    /// State observed on the previous sample.
    active: bool,
}

impl EdgeDetector {
    /// Create a detector in the idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the current state. Returns `true` on an idle → active transition.
    pub fn update(&mut self, active: bool) -> bool {
        let rising = active && !self.active;
        self.active = active;
        rising
    }
}
