use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Discrete standing configuration of the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Posture {
    #[default]
    Unknown,
    Standing,
    Kicker,
    Jumper,
}

impl Posture {
    /// Decode the posture code reported by the robot.
    ///
    /// Codes outside the known range (including the firmware's "stuck"
    /// state) map to [`Posture::Unknown`].
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Posture::Standing,
            1 => Posture::Jumper,
            2 => Posture::Kicker,
            _ => Posture::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Posture::Unknown => "unknown",
            Posture::Standing => "standing",
            Posture::Kicker => "kicker",
            Posture::Jumper => "jumper",
        }
    }

    /// Next posture in the teleop cycle `standing -> jumper -> kicker -> standing`.
    ///
    /// Anything that is neither standing nor jumper advances to standing.
    pub fn next_in_cycle(self) -> Self {
        match self {
            Posture::Standing => Posture::Jumper,
            Posture::Jumper => Posture::Kicker,
            _ => Posture::Standing,
        }
    }
}

impl fmt::Display for Posture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Posture {
    type Err = SumoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Posture::Unknown),
            "standing" => Ok(Posture::Standing),
            "kicker" => Ok(Posture::Kicker),
            "jumper" => Ok(Posture::Jumper),
            other => Err(SumoError::Parsing(format!("unknown posture '{other}'"))),
        }
    }
}

/// Alert raised by the robot. Currently only battery related.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alert {
    #[default]
    Unknown,
    None,
    LowBattery,
    CriticalBattery,
}

impl Alert {
    /// Decode the alert code reported by the robot.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Alert::None,
            1 => Alert::CriticalBattery,
            2 => Alert::LowBattery,
            _ => Alert::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Alert::Unknown => "unknown",
            Alert::None => "none",
            Alert::LowBattery => "low_battery",
            Alert::CriticalBattery => "critical_battery",
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control instructions routed to the robot.
///
/// Payload values are forwarded to the robot unvalidated; unknown animation
/// or posture names are the robot's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload", rename_all = "snake_case")]
pub enum Command {
    /// Continuous motion in the bus convention (m/s, rad/s).
    Velocity { linear: f32, angular: f32 },
    /// One-shot animation such as `"spin"` or `"tap"`.
    Animation(String),
    /// Posture change: `"standing"`, `"kicker"` or `"jumper"`.
    SetPosture(String),
    /// On-the-spot turn. Positive angles turn counter-clockwise.
    SharpTurn { angle_rad: f32 },
    /// Jump about 80 cm high.
    HighJump,
    /// Jump about 80 cm long.
    LongJump,
}

/// One telemetry field value as reported by the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum Telemetry {
    BatteryPercentage(u8),
    Posture(Posture),
    Volume(u8),
    Alert(Alert),
    LinkQuality(u8),
    Outdoor(u8),
}

/// Raw joystick report: axes in roughly `[-1, 1]`, buttons non-zero when pressed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoySample {
    pub axes: Vec<f32>,
    /// Accepts integers or booleans on input; `true` reads as `1`.
    #[serde(deserialize_with = "int_or_bool_buttons")]
    pub buttons: Vec<i32>,
}

fn int_or_bool_buttons<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<i32>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Button {
        Int(i32),
        Bool(bool),
    }

    let raw = Vec::<Button>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|b| match b {
            Button::Int(v) => v,
            Button::Bool(pressed) => i32::from(pressed),
        })
        .collect())
}

/// Camera image as published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFrame {
    pub stamp: DateTime<Utc>,
    /// e.g. "sumo_camera_frame"
    pub frame_id: String,
    /// e.g. "bgr8"
    pub encoding: String,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Unified event wrapper for the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. "sumo-runtime::bridge"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a freshly stamped event.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Command(Command),
    Joy(JoySample),
    Telemetry(Telemetry),
    Image(ImageFrame),
}

/// Error type shared by every crate in the workspace.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum SumoError {
    #[error("Robot connection failed: {0}")]
    ConnectionFailed(String),

    #[error("No subscribers for topic {0}")]
    NoSubscribers(String),

    #[error("Driver Fault on {component}: {details}")]
    Driver { component: String, details: String },

    #[error("Invalid input sample: {0}")]
    InvalidSample(String),

    #[error("Parsing Error: {0}")]
    Parsing(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("I/O Error: {0}")]
    Io(String),
}
