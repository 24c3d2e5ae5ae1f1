//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! Every command kind and every telemetry field has its own [`Topic`] lane:
//!
//! | Direction | Topics |
//! |---|---|
//! | Commands (into the bridge) | `cmd_vel`, `anim`, `set_posture`, `sharp_turn`, `high_jump`, `long_jump` |
//! | Raw input (into the teleop) | `joy` |
//! | Telemetry (out of the bridge) | `rgb`, `battery_percentage`, `posture`, `volume`, `link_quality`, `alert`, `outdoor` |
//!
//! The number of live receivers on a topic is observable through
//! [`EventBus::subscriber_count`]; the bridge uses it to decide whether video
//! decoding is worth the CPU.

use std::collections::HashMap;
use std::fmt;

use sumo_types::{Command, Event, EventPayload, SumoError, Telemetry};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    CmdVel,
    Anim,
    SetPosture,
    SharpTurn,
    HighJump,
    LongJump,
    Joy,
    Rgb,
    BatteryPercentage,
    Posture,
    Volume,
    LinkQuality,
    Alert,
    Outdoor,
}

impl Topic {
    /// Every topic, in declaration order.
    pub const ALL: [Topic; 14] = [
        Topic::CmdVel,
        Topic::Anim,
        Topic::SetPosture,
        Topic::SharpTurn,
        Topic::HighJump,
        Topic::LongJump,
        Topic::Joy,
        Topic::Rgb,
        Topic::BatteryPercentage,
        Topic::Posture,
        Topic::Volume,
        Topic::LinkQuality,
        Topic::Alert,
        Topic::Outdoor,
    ];

    /// The six topics the bridge consumes commands from.
    pub const COMMANDS: [Topic; 6] = [
        Topic::CmdVel,
        Topic::Anim,
        Topic::SetPosture,
        Topic::SharpTurn,
        Topic::HighJump,
        Topic::LongJump,
    ];

    /// Wire name of the topic, also used as the parameter-store key for
    /// telemetry topics.
    pub fn name(&self) -> &'static str {
        match self {
            Topic::CmdVel => "cmd_vel",
            Topic::Anim => "anim",
            Topic::SetPosture => "set_posture",
            Topic::SharpTurn => "sharp_turn",
            Topic::HighJump => "high_jump",
            Topic::LongJump => "long_jump",
            Topic::Joy => "joy",
            Topic::Rgb => "rgb",
            Topic::BatteryPercentage => "battery_percentage",
            Topic::Posture => "posture",
            Topic::Volume => "volume",
            Topic::LinkQuality => "link_quality",
            Topic::Alert => "alert",
            Topic::Outdoor => "outdoor",
        }
    }

    /// Look a topic up by its wire name.
    pub fn from_name(name: &str) -> Option<Topic> {
        // Accept ROS-style absolute names ("/cmd_vel") as well.
        let name = name.strip_prefix('/').unwrap_or(name);
        Topic::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Topic a command is routed on.
    pub fn for_command(command: &Command) -> Topic {
        match command {
            Command::Velocity { .. } => Topic::CmdVel,
            Command::Animation(_) => Topic::Anim,
            Command::SetPosture(_) => Topic::SetPosture,
            Command::SharpTurn { .. } => Topic::SharpTurn,
            Command::HighJump => Topic::HighJump,
            Command::LongJump => Topic::LongJump,
        }
    }

    /// Topic a telemetry value is published on.
    pub fn for_telemetry(value: &Telemetry) -> Topic {
        match value {
            Telemetry::BatteryPercentage(_) => Topic::BatteryPercentage,
            Telemetry::Posture(_) => Topic::Posture,
            Telemetry::Volume(_) => Topic::Volume,
            Telemetry::Alert(_) => Topic::Alert,
            Telemetry::LinkQuality(_) => Topic::LinkQuality,
            Telemetry::Outdoor(_) => Topic::Outdoor,
        }
    }

    /// `true` for topics that carry commands into the bridge.
    pub fn is_command(&self) -> bool {
        Topic::COMMANDS.contains(self)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    channels: HashMap<Topic, broadcast::Sender<Event>>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let channels = Topic::ALL
            .into_iter()
            .map(|topic| (topic, broadcast::channel(capacity).0))
            .collect();
        Self { channels }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event, or
    /// [`SumoError::NoSubscribers`] when nobody is listening.  Publishers
    /// that do not care about delivery should treat that error as a no-op.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, SumoError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|broadcast::error::SendError(_)| SumoError::NoSubscribers(topic.to_string()))
    }

    /// Wrap `command` in an event from `source` and publish it on the
    /// command's own topic.
    pub fn publish_command(&self, source: &str, command: Command) -> Result<usize, SumoError> {
        let topic = Topic::for_command(&command);
        self.publish_to(topic, Event::new(source, EventPayload::Command(command)))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of receivers currently attached to `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        // Every topic is inserted in `new`.
        &self.channels[&topic]
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].  Dropping it detaches the
/// subscriber and lowers [`EventBus::subscriber_count`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.  The caller decides whether to
    ///   continue or abort.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`][Self::recv].
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}
