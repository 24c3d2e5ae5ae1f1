//! `sumo-middleware` – message plumbing for the Sumo bridge.
//!
//! Routes commands and telemetry between the bridge, the teleop arbitrator
//! and external clients without caring about the data's meaning.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels, one channel per command or telemetry topic.
//! - [`params`] – Process-wide parameter store mirroring the latest value of
//!   every telemetry topic.
//! - [`ws_gateway`] – JSON-over-WebSocket gateway that lets external
//!   processes publish commands, subscribe to telemetry and read parameters.

pub mod bus;
pub mod params;
pub mod ws_gateway;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use params::{ParamStore, ParamValue};
pub use ws_gateway::WsGateway;
