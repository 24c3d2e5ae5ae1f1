//! Telemetry/command bridge between the event bus and a [`SumoDriver`].
//!
//! Inbound, every command topic maps onto one robot primitive.  Outbound,
//! every robot state change is published on its telemetry topic and mirrored
//! into the [`ParamStore`] under the same name, unless it repeats the last
//! published value.  Camera frames are only fetched, and the video stream
//! only decoded, while something is subscribed to `rgb`.
//!
//! ```text
//!   cmd_vel ─┐                                  ┌─▶ battery_percentage
//!   anim ────┤                                  ├─▶ posture
//!   ...  ────┼─▶ TelemetryBridge ─▶ SumoDriver ─┤   ...
//!   long_jump┘         ▲                        └─▶ rgb (on demand)
//!                      └──── RobotEvent ◀───────┘
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use sumo_hal::{RobotEvent, RobotState, StateNotifier, SumoDriver};
use sumo_middleware::{EventBus, ParamStore, Topic, TopicReceiver};
use sumo_types::{Command, Event, EventPayload, ImageFrame, SumoError, Telemetry};
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Source tag stamped on events published by the bridge.
pub const BRIDGE_SOURCE: &str = "sumo-runtime::bridge";

/// Default frame id stamped on camera images.
pub const CAMERA_FRAME_ID: &str = "sumo_camera_frame";

/// Pixel encoding of every published image.
pub const IMAGE_ENCODING: &str = "bgr8";

const DEFAULT_TICK_HZ: f64 = 100.0;

/// Bridge loop settings (`[bridge]` section of the config file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Scheduling ticks per second; video decoding is re-evaluated on each.
    pub tick_hz: f64,
    /// Frame id stamped on `rgb` images.
    pub frame_id: String,
    /// Make the simulated robot refuse the connection.
    pub connect_fails: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tick_hz: DEFAULT_TICK_HZ,
            frame_id: CAMERA_FRAME_ID.to_string(),
            connect_fails: false,
        }
    }
}

impl BridgeConfig {
    /// Period between scheduling ticks.  Non-positive rates fall back to
    /// the default.
    pub fn tick_interval(&self) -> Duration {
        let hz = if self.tick_hz.is_finite() && self.tick_hz > 0.0 {
            self.tick_hz
        } else {
            DEFAULT_TICK_HZ
        };
        Duration::from_secs_f64(1.0 / hz)
    }
}

/// The bridge itself.  Owns the driver; all state is touched from one task.
pub struct TelemetryBridge<D: SumoDriver> {
    driver: D,
    bus: Arc<EventBus>,
    params: ParamStore,
    frame_id: String,
    /// Last value published per field.
    published: RobotState,
}

impl<D: SumoDriver> TelemetryBridge<D> {
    /// Connect `driver` and build a bridge around it.
    ///
    /// Returns the bridge together with the receiver of the driver's change
    /// notifications, to be handed to [`run`][Self::run].
    ///
    /// # Errors
    ///
    /// Propagates the driver's connection error; the bridge does not start
    /// without a robot.
    pub fn connect(
        mut driver: D,
        bus: Arc<EventBus>,
        params: ParamStore,
        frame_id: impl Into<String>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RobotEvent>), SumoError> {
        let (notifier, events) = StateNotifier::channel();
        driver.connect(notifier)?;
        info!("connected to robot");
        let bridge = Self {
            driver,
            bus,
            params,
            frame_id: frame_id.into(),
            published: RobotState::new(),
        };
        Ok((bridge, events))
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Forward one command to the robot.  Failures are logged, never
    /// reported back to the sender.
    pub fn handle_command(&mut self, command: &Command) {
        let result = match command {
            // The bus uses counter-clockwise-positive rotation, the robot
            // the opposite.
            Command::Velocity { linear, angular } => self.driver.set_speeds(*linear, -*angular),
            Command::Animation(name) => self.driver.anim(name),
            Command::SetPosture(name) => self.driver.set_posture(name),
            Command::SharpTurn { angle_rad } => self.driver.sharp_turn(*angle_rad),
            Command::HighJump => self.driver.high_jump(),
            Command::LongJump => self.driver.long_jump(),
        };
        if let Err(e) = result {
            warn!(?command, error = %e, "robot primitive failed");
        }
    }

    /// React to one change notification from the driver.
    pub fn handle_robot_event(&mut self, event: RobotEvent) {
        match event {
            RobotEvent::Changed(value) => {
                self.publish_telemetry(value);
            }
            RobotEvent::FrameAvailable => {
                self.publish_frame();
            }
        }
    }

    /// Publish `value` on its topic and mirror it into the parameter store.
    ///
    /// Returns `false` without doing anything when `value` equals the last
    /// published value of the same field.
    pub fn publish_telemetry(&mut self, value: Telemetry) -> bool {
        if !self.published.apply(value) {
            trace!(?value, "unchanged telemetry skipped");
            return false;
        }
        let topic = Topic::for_telemetry(&value);
        let event = Event::new(BRIDGE_SOURCE, EventPayload::Telemetry(value));
        if let Err(e) = self.bus.publish_to(topic, event) {
            debug!(%topic, error = %e, "telemetry not delivered");
        }
        match value {
            Telemetry::Posture(posture) => self.params.set(topic.name(), posture.as_str()),
            Telemetry::Alert(alert) => self.params.set(topic.name(), alert.as_str()),
            Telemetry::BatteryPercentage(v)
            | Telemetry::Volume(v)
            | Telemetry::LinkQuality(v)
            | Telemetry::Outdoor(v) => self.params.set(topic.name(), v),
        }
        true
    }

    /// Fetch the latest frame and publish it on `rgb`.
    ///
    /// Nothing is fetched while `rgb` has no consumer.  An empty frame is
    /// logged and dropped.  Returns whether an image was published.
    pub fn publish_frame(&mut self) -> bool {
        if self.bus.subscriber_count(Topic::Rgb) == 0 {
            return false;
        }
        let frame = match self.driver.latest_frame() {
            Ok(frame) if !frame.is_empty() => frame,
            Ok(_) => {
                warn!("empty frame from robot, dropping");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "could not fetch frame, dropping");
                return false;
            }
        };
        let image = ImageFrame {
            stamp: Utc::now(),
            frame_id: self.frame_id.clone(),
            encoding: IMAGE_ENCODING.to_string(),
            width: frame.width,
            height: frame.height,
            data: frame.data,
        };
        let event = Event::new(BRIDGE_SOURCE, EventPayload::Image(image));
        match self.bus.publish_to(Topic::Rgb, event) {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "frame not delivered");
                false
            }
        }
    }

    /// Scheduling tick: decode video only while `rgb` has consumers.
    pub fn spin_once(&mut self) {
        let wanted = self.bus.subscriber_count(Topic::Rgb) > 0;
        if wanted == self.driver.frame_decoding_enabled() {
            return;
        }
        if wanted {
            info!("rgb consumer attached, enabling frame decoding");
            self.driver.enable_frame_decoding();
        } else {
            info!("no rgb consumer left, disabling frame decoding");
            self.driver.disable_frame_decoding();
        }
    }

    /// Drive the bridge until `shutdown` is set or the bus closes.
    ///
    /// Commands, change notifications and scheduling ticks are processed one
    /// at a time.  Returns the bridge so callers can inspect the driver.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<RobotEvent>,
        tick: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let mut commands = stream::select_all(
            Topic::COMMANDS
                .into_iter()
                .map(|topic| command_stream(self.bus.subscribe_to(topic))),
        );
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut events_open = true;
        info!(tick_ms = tick.as_millis() as u64, "bridge started");

        loop {
            tokio::select! {
                next = commands.next() => match next {
                    Some((_, Ok(event))) => match event.payload {
                        EventPayload::Command(command) => self.handle_command(&command),
                        other => debug!(payload = ?other, "ignoring non-command event"),
                    },
                    Some((topic, Err(n))) => {
                        warn!(%topic, lagged_by = n, "bridge lagged behind commands");
                    }
                    None => break,
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_robot_event(event),
                    None => {
                        warn!("robot stopped reporting state changes");
                        events_open = false;
                    }
                },
                _ = ticker.tick() => {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    self.spin_once();
                }
            }
        }
        info!("bridge stopped");
        self
    }
}

/// Connect `driver` and run the bridge with `config` until shutdown.
///
/// # Errors
///
/// Returns the connection error when the robot cannot be reached.
pub async fn run_bridge<D: SumoDriver>(
    driver: D,
    bus: Arc<EventBus>,
    params: ParamStore,
    config: &BridgeConfig,
    shutdown: Arc<AtomicBool>,
) -> Result<(), SumoError> {
    let (bridge, events) = TelemetryBridge::connect(driver, bus, params, config.frame_id.clone())?;
    bridge.run(events, config.tick_interval(), shutdown).await;
    Ok(())
}

type CommandItem = (Topic, Result<Event, u64>);

/// Turn a command receiver into a stream of events, or lag counts, that
/// ends when the channel closes.
fn command_stream(receiver: TopicReceiver) -> BoxStream<'static, CommandItem> {
    stream::unfold(receiver, |mut receiver| async move {
        let topic = receiver.topic();
        match receiver.recv().await {
            Ok(event) => Some(((topic, Ok(event)), receiver)),
            Err(broadcast::error::RecvError::Lagged(n)) => Some(((topic, Err(n)), receiver)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sumo_hal::{DriverCall, SimSumo, VideoFrame};
    use sumo_middleware::ParamValue;
    use sumo_types::{Alert, Posture};

    fn bridge() -> (
        TelemetryBridge<SimSumo>,
        mpsc::UnboundedReceiver<RobotEvent>,
        Arc<EventBus>,
        ParamStore,
    ) {
        let bus = Arc::new(EventBus::default());
        let params = ParamStore::new();
        let (bridge, events) =
            TelemetryBridge::connect(SimSumo::new(), Arc::clone(&bus), params.clone(), CAMERA_FRAME_ID)
                .unwrap();
        (bridge, events, bus, params)
    }

    #[test]
    fn unreachable_robot_is_fatal() {
        let result = TelemetryBridge::connect(
            SimSumo::unreachable(),
            Arc::new(EventBus::default()),
            ParamStore::new(),
            CAMERA_FRAME_ID,
        );
        assert!(matches!(result, Err(SumoError::ConnectionFailed(_))));
    }

    #[test]
    fn default_config_ticks_at_100_hz() {
        let config = BridgeConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_millis(10));
        assert_eq!(config.frame_id, "sumo_camera_frame");

        let broken = BridgeConfig {
            tick_hz: 0.0,
            ..BridgeConfig::default()
        };
        assert_eq!(broken.tick_interval(), Duration::from_millis(10));
    }

    #[test]
    fn commands_map_to_primitives() {
        let (mut bridge, _events, _bus, _params) = bridge();
        for command in [
            Command::Velocity {
                linear: 0.5,
                angular: 0.25,
            },
            Command::Animation("spinJump".to_string()),
            Command::SetPosture("kicker".to_string()),
            Command::SharpTurn { angle_rad: 1.5 },
            Command::HighJump,
            Command::LongJump,
        ] {
            bridge.handle_command(&command);
        }

        assert_eq!(
            bridge.driver_mut().take_calls(),
            vec![
                DriverCall::SetSpeeds {
                    linear: 0.5,
                    angular: -0.25
                },
                DriverCall::Anim("spinJump".to_string()),
                DriverCall::SetPosture("kicker".to_string()),
                DriverCall::SharpTurn(1.5),
                DriverCall::HighJump,
                DriverCall::LongJump,
            ]
        );
    }

    #[test]
    fn unknown_names_are_forwarded_verbatim() {
        let (mut bridge, _events, _bus, _params) = bridge();
        bridge.handle_command(&Command::Animation("moonwalk".to_string()));
        bridge.handle_command(&Command::SetPosture("sitting".to_string()));
        assert_eq!(
            bridge.driver().calls(),
            &[
                DriverCall::Anim("moonwalk".to_string()),
                DriverCall::SetPosture("sitting".to_string()),
            ]
        );
    }

    #[test]
    fn repeated_telemetry_is_published_once() {
        let (mut bridge, _events, bus, params) = bridge();
        let mut battery = bus.subscribe_to(Topic::BatteryPercentage);

        assert!(bridge.publish_telemetry(Telemetry::BatteryPercentage(80)));
        assert!(!bridge.publish_telemetry(Telemetry::BatteryPercentage(80)));
        assert!(bridge.publish_telemetry(Telemetry::BatteryPercentage(79)));

        let first = battery.try_recv().unwrap();
        assert!(matches!(
            first.payload,
            EventPayload::Telemetry(Telemetry::BatteryPercentage(80))
        ));
        assert_eq!(first.source, BRIDGE_SOURCE);
        assert!(matches!(
            battery.try_recv().unwrap().payload,
            EventPayload::Telemetry(Telemetry::BatteryPercentage(79))
        ));
        assert!(battery.try_recv().is_err());
        assert_eq!(params.get("battery_percentage"), Some(ParamValue::Int(79)));
    }

    #[test]
    fn labels_are_mirrored_as_strings() {
        let (mut bridge, _events, _bus, params) = bridge();
        bridge.publish_telemetry(Telemetry::Posture(Posture::Kicker));
        bridge.publish_telemetry(Telemetry::Alert(Alert::CriticalBattery));
        bridge.publish_telemetry(Telemetry::LinkQuality(3));

        assert_eq!(params.get("posture"), Some(ParamValue::from("kicker")));
        assert_eq!(params.get("alert"), Some(ParamValue::from("critical_battery")));
        assert_eq!(params.get("link_quality"), Some(ParamValue::Int(3)));
    }

    #[test]
    fn raw_codes_reach_params_as_labels() {
        let (mut bridge, mut events, bus, params) = bridge();
        while let Ok(event) = events.try_recv() {
            bridge.handle_robot_event(event);
        }
        let mut posture = bus.subscribe_to(Topic::Posture);

        bridge.driver_mut().inject_posture_code(2);
        bridge.driver_mut().inject_alert_code(1);
        while let Ok(event) = events.try_recv() {
            bridge.handle_robot_event(event);
        }
        assert_eq!(params.get("posture"), Some(ParamValue::from("kicker")));
        assert_eq!(params.get("alert"), Some(ParamValue::from("critical_battery")));
        assert!(matches!(
            posture.try_recv().unwrap().payload,
            EventPayload::Telemetry(Telemetry::Posture(Posture::Kicker))
        ));

        // Codes outside the known range are published as unknown.
        bridge.driver_mut().inject_posture_code(7);
        while let Ok(event) = events.try_recv() {
            bridge.handle_robot_event(event);
        }
        assert_eq!(params.get("posture"), Some(ParamValue::from("unknown")));
    }

    #[test]
    fn initial_state_flows_through_events() {
        let (mut bridge, mut events, _bus, params) = bridge();
        while let Ok(event) = events.try_recv() {
            bridge.handle_robot_event(event);
        }
        let snapshot = params.snapshot();
        assert_eq!(snapshot.len(), 6);
        assert_eq!(snapshot["posture"], ParamValue::from("standing"));
        assert_eq!(snapshot["alert"], ParamValue::from("none"));
    }

    #[test]
    fn frames_are_not_fetched_without_consumers() {
        let (mut bridge, _events, _bus, _params) = bridge();
        bridge.driver_mut().push_frame(VideoFrame::solid(0, 0, 255));
        bridge.handle_robot_event(RobotEvent::FrameAvailable);
        bridge.spin_once();

        assert_eq!(bridge.driver().frame_requests(), 0);
        assert!(!bridge.driver().frame_decoding_enabled());
    }

    #[test]
    fn frames_are_published_while_consumed() {
        let (mut bridge, _events, bus, _params) = bridge();
        let mut rgb = bus.subscribe_to(Topic::Rgb);

        bridge.spin_once();
        assert!(bridge.driver().frame_decoding_enabled());

        bridge.driver_mut().push_frame(VideoFrame::solid(1, 2, 3));
        bridge.handle_robot_event(RobotEvent::FrameAvailable);

        match rgb.try_recv().unwrap().payload {
            EventPayload::Image(image) => {
                assert_eq!(image.frame_id, CAMERA_FRAME_ID);
                assert_eq!(image.encoding, "bgr8");
                assert_eq!((image.width, image.height), (640, 480));
                assert_eq!(&image.data[..3], &[1, 2, 3]);
            }
            other => panic!("expected an image, got {other:?}"),
        }
    }

    #[test]
    fn empty_frames_are_dropped() {
        let (mut bridge, _events, bus, _params) = bridge();
        let mut rgb = bus.subscribe_to(Topic::Rgb);

        // Decoding still off: the driver hands out an empty frame.
        assert!(!bridge.publish_frame());
        assert_eq!(bridge.driver().frame_requests(), 1);
        assert!(rgb.try_recv().is_err());
    }

    #[test]
    fn decoding_stops_when_last_consumer_leaves() {
        let (mut bridge, _events, bus, _params) = bridge();
        let rgb = bus.subscribe_to(Topic::Rgb);
        bridge.spin_once();
        assert!(bridge.driver().frame_decoding_enabled());

        drop(rgb);
        bridge.spin_once();
        assert!(!bridge.driver().frame_decoding_enabled());
    }

    #[tokio::test]
    async fn run_round_trips_posture_request() {
        let (bridge, events, bus, params) = bridge();
        let mut posture = bus.subscribe_to(Topic::Posture);
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(bridge.run(events, Duration::from_millis(5), Arc::clone(&shutdown)));

        while bus.subscriber_count(Topic::SetPosture) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        bus.publish_command("test", Command::SetPosture("jumper".to_string()))
            .unwrap();

        let reached = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let event = posture.recv().await.unwrap();
                if let EventPayload::Telemetry(Telemetry::Posture(p)) = event.payload {
                    if p == Posture::Jumper {
                        return p;
                    }
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(reached, Posture::Jumper);
        assert_eq!(params.get("posture"), Some(ParamValue::from("jumper")));

        shutdown.store(true, Ordering::SeqCst);
        let bridge = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            bridge.driver().calls(),
            &[DriverCall::SetPosture("jumper".to_string())]
        );
    }

    #[tokio::test]
    async fn run_bridge_refuses_unreachable_robot() {
        let result = run_bridge(
            SimSumo::unreachable(),
            Arc::new(EventBus::default()),
            ParamStore::new(),
            &BridgeConfig::default(),
            Arc::new(AtomicBool::new(true)),
        )
        .await;
        assert!(matches!(result, Err(SumoError::ConnectionFailed(_))));
    }
}
