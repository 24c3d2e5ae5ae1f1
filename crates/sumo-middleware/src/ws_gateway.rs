//! WebSocket gateway between the [`EventBus`] and external processes.
//!
//! Clients speak a small rosbridge-style JSON protocol, one object per text
//! frame:
//!
//! | Client sends | Effect |
//! |---|---|
//! | `{"op":"subscribe","topic":"battery_percentage"}` | every event on the topic is forwarded to the client |
//! | `{"op":"unsubscribe","topic":"battery_percentage"}` | stop forwarding |
//! | `{"op":"publish","topic":"cmd_vel","msg":{...}}` | decode `msg` and publish it on the bus |
//! | `{"op":"get_param","name":"posture"}` | reply with the value from the [`ParamStore`] |
//!
//! Forwarded events arrive as `{"op":"publish","topic":T,"msg":<event>}`.
//!
//! Each subscription owns a bus receiver for as long as the client stays
//! connected, so a client subscribed to `rgb` counts as a video consumer.
//!
//! Only command topics and `joy` accept publications; telemetry is produced
//! by the bridge alone.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use sumo_types::{Command, Event, EventPayload, JoySample, SumoError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, Topic};
use crate::params::ParamStore;

/// Source tag stamped on events published by gateway clients.
const GATEWAY_SOURCE: &str = "sumo-middleware::ws_gateway";

/// Messages queued per client before forwarded events are dropped.
pub const OUTBOUND_CAPACITY: usize = 32;

/// One client request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientOp {
    Subscribe {
        topic: String,
    },
    Unsubscribe {
        topic: String,
    },
    Publish {
        topic: String,
        #[serde(default)]
        msg: Value,
    },
    GetParam {
        name: String,
    },
}

/// Parse one client text frame.
pub fn parse_client_op(text: &str) -> Result<ClientOp, SumoError> {
    serde_json::from_str(text).map_err(|e| SumoError::Parsing(format!("bad client message: {e}")))
}

/// Decode the `msg` body of a client publication on `topic`.
///
/// # Errors
///
/// Returns [`SumoError::Parsing`] when the body is missing a required field
/// or the topic does not accept publications.
pub fn decode_publish(topic: Topic, msg: &Value) -> Result<EventPayload, SumoError> {
    let command = match topic {
        Topic::CmdVel => {
            // geometry_msgs/Twist: only linear.x and angular.z are used.
            let linear = msg
                .pointer("/linear/x")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            let angular = msg
                .pointer("/angular/z")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            Command::Velocity {
                linear: linear as f32,
                angular: angular as f32,
            }
        }
        Topic::Anim => Command::Animation(string_data(topic, msg)?),
        Topic::SetPosture => Command::SetPosture(string_data(topic, msg)?),
        Topic::SharpTurn => {
            let angle = msg
                .get("data")
                .and_then(Value::as_f64)
                .ok_or_else(|| SumoError::Parsing(format!("{topic}: expected numeric 'data'")))?;
            Command::SharpTurn {
                angle_rad: angle as f32,
            }
        }
        Topic::HighJump => Command::HighJump,
        Topic::LongJump => Command::LongJump,
        Topic::Joy => {
            let sample: JoySample = serde_json::from_value(msg.clone())
                .map_err(|e| SumoError::Parsing(format!("{topic}: {e}")))?;
            return Ok(EventPayload::Joy(sample));
        }
        other => {
            return Err(SumoError::Parsing(format!(
                "topic '{other}' does not accept publications"
            )));
        }
    };
    Ok(EventPayload::Command(command))
}

fn string_data(topic: Topic, msg: &Value) -> Result<String, SumoError> {
    msg.get("data")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SumoError::Parsing(format!("{topic}: expected string 'data'")))
}

/// Encode a bus event for delivery to a client.
pub fn encode_event(topic: Topic, event: &Event) -> Result<String, SumoError> {
    serde_json::to_string(&json!({
        "op": "publish",
        "topic": topic.name(),
        "msg": event,
    }))
    .map_err(|e| SumoError::Parsing(e.to_string()))
}

/// Bridge between WebSocket clients and the internal [`EventBus`].
#[derive(Clone)]
pub struct WsGateway {
    bus: Arc<EventBus>,
    params: ParamStore,
}

impl WsGateway {
    /// Create a new gateway backed by `bus` and `params`.
    pub fn new(bus: Arc<EventBus>, params: ParamStore) -> Self {
        Self { bus, params }
    }

    /// Bind `addr` and serve clients until a fatal error.
    ///
    /// # Errors
    ///
    /// Returns [`SumoError::Io`] if the TCP listener cannot be bound.
    pub async fn run(self, addr: SocketAddr) -> Result<(), SumoError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SumoError::Io(format!("ws bind error on {addr}: {e}")))?;
        info!(%addr, "ws gateway listening");
        self.serve(listener).await
    }

    /// Serve clients on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), SumoError> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let gateway = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = gateway.handle_ws_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "ws client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "ws accept error");
                }
            }
        }
    }

    async fn handle_ws_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), SumoError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| SumoError::Io(format!("ws handshake from {peer}: {e}")))?;
        debug!(peer = %peer, "ws client connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
        let mut subscriptions: HashMap<Topic, JoinHandle<()>> = HashMap::new();

        loop {
            tokio::select! {
                // Forward subscribed events and replies to the client.
                Some(text) = out_rx.recv() => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                // Handle incoming WebSocket frames.
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        Some(Ok(Message::Text(text))) => {
                            self.handle_incoming_ws_message(text.as_str(), &mut subscriptions, &out_tx);
                        }
                        _ => {}
                    }
                }
            }
        }

        // Dropping the forwarders releases their bus receivers.
        for (_, handle) in subscriptions.drain() {
            handle.abort();
        }
        debug!(peer = %peer, "ws client disconnected");
        Ok(())
    }

    /// Apply one client text frame.  Malformed requests are logged and
    /// ignored; nothing is reported back to the client.
    fn handle_incoming_ws_message(
        &self,
        text: &str,
        subscriptions: &mut HashMap<Topic, JoinHandle<()>>,
        out: &mpsc::Sender<String>,
    ) {
        let op = match parse_client_op(text) {
            Ok(op) => op,
            Err(e) => {
                warn!(error = %e, "ignoring ws message");
                return;
            }
        };

        match op {
            ClientOp::Subscribe { topic } => {
                let Some(topic) = lookup_topic(&topic) else { return };
                subscriptions
                    .entry(topic)
                    .or_insert_with(|| self.spawn_forwarder(topic, out.clone()));
            }
            ClientOp::Unsubscribe { topic } => {
                let Some(topic) = lookup_topic(&topic) else { return };
                if let Some(handle) = subscriptions.remove(&topic) {
                    handle.abort();
                }
            }
            ClientOp::Publish { topic, msg } => {
                let Some(topic) = lookup_topic(&topic) else { return };
                match decode_publish(topic, &msg) {
                    Ok(payload) => {
                        if let Err(e) = self.bus.publish_to(topic, Event::new(GATEWAY_SOURCE, payload)) {
                            debug!(%topic, error = %e, "client publication not delivered");
                        }
                    }
                    Err(e) => warn!(%topic, error = %e, "ignoring ws publication"),
                }
            }
            ClientOp::GetParam { name } => {
                let value = self.params.get(&name);
                let reply = json!({ "op": "param", "name": name, "value": value });
                if let Err(e) = out.try_send(reply.to_string()) {
                    warn!(error = %e, "param reply dropped");
                }
            }
        }
    }

    /// Forward `topic` into the client queue.  While the client is slow and
    /// the queue is full, events are dropped instead of buffered.
    fn spawn_forwarder(&self, topic: Topic, out: mpsc::Sender<String>) -> JoinHandle<()> {
        // Subscribe before spawning so the receiver counts immediately.
        let mut rx = self.bus.subscribe_to(topic);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match encode_event(topic, &event) {
                        Ok(json) => match out.try_send(json) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                warn!(%topic, "ws client too slow, dropping event");
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        },
                        Err(e) => warn!(%topic, error = %e, "failed to encode event"),
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%topic, lagged_by = n, "ws subscription lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn lookup_topic(name: &str) -> Option<Topic> {
    let topic = Topic::from_name(name);
    if topic.is_none() {
        warn!(topic = name, "unknown topic");
    }
    topic
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use sumo_types::{ImageFrame, Telemetry};

    fn make_gateway() -> (Arc<EventBus>, ParamStore, WsGateway) {
        let bus = Arc::new(EventBus::default());
        let params = ParamStore::new();
        let gateway = WsGateway::new(Arc::clone(&bus), params.clone());
        (bus, params, gateway)
    }

    #[test]
    fn parse_known_ops() {
        assert_eq!(
            parse_client_op(r#"{"op":"subscribe","topic":"rgb"}"#).unwrap(),
            ClientOp::Subscribe { topic: "rgb".into() }
        );
        assert_eq!(
            parse_client_op(r#"{"op":"get_param","name":"alert"}"#).unwrap(),
            ClientOp::GetParam { name: "alert".into() }
        );
        let publish = parse_client_op(r#"{"op":"publish","topic":"high_jump"}"#).unwrap();
        assert!(matches!(publish, ClientOp::Publish { msg: Value::Null, .. }));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(parse_client_op("not json"), Err(SumoError::Parsing(_))));
        assert!(parse_client_op(r#"{"op":"advertise","topic":"x"}"#).is_err());
    }

    #[test]
    fn decode_twist_reads_linear_x_and_angular_z() {
        let msg = json!({"linear": {"x": 0.5, "y": 9.0}, "angular": {"z": -0.25}});
        let payload = decode_publish(Topic::CmdVel, &msg).unwrap();
        match payload {
            EventPayload::Command(Command::Velocity { linear, angular }) => {
                assert!((linear - 0.5).abs() < f32::EPSILON);
                assert!((angular + 0.25).abs() < f32::EPSILON);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn decode_string_and_float_commands() {
        let anim = decode_publish(Topic::Anim, &json!({"data": "spiral"})).unwrap();
        assert!(matches!(anim, EventPayload::Command(Command::Animation(ref n)) if n == "spiral"));

        let posture = decode_publish(Topic::SetPosture, &json!({"data": "kicker"})).unwrap();
        assert!(matches!(posture, EventPayload::Command(Command::SetPosture(ref n)) if n == "kicker"));

        let turn = decode_publish(Topic::SharpTurn, &json!({"data": 3.0})).unwrap();
        assert!(matches!(turn, EventPayload::Command(Command::SharpTurn { angle_rad }) if angle_rad == 3.0));

        assert!(decode_publish(Topic::Anim, &json!({"data": 3})).is_err());
        assert!(decode_publish(Topic::SharpTurn, &json!({})).is_err());
    }

    #[test]
    fn decode_jumps_ignore_body() {
        assert!(matches!(
            decode_publish(Topic::LongJump, &Value::Null).unwrap(),
            EventPayload::Command(Command::LongJump)
        ));
        assert!(matches!(
            decode_publish(Topic::HighJump, &json!({"junk": 1})).unwrap(),
            EventPayload::Command(Command::HighJump)
        ));
    }

    #[test]
    fn decode_joy_sample() {
        let payload = decode_publish(Topic::Joy, &json!({"axes": [0.0, 1.0], "buttons": [0, 1]})).unwrap();
        match payload {
            EventPayload::Joy(sample) => {
                assert_eq!(sample.axes, vec![0.0, 1.0]);
                assert_eq!(sample.buttons, vec![0, 1]);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn decode_joy_sample_with_bool_buttons() {
        let payload = decode_publish(Topic::Joy, &json!({"axes": [0.0], "buttons": [false, true]})).unwrap();
        assert!(matches!(payload, EventPayload::Joy(ref s) if s.buttons == vec![0, 1]));
    }

    #[test]
    fn telemetry_topics_are_not_publishable() {
        for topic in [Topic::Rgb, Topic::BatteryPercentage, Topic::Alert] {
            assert!(decode_publish(topic, &json!({"data": 1})).is_err());
        }
    }

    #[tokio::test]
    async fn publish_op_reaches_bus() {
        let (bus, _, gateway) = make_gateway();
        let mut rx = bus.subscribe_to(Topic::Anim);
        let (out, _out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let mut subs = HashMap::new();

        gateway.handle_incoming_ws_message(
            r#"{"op":"publish","topic":"/anim","msg":{"data":"tap"}}"#,
            &mut subs,
            &out,
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.source, GATEWAY_SOURCE);
        assert!(matches!(event.payload, EventPayload::Command(Command::Animation(ref n)) if n == "tap"));
    }

    #[tokio::test]
    async fn subscribe_op_counts_as_consumer_until_unsubscribed() {
        let (bus, _, gateway) = make_gateway();
        let (out, mut out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let mut subs = HashMap::new();

        gateway.handle_incoming_ws_message(r#"{"op":"subscribe","topic":"battery_percentage"}"#, &mut subs, &out);
        // Duplicate subscriptions share one forwarder.
        gateway.handle_incoming_ws_message(r#"{"op":"subscribe","topic":"battery_percentage"}"#, &mut subs, &out);
        assert_eq!(bus.subscriber_count(Topic::BatteryPercentage), 1);

        bus.publish_to(
            Topic::BatteryPercentage,
            Event::new("test", EventPayload::Telemetry(Telemetry::BatteryPercentage(55))),
        )
        .unwrap();
        let forwarded = tokio::time::timeout(Duration::from_secs(1), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(forwarded.contains("\"topic\":\"battery_percentage\""));
        assert!(forwarded.contains("55"));

        gateway.handle_incoming_ws_message(r#"{"op":"unsubscribe","topic":"battery_percentage"}"#, &mut subs, &out);
        // Abort completes on the next scheduler pass.
        for _ in 0..10 {
            if bus.subscriber_count(Topic::BatteryPercentage) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(bus.subscriber_count(Topic::BatteryPercentage), 0);
    }

    #[tokio::test]
    async fn slow_rgb_client_queue_stays_bounded() {
        let (bus, _, gateway) = make_gateway();
        let (out, mut out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let mut subs = HashMap::new();
        gateway.handle_incoming_ws_message(r#"{"op":"subscribe","topic":"rgb"}"#, &mut subs, &out);

        let frame = ImageFrame {
            stamp: Default::default(),
            frame_id: "sumo_camera_frame".to_string(),
            encoding: "bgr8".to_string(),
            width: 2,
            height: 1,
            data: vec![0; 6],
        };
        let published = OUTBOUND_CAPACITY * 3;
        for _ in 0..published {
            bus.publish_to(Topic::Rgb, Event::new("test", EventPayload::Image(frame.clone())))
                .unwrap();
        }

        // Let the forwarder work through the whole backlog.
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if out.capacity() == 0 {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut queued = 0;
        while out_rx.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, OUTBOUND_CAPACITY);
        assert!(queued < published);

        // Once drained, new events flow again.
        bus.publish_to(Topic::Rgb, Event::new("test", EventPayload::Image(frame)))
            .unwrap();
        let next = tokio::time::timeout(Duration::from_secs(1), out_rx.recv())
            .await
            .unwrap();
        assert!(next.is_some());
    }

    #[tokio::test]
    async fn get_param_replies_with_value() {
        let (_, params, gateway) = make_gateway();
        params.set("posture", "kicker");
        let (out, mut out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let mut subs = HashMap::new();

        gateway.handle_incoming_ws_message(r#"{"op":"get_param","name":"posture"}"#, &mut subs, &out);
        gateway.handle_incoming_ws_message(r#"{"op":"get_param","name":"missing"}"#, &mut subs, &out);

        let reply: Value = serde_json::from_str(&out_rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply["value"], "kicker");
        let missing: Value = serde_json::from_str(&out_rx.recv().await.unwrap()).unwrap();
        assert!(missing["value"].is_null());
    }

    #[tokio::test]
    async fn unknown_topic_is_ignored() {
        let (bus, _, gateway) = make_gateway();
        let (out, _out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let mut subs = HashMap::new();
        gateway.handle_incoming_ws_message(r#"{"op":"subscribe","topic":"odom"}"#, &mut subs, &out);
        assert!(subs.is_empty());
        assert!(Topic::ALL.iter().all(|t| bus.subscriber_count(*t) == 0));
    }

    #[tokio::test]
    async fn end_to_end_publish_over_websocket() {
        let (bus, _, gateway) = make_gateway();
        let mut rx = bus.subscribe_to(Topic::CmdVel);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(gateway.serve(listener));

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        let frame = r#"{"op":"publish","topic":"cmd_vel","msg":{"linear":{"x":1.0},"angular":{"z":0.5}}}"#;
        ws.send(Message::Text(frame.into())).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event.payload,
            EventPayload::Command(Command::Velocity { linear, angular }) if linear == 1.0 && angular == 0.5
        ));
    }
}
