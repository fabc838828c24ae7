// Copyright (c) 2024 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

use super::*;
use crate::errors::ServiceError;
use crate::telemetry::{NO_DATA, NO_MESSAGES};
use actix::{Addr, Handler, Message, MessageResult};
use bytes::Bytes;
use serde_json::json;

/// Mock Home Assistant client recording all state writes.
#[derive(Default)]
struct StateRecorder {
    states: Vec<SetState>,
}

impl Actor for StateRecorder {
    type Context = Context<Self>;
}

impl Handler<SetState> for StateRecorder {
    type Result = Result<(), ServiceError>;

    fn handle(&mut self, msg: SetState, _ctx: &mut Self::Context) -> Self::Result {
        self.states.push(msg);
        Ok(())
    }
}

#[derive(Message)]
#[rtype(result = "Vec<SetState>")]
struct TakeStates;

impl Handler<TakeStates> for StateRecorder {
    type Result = MessageResult<TakeStates>;

    fn handle(&mut self, _msg: TakeStates, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(std::mem::take(&mut self.states))
    }
}

fn start_controller() -> (Addr<Controller>, Addr<StateRecorder>) {
    let settings = Settings::default();
    let recorder = StateRecorder::default().start();
    let controller = Controller::new(
        &settings,
        FieldTable::default(),
        recorder.clone().recipient(),
    )
    .start();
    (controller, recorder)
}

async fn send_payload(controller: &Addr<Controller>, topic: &str, payload: &'static [u8]) {
    controller
        .send(MqttMessage::new(
            topic.into(),
            Bytes::from_static(payload),
            0,
        ))
        .await
        .expect("controller must handle message");
}

async fn subscribed(controller: &Addr<Controller>) {
    controller
        .send(Subscribed {
            topic: "home-assistant/mqtt_example".into(),
        })
        .await
        .expect("controller must handle subscription");
}

async fn take_states(recorder: &Addr<StateRecorder>) -> Vec<SetState> {
    recorder.send(TakeStates).await.expect("recorder running")
}

#[derive(Message)]
#[rtype(result = "()")]
struct Ping;

impl Handler<Ping> for Controller {
    type Result = ();

    fn handle(&mut self, _msg: Ping, _ctx: &mut Self::Context) {}
}

/// Drain the seed writes of a started controller.
///
/// The controller queues its seed writes in `started`, before handling any message: once a
/// message round trip completed, all seed writes are in the recorder's mailbox.
async fn take_seed_states(
    controller: &Addr<Controller>,
    recorder: &Addr<StateRecorder>,
) -> Vec<SetState> {
    controller.send(Ping).await.expect("controller running");
    let states = take_states(recorder).await;
    assert_eq!(FieldTable::default().len(), states.len());
    states
}

#[actix_web::test]
async fn seeding_writes_placeholder_for_every_field_before_messages() {
    let (controller, recorder) = start_controller();
    send_payload(&controller, "home-assistant/mqtt_example", br#"{"v_bat": 3.9}"#).await;

    let states = take_states(&recorder).await;
    let table = FieldTable::default();

    assert_eq!(table.len() + 2, states.len());
    for (state, field) in states.iter().zip(table.iter()) {
        assert_eq!(format!("hub_rtu0.{}", field.key), state.entity_id);
        assert_eq!(NO_DATA, state.state);
    }
    assert_eq!("hub_rtu0.v_bat", states[table.len()].entity_id);
    assert_eq!("3.9", states[table.len()].state);
    assert_eq!("mqtt_esprtu.last_message", states[table.len() + 1].entity_id);
}

#[actix_web::test]
async fn first_subscription_writes_payload_mirror_placeholder_once() {
    let (controller, recorder) = start_controller();
    subscribed(&controller).await;
    subscribed(&controller).await;

    let states = take_states(&recorder).await;
    let placeholders: Vec<&SetState> = states
        .iter()
        .filter(|s| s.entity_id == "mqtt_esprtu.last_message")
        .collect();

    assert_eq!(1, placeholders.len());
    assert_eq!(NO_MESSAGES, placeholders[0].state);
    assert_eq!(
        "mqtt_esprtu.last_message",
        states.last().map(|s| s.entity_id.as_str()).unwrap_or_default(),
        "placeholder must be written after seeding"
    );
}

#[actix_web::test]
async fn resubscription_after_message_keeps_payload_mirror() {
    let (controller, recorder) = start_controller();
    subscribed(&controller).await;
    send_payload(&controller, "home-assistant/mqtt_example", br#"{"rssi": -71}"#).await;
    let _ = take_states(&recorder).await;

    subscribed(&controller).await;

    assert!(take_states(&recorder).await.is_empty());
}

#[actix_web::test]
async fn message_with_coordinates_writes_location_marker() {
    let (controller, recorder) = start_controller();
    take_seed_states(&controller, &recorder).await;

    send_payload(
        &controller,
        "home-assistant/mqtt_example",
        br#"{"latitude": 46.1034267, "longitude": 19.6355585}"#,
    )
    .await;

    let states = take_states(&recorder).await;
    // latitude, longitude, location marker, payload mirror
    assert_eq!(4, states.len());
    let zone = states
        .iter()
        .find(|s| s.entity_id == "zone.rtu0")
        .expect("location marker written");
    assert_eq!(Some(&json!(46.1034267)), zone.attributes.get("latitude"));
    assert_eq!(Some(&json!(19.6355585)), zone.attributes.get("longitude"));
}

#[actix_web::test]
async fn malformed_payload_is_dropped() {
    let (controller, recorder) = start_controller();
    take_seed_states(&controller, &recorder).await;

    send_payload(&controller, "home-assistant/mqtt_example", b"{\"v_bat\": ").await;

    assert!(take_states(&recorder).await.is_empty());
}

#[actix_web::test]
async fn message_on_other_topic_is_ignored() {
    let (controller, recorder) = start_controller();
    take_seed_states(&controller, &recorder).await;

    send_payload(&controller, "other/topic", br#"{"v_bat": 3.9}"#).await;

    assert!(take_states(&recorder).await.is_empty());
}
