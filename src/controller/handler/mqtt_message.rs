// Copyright (c) 2023 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! Actix message handler for received MQTT telemetry messages.

use crate::controller::{BridgeModeInput, Controller, MqttMessage};
use crate::telemetry::message_states;
use crate::topic::topic_matches;
use actix::Handler;
use log::debug;

impl Handler<MqttMessage> for Controller {
    type Result = ();

    fn handle(&mut self, msg: MqttMessage, _ctx: &mut Self::Context) -> Self::Result {
        if !topic_matches(&self.topic, &msg.topic) {
            debug!("Ignoring message on unsubscribed topic {}", msg.topic);
            return;
        }

        if self.msg_tracing {
            debug!(
                "-> {} (QoS {}): {}",
                msg.topic,
                msg.qos,
                String::from_utf8_lossy(&msg.payload)
            );
        } else {
            debug!("-> {} ({} bytes)", msg.topic, msg.payload.len());
        }

        // malformed payloads are logged and dropped without any state write
        let Ok(states) = message_states(&self.fields, &self.device, &self.location, &msg.payload)
        else {
            return;
        };

        self.consume(BridgeModeInput::Message);
        for state in states {
            self.set_state(state);
        }
    }
}
