// Copyright (c) 2023 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! Actix message handler for MQTT subscription events.

use crate::controller::{BridgeModeInput, BridgeModeState, Controller, Subscribed};
use crate::telemetry::payload_mirror_placeholder;
use actix::Handler;
use log::info;

impl Handler<Subscribed> for Controller {
    type Result = ();

    fn handle(&mut self, msg: Subscribed, _ctx: &mut Self::Context) -> Self::Result {
        // only the first subscription resets the payload mirror, not a resubscription after a
        // broker reconnect
        let first_subscription = matches!(self.machine.state(), BridgeModeState::Seeded);
        self.consume(BridgeModeInput::Subscribed);

        if first_subscription {
            info!("Subscribed to {}, waiting for messages", msg.topic);
            self.set_state(payload_mirror_placeholder(&self.device));
        } else {
            info!("Resubscribed to {}", msg.topic);
        }
    }
}
