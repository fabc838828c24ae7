// Copyright (c) 2022 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! Central controller mapping MQTT telemetry messages to Home Assistant state writes.

mod handler;
mod messages;

pub use messages::*;

use crate::client::messages::SetState;
use crate::configuration::{DeviceSettings, ENV_MSG_TRACING, LocationSettings, Settings};
use crate::fields::FieldTable;
use crate::telemetry::seed_states;
use crate::util::bool_from_env;
use actix::prelude::{Actor, Context, Recipient};
use log::{debug, info};
use rust_fsm::*;

state_machine! {
    derive(Debug)
    BridgeMode(Uninitialized)

    Uninitialized(Seed) => Seeded,
    Seeded => {
        Subscribed => Listening,
        Message => Receiving,
    },
    Listening => {
        Subscribed => Listening,
        Message => Receiving,
    },
    Receiving => {
        Subscribed => Receiving,
        Message => Receiving,
    },
}

pub struct Controller {
    fields: FieldTable,
    device: DeviceSettings,
    location: LocationSettings,
    /// Subscribed topic filter
    topic: String,
    /// Home Assistant client receiving the state writes
    ha_client: Recipient<SetState>,
    machine: StateMachine<BridgeMode>,
    msg_tracing: bool,
}

impl Controller {
    pub fn new(settings: &Settings, fields: FieldTable, ha_client: Recipient<SetState>) -> Self {
        Self {
            fields,
            device: settings.device.clone(),
            location: settings.location.clone(),
            topic: settings.mqtt.topic.clone(),
            ha_client,
            machine: StateMachine::new(),
            msg_tracing: bool_from_env(ENV_MSG_TRACING),
        }
    }

    /// Queue a state write for the Home Assistant client.
    ///
    /// Fire and forget: write errors are logged by the client.
    fn set_state(&self, state: SetState) {
        debug!("Set state {} = {}", state.entity_id, state.state);
        self.ha_client.do_send(state);
    }

    fn consume(&mut self, input: BridgeModeInput) {
        if let Err(e) = self.machine.consume(&input) {
            debug!(
                "Ignoring {input:?} in state {:?}: {e:?}",
                self.machine.state()
            );
        }
    }
}

impl Actor for Controller {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        info!(
            "Seeding {} entities of device {}_{}",
            self.fields.len(),
            self.device.device_type,
            self.device.device_id
        );
        for state in seed_states(&self.fields, &self.device) {
            self.set_state(state);
        }
        self.consume(BridgeModeInput::Seed);
    }
}

#[cfg(test)]
mod tests;
