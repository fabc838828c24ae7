// Copyright (c) 2024 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! Offline payload mapping tool.
//!
//! Prints the Home Assistant state writes the bridge would perform for a telemetry payload,
//! without connecting to the MQTT broker or Home Assistant.

use clap::{Arg, ArgAction, Command};
use log::debug;
use mqtt_esprtu::APP_VERSION;
use mqtt_esprtu::client::messages::SetState;
use mqtt_esprtu::configuration::{Settings, get_configuration};
use mqtt_esprtu::telemetry::{message_states, payload_mirror_placeholder, seed_states};
use std::fs;
use std::io::{self, Read};

fn main() -> anyhow::Result<()> {
    let args = Command::new("esprtu-payload-check")
        .author("Unfolded Circle ApS")
        .version(APP_VERSION)
        .about("Show the Home Assistant state writes of an MQTT telemetry payload")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .action(ArgAction::SetTrue)
                .help("Print the initial placeholder writes instead of processing a payload"),
        )
        .arg(
            Arg::new("payload")
                .value_name("PAYLOAD_FILE")
                .help("File containing the json payload. Reads from stdin if not specified"),
        )
        .get_matches();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cfg: Settings = get_configuration(args.get_one::<String>("config").map(|s| s.as_str()))?;
    let fields = cfg.field_table()?;

    let states = if args.get_flag("seed") {
        let mut states = seed_states(&fields, &cfg.device);
        states.push(payload_mirror_placeholder(&cfg.device));
        states
    } else {
        let payload = match args.get_one::<String>("payload") {
            Some(file) => fs::read(file)?,
            None => {
                let mut payload = Vec::new();
                io::stdin().read_to_end(&mut payload)?;
                payload
            }
        };
        debug!("Payload: {}", String::from_utf8_lossy(&payload));
        message_states(&fields, &cfg.device, &cfg.location, &payload)?
    };

    for state in states {
        println!("{}", state_line(&state)?);
    }

    Ok(())
}

fn state_line(state: &SetState) -> anyhow::Result<String> {
    Ok(format!(
        "{}: {}",
        state.entity_id,
        serde_json::to_string(state)?
    ))
}
