// Copyright (c) 2022 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

#![forbid(non_ascii_idents)]
#![deny(unsafe_code)]

use std::io;
use std::path::Path;

use actix::Actor;
use clap::{Command, arg};
use log::{error, info};
use mqtt_esprtu::client::HomeAssistantClient;
use mqtt_esprtu::configuration::{DEF_CONFIG_FILE, get_configuration};
use mqtt_esprtu::mqtt::MqttListener;
use mqtt_esprtu::{APP_VERSION, Controller, built_info};

#[actix_web::main]
async fn main() -> io::Result<()> {
    let args = Command::new(built_info::PKG_NAME)
        .author("Unfolded Circle Aps")
        .version(APP_VERSION)
        .about("MQTT telemetry to Home Assistant state bridge")
        .arg(arg!(-c --config <FILE> "Configuration file").required(false))
        .get_matches();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg_file = match args.get_one::<String>("config") {
        None => {
            if Path::new(DEF_CONFIG_FILE).exists() {
                info!("Loading default configuration file: {}", DEF_CONFIG_FILE);
                Some(DEF_CONFIG_FILE)
            } else {
                None
            }
        }
        Some(c) => Some(c.as_str()),
    };
    let cfg = get_configuration(cfg_file).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to read configuration: {e}"),
        )
    })?;
    let fields = cfg
        .field_table()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    info!(
        "{} {APP_VERSION}: {} -> {}",
        built_info::PKG_NAME,
        cfg.mqtt.topic,
        cfg.hass.url
    );

    let ha_client = HomeAssistantClient::new(&cfg.hass).start();
    // seeds all entities when started, before subscribing to the topic
    let controller = Controller::new(&cfg, fields, ha_client.recipient()).start();

    let listener = MqttListener::new(cfg.mqtt.clone(), controller);
    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutting down"),
            Err(e) => {
                error!("Unable to listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    if let Err(e) = listener.run(shutdown).await {
        error!("MQTT listener stopped: {e}");
        return Err(io::Error::new(io::ErrorKind::NotConnected, e.to_string()));
    }

    Ok(())
}
