// Copyright (c) 2022 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! Configuration file handling.

use crate::fields::{FieldDescriptor, FieldTable, default_fields};
use crate::telemetry::slugify;
use crate::topic::valid_subscribe_topic;
use log::{error, info, warn};
use serde_with::{DurationMilliSeconds, serde_as};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Default configuration file.
pub const DEF_CONFIG_FILE: &str = "configuration.yaml";

pub const DEF_HA_URL: &str = "http://homeassistant.local:8123/";

pub const DEF_TOPIC: &str = "home-assistant/mqtt_example";

/// Environment variable prefix to override configuration keys.
pub const ENV_PREFIX: &str = "ESPRTU";

/// Environment variable to enable MQTT payload tracing.
///
/// Valid values: `true` or `1`.
///
/// **Attention:** this setting is only for debugging and logs the complete payload of every
/// received message!
pub const ENV_MSG_TRACING: &str = "ESPRTU_MSG_TRACING";

#[derive(Clone, serde::Deserialize, serde::Serialize)]
pub struct Settings {
    pub mqtt: MqttSettings,
    pub hass: HomeAssistantSettings,
    pub device: DeviceSettings,
    pub location: LocationSettings,
    #[serde(default = "default_fields")]
    pub fields: Vec<FieldDescriptor>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mqtt: Default::default(),
            hass: Default::default(),
            device: Default::default(),
            location: Default::default(),
            fields: default_fields(),
        }
    }
}

impl Settings {
    /// Validated field table from the configured field descriptors.
    pub fn field_table(&self) -> Result<FieldTable, config::ConfigError> {
        FieldTable::new(self.fields.clone())
            .map_err(|e| config::ConfigError::Message(format!("invalid fields: {e}")))
    }
}

#[derive(Clone, serde::Deserialize, serde::Serialize)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    /// MQTT client identifier. A random identifier is generated if empty.
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Subscribe topic filter.
    pub topic: String,
    pub qos: u8,
    pub keep_alive_sec: u16,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    pub reconnect: ReconnectSettings,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "".into(),
            username: None,
            password: None,
            topic: DEF_TOPIC.into(),
            qos: 0,
            keep_alive_sec: 30,
            clean_session: default_clean_session(),
            reconnect: Default::default(),
        }
    }
}

fn default_clean_session() -> bool {
    true
}

#[derive(Clone, serde::Deserialize, serde::Serialize)]
pub struct HomeAssistantSettings {
    /// Home Assistant server base address.
    pub url: Url,
    token: String,
    /// Optional file containing the long-lived access token, e.g. a Docker secret.
    /// Takes precedence over `token`.
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    /// REST request timeout in seconds.
    pub request_timeout: u8,
}

impl Default for HomeAssistantSettings {
    fn default() -> Self {
        Self {
            url: Url::parse(DEF_HA_URL).expect("valid default url"),
            token: "".to_string(),
            token_file: None,
            request_timeout: 6,
        }
    }
}

impl HomeAssistantSettings {
    /// Return the configured HA server access token.
    ///
    /// This is either the content of the token file, or the local configuration token.
    pub fn get_token(&self) -> String {
        self.get_file_token().unwrap_or_else(|| self.token.clone())
    }

    /// Update the local configuration token.
    pub fn set_token(&mut self, token: impl AsRef<str>) {
        self.token = token.as_ref().trim().to_string();
    }

    fn get_file_token(&self) -> Option<String> {
        let path = self.token_file.as_ref()?;
        if !path.is_file() {
            info!(
                "Token file '{}' does not exist. Using local configuration.",
                path.display()
            );
            return None;
        }

        match fs::read_to_string(path) {
            Ok(v) => Some(v.trim().to_string()),
            Err(e) => {
                error!(
                    "Error reading token file '{}', using local configuration. {e}",
                    path.display()
                );
                None
            }
        }
    }
}

/// Identity of the telemetry unit. Used to build the entity identifiers.
#[derive(Clone, serde::Deserialize, serde::Serialize)]
pub struct DeviceSettings {
    pub device_type: String,
    pub device_id: String,
    /// Entity mirroring the raw payload of the last received message.
    pub payload_entity: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            device_type: "hub".into(),
            device_id: "rtu0".into(),
            payload_entity: "mqtt_esprtu.last_message".into(),
        }
    }
}

/// Location marker (zone) published from the payload coordinates.
#[derive(Clone, serde::Deserialize, serde::Serialize)]
pub struct LocationSettings {
    pub enabled: bool,
    pub entity_id: String,
    pub name: String,
    /// Zone radius in meters.
    pub radius: u32,
    pub icon: String,
    pub passive: bool,
    pub latitude_key: String,
    pub longitude_key: String,
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            entity_id: "zone.rtu0".into(),
            name: "hive 1".into(),
            radius: 250,
            icon: "mdi:archive".into(),
            passive: false,
            latitude_key: "latitude".into(),
            longitude_key: "longitude".into(),
        }
    }
}

#[serde_as]
#[derive(Clone, serde::Deserialize, serde::Serialize)]
pub struct ReconnectSettings {
    /// Max reconnect attempts, 0 = unlimited.
    pub attempts: u32,
    #[serde_as(as = "DurationMilliSeconds")]
    #[serde(rename = "duration_ms")]
    pub duration: Duration,
    #[serde_as(as = "DurationMilliSeconds")]
    #[serde(rename = "duration_max_ms")]
    pub duration_max: Duration,
    pub backoff_factor: f32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            attempts: 0,
            duration: Duration::from_secs(1),
            duration_max: Duration::from_secs(30),
            backoff_factor: 1.5,
        }
    }
}

impl ReconnectSettings {
    /// Next reconnect delay: the current delay multiplied by the backoff factor, capped at
    /// `duration_max`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let new_timeout =
            Duration::from_millis((current.as_millis() as f32 * self.backoff_factor) as u64);
        if new_timeout.gt(&self.duration_max) {
            self.duration_max
        } else {
            new_timeout
        }
    }
}

/// Load the configuration settings.
///
/// The application provides default values which can be overriden in the following order:
/// 1. Configuration settings in the yaml or json configuration file specified in `filename`
/// 2. Environment variables with prefix `ESPRTU_` (works only for cfg keys not containing a `_`!)
pub fn get_configuration(filename: Option<&str>) -> Result<Settings, config::ConfigError> {
    // default configuration
    let mut config =
        config::Config::builder().add_source(config::Config::try_from(&Settings::default())?);
    // read optional configuration file to override defaults
    if let Some(filename) = filename {
        config = config.add_source(config::File::with_name(filename));
    }

    // Add in settings from the environment (with a prefix of ESPRTU)
    // E.g. `ESPRTU_MQTT_HOST=broker.local` would set the `mqtt.host` key
    // This does NOT WORK for keys containing an underscore! https://github.com/mehcode/config-rs/issues/312
    let config = config
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("_"))
        .build()?;

    let settings: Settings = config.try_deserialize()?;

    check_cfg_values(settings)
}

fn check_cfg_values(mut settings: Settings) -> Result<Settings, config::ConfigError> {
    if let Err(e) = valid_subscribe_topic(&settings.mqtt.topic) {
        return Err(config::ConfigError::Message(format!(
            "invalid mqtt.topic '{}': {e}",
            settings.mqtt.topic
        )));
    }

    if settings.mqtt.qos > 2 {
        return Err(config::ConfigError::Message(format!(
            "invalid mqtt.qos: {}. Valid: [0, 1, 2]",
            settings.mqtt.qos
        )));
    }

    if settings.mqtt.client_id.trim().is_empty() {
        settings.mqtt.client_id = format!("mqtt-esprtu-{}", uuid::Uuid::new_v4().simple());
    }

    if settings.mqtt.keep_alive_sec < 5 {
        warn!("Invalid MQTT keep alive interval, using default.");
        settings.mqtt.keep_alive_sec = MqttSettings::default().keep_alive_sec;
    }

    let reconnect = &settings.mqtt.reconnect;
    if reconnect.backoff_factor < 1.0
        || reconnect.duration.as_millis() < 100
        || reconnect.duration_max.as_millis() < 1000
    {
        warn!("Invalid MQTT reconnect settings, using defaults.");
        settings.mqtt.reconnect = Default::default();
    }

    if settings.hass.request_timeout == 0 {
        warn!("Invalid HA request timeout, using default.");
        settings.hass.request_timeout = HomeAssistantSettings::default().request_timeout;
    }

    let url = &mut settings.hass.url;
    let scheme = match url.scheme() {
        "http" | "ws" => "http",
        "https" | "wss" => "https",
        scheme => {
            return Err(config::ConfigError::Message(format!(
                "invalid scheme in hass.url: {scheme}. Valid: [http, https]"
            )));
        }
    };
    if url.set_scheme(scheme).is_err() {
        return Err(config::ConfigError::Message(format!(
            "invalid hass.url: {url}"
        )));
    }
    // The state API path is joined to the base url: keep the configured base path
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    // both parts end up in the entity ids of the fields
    if slugify(&settings.device.device_type).is_empty()
        || slugify(&settings.device.device_id).is_empty()
    {
        return Err(config::ConfigError::Message(format!(
            "device.device_type '{}' and device.device_id '{}' must contain letters or digits",
            settings.device.device_type, settings.device.device_id
        )));
    }

    settings.field_table()?;

    Ok(settings)
}
