// Copyright (c) 2024 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! Telemetry payload mapping.
//!
//! Pure functions turning a field table and a decoded MQTT payload into a list of Home Assistant
//! state writes. Nothing in here performs I/O: the [`Controller`](crate::Controller) forwards the
//! returned [`SetState`] messages to the Home Assistant client.

use crate::client::messages::SetState;
use crate::configuration::{DeviceSettings, LocationSettings};
use crate::errors::ServiceError;
use crate::fields::{FieldDescriptor, FieldTable};
use log::warn;
use serde_json::{Map, Value};

/// Placeholder state of a field entity until the first value is received.
pub const NO_DATA: &str = "No data";
/// Placeholder state of the raw payload mirror entity until the first message is received.
pub const NO_MESSAGES: &str = "No messages";
/// Icon used for field descriptors without an icon.
pub const DEFAULT_ICON: &str = "mdi:battery-outline";
/// Max length of a Home Assistant state value.
pub const MAX_STATE_LEN: usize = 255;

/// Decode a raw MQTT payload into a json object.
///
/// Returns a [`ServiceError::BadRequest`] if the payload is not valid json or not a json object.
pub fn decode_payload(payload: &[u8]) -> Result<Map<String, Value>, ServiceError> {
    let msg: Value = serde_json::from_slice(payload).map_err(|e| {
        ServiceError::BadRequest(format!("Error parsing json payload: {e}"))
    })?;

    match msg {
        Value::Object(map) => Ok(map),
        msg => Err(ServiceError::BadRequest(format!(
            "Expected json object but got: {msg}"
        ))),
    }
}

/// Convert a Home Assistant identifier part to lower case `[a-z0-9_]`.
///
/// Other characters are replaced by `_`. Repeated, leading and trailing underscores are removed,
/// as Home Assistant rejects them in entity identifiers.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for c in value.trim().chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_alphanumeric() { c } else { '_' };
        if c == '_' && (slug.is_empty() || slug.ends_with('_')) {
            continue;
        }
        slug.push(c);
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}

/// Entity identifier of a field: `<device_type>_<device_id>.<key>`.
pub fn sensor_entity_id(device: &DeviceSettings, key: &str) -> String {
    format!(
        "{}.{}",
        slugify(&format!("{}_{}", device.device_type, device.device_id)),
        slugify(key)
    )
}

/// Display attributes of a field entity.
pub fn sensor_attributes(field: &FieldDescriptor) -> Map<String, Value> {
    let mut attributes = Map::with_capacity(5);
    attributes.insert(
        "icon".into(),
        field.icon.as_deref().unwrap_or(DEFAULT_ICON).into(),
    );
    attributes.insert("friendly_name".into(), field.name.clone().into());
    if field.measurement {
        attributes.insert("state_class".into(), "measurement".into());
    }
    if let Some(unit) = &field.unit {
        attributes.insert("unit_of_measurement".into(), unit.clone().into());
    }
    if let Some(device_class) = &field.device_class {
        attributes.insert("device_class".into(), device_class.clone().into());
    }
    attributes
}

/// Convert a payload value to a Home Assistant state string.
///
/// Strings are used as is, `null` is mapped to [`NO_DATA`], other values to their json text.
pub fn state_value(value: &Value) -> String {
    match value {
        Value::String(s) => truncate_state(s.clone()),
        Value::Null => NO_DATA.into(),
        v => truncate_state(v.to_string()),
    }
}

/// Truncate a state value to [`MAX_STATE_LEN`] characters.
pub fn truncate_state(mut state: String) -> String {
    if let Some((idx, _)) = state.char_indices().nth(MAX_STATE_LEN) {
        state.truncate(idx);
    }
    state
}

/// Placeholder state writes for every field of the table, in table order.
pub fn seed_states(table: &FieldTable, device: &DeviceSettings) -> Vec<SetState> {
    table
        .iter()
        .map(|field| {
            SetState::new(
                sensor_entity_id(device, &field.key),
                NO_DATA.into(),
                sensor_attributes(field),
            )
        })
        .collect()
}

/// State writes for all fields present in the payload, in table order.
///
/// Keys not contained in the payload are skipped.
pub fn payload_states(
    table: &FieldTable,
    device: &DeviceSettings,
    payload: &Map<String, Value>,
) -> Vec<SetState> {
    table
        .iter()
        .filter_map(|field| {
            payload.get(&field.key).map(|value| {
                SetState::new(
                    sensor_entity_id(device, &field.key),
                    state_value(value),
                    sensor_attributes(field),
                )
            })
        })
        .collect()
}

/// Location marker write if both coordinates are present in the payload.
pub fn location_state(
    location: &LocationSettings,
    payload: &Map<String, Value>,
) -> Option<SetState> {
    if !location.enabled {
        return None;
    }
    let latitude = payload.get(&location.latitude_key)?;
    let longitude = payload.get(&location.longitude_key)?;

    let mut attributes = Map::with_capacity(6);
    attributes.insert("longitude".into(), longitude.clone());
    attributes.insert("latitude".into(), latitude.clone());
    attributes.insert("radius".into(), location.radius.into());
    attributes.insert("icon".into(), location.icon.clone().into());
    attributes.insert("passive".into(), location.passive.to_string().into());
    attributes.insert("friendly_name".into(), location.name.clone().into());

    Some(SetState::new(
        location.entity_id.clone(),
        "0".into(),
        attributes,
    ))
}

/// Raw payload mirror write.
pub fn payload_mirror_state(device: &DeviceSettings, payload: &[u8]) -> SetState {
    SetState::new(
        device.payload_entity.clone(),
        truncate_state(String::from_utf8_lossy(payload).into_owned()),
        Map::new(),
    )
}

/// Placeholder write of the raw payload mirror entity.
pub fn payload_mirror_placeholder(device: &DeviceSettings) -> SetState {
    SetState::new(device.payload_entity.clone(), NO_MESSAGES.into(), Map::new())
}

/// All state writes of a received MQTT message.
///
/// Order: field entities in table order, location marker, raw payload mirror.
/// A malformed payload produces no writes at all.
pub fn message_states(
    table: &FieldTable,
    device: &DeviceSettings,
    location: &LocationSettings,
    payload: &[u8],
) -> Result<Vec<SetState>, ServiceError> {
    let data = decode_payload(payload).inspect_err(|e| warn!("Dropping MQTT message: {e}"))?;

    let mut states = payload_states(table, device, &data);
    if let Some(state) = location_state(location, &data) {
        states.push(state);
    }
    states.push(payload_mirror_state(device, payload));

    Ok(states)
}
