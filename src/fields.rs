// Copyright (c) 2024 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! Field descriptor table: expected payload keys with their display metadata.

use crate::errors::ServiceError;
use crate::telemetry::slugify;
use std::collections::HashSet;

/// Metadata of an expected payload field.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FieldDescriptor {
    /// Payload key. Must be unique within a table, also after conversion to an entity id.
    pub key: String,
    /// Display label, used as `friendly_name`.
    pub name: String,
    /// Value is a numeric measurement series (`state_class: measurement`).
    #[serde(default)]
    pub measurement: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl FieldDescriptor {
    fn new(
        key: &str,
        name: &str,
        measurement: bool,
        device_class: Option<&str>,
        unit: Option<&str>,
        icon: &str,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            measurement,
            device_class: device_class.map(Into::into),
            unit: unit.map(Into::into),
            icon: Some(icon.into()),
        }
    }
}

/// Built-in field table of the ESP RTU telemetry payload.
pub fn default_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::new("msg_id", "Mqtt msg ID", false, None, None, "mdi:counter"),
        FieldDescriptor::new(
            "v_bat",
            "Battery voltage",
            true,
            Some("voltage"),
            Some("V"),
            "mdi:battery-outline",
        ),
        FieldDescriptor::new(
            "v_solar",
            "Solar voltage",
            true,
            Some("voltage"),
            Some("V"),
            "mdi:solar-power",
        ),
        FieldDescriptor::new(
            "con_type",
            "Connection type",
            false,
            None,
            None,
            "mdi:satellite-uplink",
        ),
        FieldDescriptor::new(
            "latitude",
            "Sens. latitude",
            false,
            None,
            None,
            "mdi:archive-marker",
        ),
        FieldDescriptor::new(
            "longitude",
            "Sens. longitude",
            false,
            None,
            None,
            "mdi:archive-marker",
        ),
        FieldDescriptor::new(
            "gps_accuracy",
            "GPS accuracy",
            false,
            None,
            Some("m"),
            "mdi:archive-marker",
        ),
        FieldDescriptor::new(
            "masl",
            "Metres above sea level",
            false,
            None,
            Some("m"),
            "mdi:archive-marker",
        ),
        FieldDescriptor::new(
            "sat_no",
            "Satelites visible",
            false,
            None,
            None,
            "mdi:satellite-variant",
        ),
        FieldDescriptor::new(
            "cn0",
            "GNSS signal strength",
            false,
            None,
            Some("dBHz"),
            "mdi:satellite-variant",
        ),
        FieldDescriptor::new(
            "rssi",
            "GSM signal strength",
            false,
            None,
            Some("dBm"),
            "mdi:satellite-uplink",
        ),
    ]
}

/// Validated, immutable field table.
///
/// Keys are non-empty and map to distinct entity ids, iteration follows the configured order.
#[derive(Debug, Clone)]
pub struct FieldTable {
    fields: Vec<FieldDescriptor>,
}

impl FieldTable {
    pub fn new(fields: Vec<FieldDescriptor>) -> Result<Self, ServiceError> {
        let mut keys = HashSet::with_capacity(fields.len());
        for field in &fields {
            if field.key.trim().is_empty() {
                return Err(ServiceError::BadRequest(format!(
                    "Field descriptor without key: {}",
                    field.name
                )));
            }
            let entity_key = slugify(&field.key);
            if entity_key.is_empty() {
                return Err(ServiceError::BadRequest(format!(
                    "Field descriptor key without valid entity id characters: {}",
                    field.key
                )));
            }
            if !keys.insert(entity_key) {
                return Err(ServiceError::BadRequest(format!(
                    "Duplicate field descriptor key: {}",
                    field.key
                )));
            }
        }
        Ok(Self { fields })
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Default for FieldTable {
    fn default() -> Self {
        Self {
            fields: default_fields(),
        }
    }
}
