// Copyright (c) 2022 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! Actix Actor message definitions for HomeAssistantClient

use crate::errors::ServiceError;
use actix::prelude::Message;
use derive_more::Constructor;
use serde_json::{Map, Value};

/// Create or overwrite the state of an entity in Home Assistant.
///
/// Serialized as request body of `POST /api/states/<entity_id>`.
#[derive(Debug, Clone, PartialEq, Constructor, Message, serde::Serialize)]
#[rtype(result = "Result<(), ServiceError>")]
pub struct SetState {
    #[serde(skip)]
    pub entity_id: String,
    pub state: String,
    pub attributes: Map<String, Value>,
}
