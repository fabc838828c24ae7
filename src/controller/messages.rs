// Copyright (c) 2022 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! Actix actor message definitions used to communicate with the [`Controller`].
//!
//! These are the Actix messages sent by the MQTT listener to interact with the Controller.

#[allow(unused_imports)] // used for doc links
use crate::controller::Controller;
use actix::prelude::Message;
use bytes::Bytes;
use derive_more::Constructor;

/// MQTT message received on the subscribed topic filter.
#[derive(Debug, Constructor, Message)]
#[rtype(result = "()")]
pub struct MqttMessage {
    /// Topic name the message was published to.
    pub topic: String,
    /// Raw message payload, expected to be a json object.
    pub payload: Bytes,
    pub qos: u8,
}

/// The broker acknowledged the topic subscription.
///
/// Sent after every (re)connect to the broker.
#[derive(Debug, Message)]
#[rtype(result = "()")]
pub struct Subscribed {
    pub topic: String,
}
