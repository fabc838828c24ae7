// Copyright (c) 2022 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! Custom application error with conversions from common Rust and 3rd-party errors.

use actix::MailboxError;
use actix::dev::SendError;
use derive_more::Display;
use log::error;

#[derive(Debug, Display, PartialEq)]
pub enum ServiceError {
    #[display("Internal server error: {_0}")]
    InternalServerError(String),

    #[display("Internal serialization error: {_0}")]
    SerializationError(String),

    #[display("BadRequest: {_0}")]
    BadRequest(String),

    #[display("The connection is closed or closing")]
    NotConnected,

    #[display("Service unavailable: {_0}")]
    ServiceUnavailable(String),
}

impl std::error::Error for ServiceError {}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self {
        ServiceError::InternalServerError(format!("{e:?}"))
    }
}

impl From<MailboxError> for ServiceError {
    fn from(e: MailboxError) -> Self {
        ServiceError::InternalServerError(format!("Internal message error: {e:?}"))
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        error!("{e:?}");
        ServiceError::SerializationError(e.to_string())
    }
}

impl<T> From<SendError<T>> for ServiceError {
    fn from(e: SendError<T>) -> Self {
        ServiceError::InternalServerError(format!("Error sending internal message: {e:?}"))
    }
}

impl From<awc::error::SendRequestError> for ServiceError {
    fn from(e: awc::error::SendRequestError) -> Self {
        ServiceError::ServiceUnavailable(format!("Home Assistant request failed: {e}"))
    }
}

impl From<rumqttc::ClientError> for ServiceError {
    fn from(e: rumqttc::ClientError) -> Self {
        error!("MQTT client error: {e}");
        ServiceError::NotConnected
    }
}
