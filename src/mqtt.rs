// Copyright (c) 2024 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! MQTT broker connection.
//!
//! Drives the `rumqttc` event loop and forwards received messages and subscription
//! acknowledgements to the [`Controller`].

use std::future::Future;
use std::pin::pin;
use std::time::Duration;

use actix::Addr;
use actix_web::rt::time::{sleep, timeout};
use log::{debug, error, info, warn};
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode,
};

use crate::configuration::MqttSettings;
use crate::controller::{Controller, MqttMessage, Subscribed};
use crate::errors::ServiceError;

/// Max number of queued outgoing requests of the MQTT client.
const REQUEST_CAPACITY: usize = 64;

/// Max time to wait for the DISCONNECT packet being sent at shutdown.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

pub struct MqttListener {
    settings: MqttSettings,
    client: AsyncClient,
    event_loop: EventLoop,
    controller: Addr<Controller>,
    reconnect_duration: Duration,
    reconnect_attempt: u32,
}

impl MqttListener {
    pub fn new(settings: MqttSettings, controller: Addr<Controller>) -> Self {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options
            .set_keep_alive(Duration::from_secs(settings.keep_alive_sec as u64))
            .set_clean_session(settings.clean_session);
        if let Some(username) = &settings.username {
            options.set_credentials(username, settings.password.clone().unwrap_or_default());
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);

        Self {
            reconnect_duration: settings.reconnect.duration,
            settings,
            client,
            event_loop,
            controller,
            reconnect_attempt: 0,
        }
    }

    /// Process MQTT events until `shutdown` completes or the connection can't be reestablished.
    ///
    /// The topic is (re)subscribed after every connection acknowledgement, the broker doesn't keep
    /// the subscription of a clean session. At shutdown, the broker connection is closed with a
    /// DISCONNECT packet.
    pub async fn run(mut self, shutdown: impl Future) -> Result<(), ServiceError> {
        info!(
            "Connecting to MQTT broker {}:{} as {}",
            self.settings.host, self.settings.port, self.settings.client_id
        );
        let mut shutdown = pin!(shutdown);

        loop {
            let event = tokio::select! {
                event = self.event_loop.poll() => event,
                _ = &mut shutdown => return self.disconnect().await,
            };
            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker, subscribing to {}", self.settings.topic);
                    self.reconnect_duration = self.settings.reconnect.duration;
                    self.reconnect_attempt = 0;
                    self.client
                        .subscribe(&self.settings.topic, qos(self.settings.qos))
                        .await?;
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    if ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        error!("Subscription to {} rejected by broker", self.settings.topic);
                    } else {
                        self.controller.do_send(Subscribed {
                            topic: self.settings.topic.clone(),
                        });
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.controller.do_send(MqttMessage::new(
                        publish.topic,
                        publish.payload,
                        publish.qos as u8,
                    ));
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    info!("MQTT broker closed connection");
                }
                Ok(_) => {}
                Err(e) => {
                    self.reconnect_attempt += 1;
                    let attempts = self.settings.reconnect.attempts;
                    if attempts > 0 && self.reconnect_attempt > attempts {
                        error!("Max reconnect attempts reached ({attempts}). Giving up!");
                        return Err(ServiceError::ServiceUnavailable(format!(
                            "MQTT connection failed: {e}"
                        )));
                    }
                    warn!(
                        "MQTT connection error: {e}. Reconnecting in {}ms",
                        self.reconnect_duration.as_millis()
                    );
                    tokio::select! {
                        _ = sleep(self.reconnect_duration) => {}
                        // not connected: nothing to disconnect
                        _ = &mut shutdown => return Ok(()),
                    }
                    self.reconnect_duration =
                        self.settings.reconnect.next_delay(self.reconnect_duration);
                    debug!(
                        "New reconnect timeout: {}",
                        self.reconnect_duration.as_millis()
                    );
                }
            }
        }
    }

    /// Send a DISCONNECT packet and drive the event loop until it is sent.
    async fn disconnect(&mut self) -> Result<(), ServiceError> {
        info!("Disconnecting from MQTT broker");
        self.client.disconnect().await?;

        let sent = timeout(DISCONNECT_TIMEOUT, async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => return,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("MQTT connection closed: {e}");
                        return;
                    }
                }
            }
        })
        .await;
        if sent.is_err() {
            warn!("Timeout disconnecting from MQTT broker");
        }

        Ok(())
    }
}

/// Convert a configured QoS level. Invalid values are rejected by the configuration validation.
fn qos(level: u8) -> QoS {
    match level {
        2 => QoS::ExactlyOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::AtMostOnce,
    }
}
