// Copyright (c) 2022 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! Home Assistant client REST API implementation with Actix actors.
//!
//! State writes use the `POST /api/states/<entity_id>` endpoint, which creates or overwrites the
//! state of an entity. See <https://developers.home-assistant.io/docs/api/rest/>.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use actix::{Actor, ActorFutureExt, AsyncContext, Context, Handler, WrapFuture};
use awc::ClientRequest;
use awc::http::header;
use log::{debug, error, info};
use url::Url;

use crate::client::messages::SetState;
use crate::configuration::{ENV_MSG_TRACING, HomeAssistantSettings};
use crate::errors::ServiceError;
use crate::util::bool_from_env;

pub mod messages;

pub struct HomeAssistantClient {
    /// Unique HA client id
    id: String,
    /// Base server address (e.g. http://hassio.local:8123/)
    server: Url,
    access_token: String,
    // creating an expensive client is sufficient once per process and can be used for all requests
    http_client: awc::Client,
    msg_tracing: bool,
    /// Latest not yet written state per entity.
    pending: HashMap<String, SetState>,
    /// Write order of the pending entities.
    queue: VecDeque<String>,
    /// A state write request is in progress.
    writing: bool,
}

impl HomeAssistantClient {
    pub fn new(settings: &HomeAssistantSettings) -> Self {
        let url = &settings.url;
        let host = url.host_str().unwrap_or(url.as_str());
        let port = url.port_or_known_default().unwrap_or_default();
        Self {
            id: format!("{}:{}", host, port),
            server: url.clone(),
            access_token: settings.get_token(),
            http_client: awc::ClientBuilder::new()
                .timeout(Duration::from_secs(settings.request_timeout as u64))
                .finish(),
            msg_tracing: bool_from_env(ENV_MSG_TRACING),
            pending: HashMap::new(),
            queue: VecDeque::new(),
            writing: false,
        }
    }

    /// State API endpoint of an entity.
    fn state_url(&self, entity_id: &str) -> Result<Url, ServiceError> {
        self.server
            .join(&format!("api/states/{entity_id}"))
            .map_err(|e| ServiceError::BadRequest(format!("Invalid entity_id {entity_id}: {e}")))
    }

    /// Authorized state write request of an entity.
    fn state_request(&self, entity_id: &str) -> Result<ClientRequest, ServiceError> {
        let url = self.state_url(entity_id)?;
        Ok(self.http_client.post(url.as_str()).insert_header((
            header::AUTHORIZATION,
            format!("Bearer {}", self.access_token),
        )))
    }

    /// Queue a state write.
    ///
    /// A pending write of the same entity is replaced and keeps its position in the queue.
    /// Returns `false` if a pending write was replaced.
    fn enqueue(&mut self, state: SetState) -> bool {
        let entity_id = state.entity_id.clone();
        if self.pending.insert(entity_id.clone(), state).is_some() {
            debug!("[{}] Replaced pending state of {entity_id}", self.id);
            return false;
        }
        self.queue.push_back(entity_id);
        true
    }

    /// Start writing the next pending state, unless a write is in progress.
    fn write_next(&mut self, ctx: &mut Context<Self>) {
        if self.writing {
            return;
        }
        while let Some(entity_id) = self.queue.pop_front() {
            let Some(state) = self.pending.remove(&entity_id) else {
                continue;
            };
            let request = match self.state_request(&entity_id) {
                Ok(request) => request,
                Err(e) => {
                    error!("[{}] Error setting state: {e}", self.id);
                    continue;
                }
            };
            if self.msg_tracing {
                debug!("[{}] <- {}: {:?}", self.id, entity_id, state);
            } else {
                debug!("[{}] <- {}: {}", self.id, entity_id, state.state);
            }

            self.writing = true;
            ctx.spawn(post_state(request, state).into_actor(self).map(
                |result, act, ctx| {
                    match result {
                        Ok(entity_id) => debug!("[{}] State of {entity_id} updated", act.id),
                        Err(e) => error!("[{}] Error setting state: {e}", act.id),
                    }
                    act.writing = false;
                    act.write_next(ctx);
                },
            ));
            return;
        }
    }
}

/// Send a state write request. Returns the entity id of the written state.
async fn post_state(request: ClientRequest, state: SetState) -> Result<String, ServiceError> {
    let uri = request.get_uri().clone();
    let mut response = request.send_json(&state).await?;
    let status = response.status();
    if status.is_success() {
        return Ok(state.entity_id);
    }

    let body = response.body().await.unwrap_or_default();
    Err(ServiceError::ServiceUnavailable(format!(
        "{uri} returned {status}: {}",
        String::from_utf8_lossy(&body)
    )))
}

impl Actor for HomeAssistantClient {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        info!("[{}] HA client started", self.id);
        if self.access_token.is_empty() {
            error!("[{}] No access token configured!", self.id);
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        debug!("[{}] HA client stopped", self.id);
    }
}

impl Handler<SetState> for HomeAssistantClient {
    type Result = Result<(), ServiceError>;

    /// Queue the state write. States are written one at a time, in order of arrival.
    ///
    /// Writes of an entity still waiting for an earlier write only keep the latest state. Write
    /// errors are logged.
    fn handle(&mut self, msg: SetState, ctx: &mut Self::Context) -> Self::Result {
        self.enqueue(msg);
        self.write_next(ctx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::rt::time::sleep;
    use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
    use serde_json::{Map, Value, json};
    use std::sync::Mutex;

    /// State write received by the test server: entity id, authorization header, body.
    type ReceivedWrite = (String, Option<String>, Value);
    type ReceivedWrites = web::Data<Mutex<Vec<ReceivedWrite>>>;

    const UNAVAILABLE_ENTITY: &str = "hub_rtu0.unavailable";

    async fn receive_state(
        req: HttpRequest,
        entity_id: web::Path<String>,
        body: web::Json<Value>,
        writes: ReceivedWrites,
    ) -> HttpResponse {
        if entity_id.as_str() == UNAVAILABLE_ENTITY {
            return HttpResponse::InternalServerError().body("recorder not ready");
        }
        let auth = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        writes
            .lock()
            .unwrap()
            .push((entity_id.into_inner(), auth, body.into_inner()));
        HttpResponse::Created().json(json!({}))
    }

    /// Start a Home Assistant state API server on a random local port.
    fn start_server(writes: ReceivedWrites) -> HomeAssistantSettings {
        let server = HttpServer::new(move || {
            App::new()
                .app_data(writes.clone())
                .route("/api/states/{entity_id}", web::post().to(receive_state))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());

        let mut settings = HomeAssistantSettings::default();
        settings.url = Url::parse(&format!("http://{addr}/")).unwrap();
        settings.set_token("secret-token");
        settings
    }

    fn state(entity_id: &str, value: &str) -> SetState {
        let mut attributes = Map::new();
        attributes.insert("friendly_name".into(), json!("Battery voltage"));
        SetState::new(entity_id.into(), value.into(), attributes)
    }

    #[test]
    fn request_body_contains_state_and_attributes_only() {
        let body = serde_json::to_value(state("hub_rtu0.v_bat", "3.9")).unwrap();
        assert_eq!(
            json!({"state": "3.9", "attributes": {"friendly_name": "Battery voltage"}}),
            body
        );
    }

    #[actix_web::test]
    async fn state_url_keeps_base_path() {
        let mut settings = HomeAssistantSettings::default();
        settings.url = Url::parse("https://ha.example.com/proxy/").unwrap();
        let client = HomeAssistantClient::new(&settings);

        assert_eq!(
            "https://ha.example.com/proxy/api/states/hub_rtu0.v_bat",
            client.state_url("hub_rtu0.v_bat").unwrap().as_str()
        );
        assert_eq!("ha.example.com:443", client.id);
    }

    #[actix_web::test]
    async fn post_state_sends_authorized_state_write() {
        let writes = ReceivedWrites::new(Mutex::new(Vec::new()));
        let client = HomeAssistantClient::new(&start_server(writes.clone()));

        let request = client.state_request("hub_rtu0.v_bat").unwrap();
        let result = post_state(request, state("hub_rtu0.v_bat", "3.9")).await;

        assert_eq!(Ok("hub_rtu0.v_bat".to_string()), result);
        assert_eq!(
            vec![(
                "hub_rtu0.v_bat".to_string(),
                Some("Bearer secret-token".to_string()),
                json!({"state": "3.9", "attributes": {"friendly_name": "Battery voltage"}})
            )],
            *writes.lock().unwrap()
        );
    }

    #[actix_web::test]
    async fn error_response_is_service_unavailable() {
        let writes = ReceivedWrites::new(Mutex::new(Vec::new()));
        let client = HomeAssistantClient::new(&start_server(writes));

        let request = client.state_request(UNAVAILABLE_ENTITY).unwrap();
        let result = post_state(request, state(UNAVAILABLE_ENTITY, "1")).await;

        match result {
            Err(ServiceError::ServiceUnavailable(msg)) => {
                assert!(msg.contains("500"), "{msg}");
                assert!(msg.contains("recorder not ready"), "{msg}");
            }
            other => panic!("Expected ServiceUnavailable, got {other:?}"),
        }
    }

    #[actix_web::test]
    async fn pending_write_of_same_entity_is_replaced() {
        let mut client = HomeAssistantClient::new(&HomeAssistantSettings::default());

        assert!(client.enqueue(state("hub_rtu0.v_bat", "3.9")));
        assert!(client.enqueue(state("hub_rtu0.rssi", "-71")));
        assert!(!client.enqueue(state("hub_rtu0.v_bat", "3.8")));

        assert_eq!(client.queue, vec!["hub_rtu0.v_bat", "hub_rtu0.rssi"]);
        assert_eq!("3.8", client.pending["hub_rtu0.v_bat"].state);
    }

    #[actix_web::test]
    async fn queued_writes_are_sent_in_order_with_latest_state() {
        let writes = ReceivedWrites::new(Mutex::new(Vec::new()));
        let client = HomeAssistantClient::new(&start_server(writes.clone())).start();

        // the first write is in progress while the others are queued
        client.do_send(state("hub_rtu0.v_bat", "3.9"));
        client.do_send(state("hub_rtu0.v_bat", "3.8"));
        client.do_send(state("hub_rtu0.rssi", "-71"));
        client.do_send(state("hub_rtu0.v_bat", "3.7"));

        for _ in 0..100 {
            if writes.lock().unwrap().len() >= 3 {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        sleep(Duration::from_millis(100)).await;

        let written: Vec<(String, Value)> = writes
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _, body)| (id.clone(), body["state"].clone()))
            .collect();
        assert_eq!(
            vec![
                ("hub_rtu0.v_bat".to_string(), json!("3.9")),
                ("hub_rtu0.v_bat".to_string(), json!("3.7")),
                ("hub_rtu0.rssi".to_string(), json!("-71")),
            ],
            written
        );
    }
}
