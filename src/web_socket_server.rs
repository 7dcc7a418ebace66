// src/web_socket_server.rs

use std::time::{Duration, Instant};

use actix::prelude::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{debug, info, warn};
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::verify_token;
use crate::notification_hub::{channel_for, Envelope, NotificationHub, Subscribe, Unsubscribe};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// One browser connection listening on its owner's channel.
pub struct WsSession {
    pub id: String,
    pub channel: String,
    pub epoch: Option<String>,
    pub since: Option<u64>,
    pub hb: Instant,
    pub hub: Addr<NotificationHub>,
}

impl WsSession {
    pub fn new(
        channel: String,
        epoch: Option<String>,
        since: Option<u64>,
        hub: Addr<NotificationHub>,
    ) -> Self {
        WsSession {
            id: Uuid::new_v4().to_string(),
            channel,
            epoch,
            since,
            hb: Instant::now(),
            hub,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!("WebSocket heartbeat failed for {}, disconnecting", act.channel);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);

        let addr = ctx.address();
        self.hub
            .send(Subscribe {
                session_id: self.id.clone(),
                channel: self.channel.clone(),
                epoch: self.epoch.clone(),
                since: self.since,
                addr: addr.recipient(),
            })
            .into_actor(self)
            .then(|res, act, ctx| {
                if res.is_err() {
                    warn!("Failed to subscribe session {} to {}", act.id, act.channel);
                    ctx.stop();
                }
                fut::ready(())
            })
            .wait(ctx);
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        self.hub.do_send(Unsubscribe {
            session_id: self.id.clone(),
            channel: self.channel.clone(),
        });
    }
}

impl Handler<Envelope> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: Envelope, ctx: &mut Self::Context) {
        match serde_json::to_string(&msg) {
            Ok(text) => ctx.text(text),
            Err(e) => warn!("Failed to encode envelope #{} for {}: {}", msg.seq, msg.channel, e),
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                // The channel is server-to-client only.
                self.hb = Instant::now();
                debug!("Ignoring client text on {}: {}", self.channel, text);
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!("WebSocket error on {}: {}", self.channel, e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
    pub epoch: Option<String>,
    pub since: Option<u64>,
}

/// GET /ws?token=...&epoch=...&since=...
///
/// Browsers cannot set headers on a WebSocket handshake, so the token
/// travels in the query string.
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
    query: web::Query<WsQuery>,
) -> Result<HttpResponse, Error> {
    let user = verify_token(&query.token, &data.config.jwt_secret)?;
    let channel = channel_for(user.role, &user.id);
    info!("Opening WebSocket for {}", channel);
    let query = query.into_inner();
    ws::start(
        WsSession::new(channel, query.epoch, query.since, data.hub.clone()),
        &req,
        stream,
    )
}
