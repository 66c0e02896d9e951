use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use obrolan_domain::error::DomainError;
use obrolan_domain::identity::{ActorIdentity, authenticate};
use obrolan_domain::users::UserProfile;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::middleware::bearer_token;
use crate::observability;
use crate::realtime::{
    ChannelSession, ClientFrame, HandshakeCredentials, ServerEvent, auth_frame_token,
    user_group,
};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub(super) struct SocketQuery {
    token: Option<String>,
}

pub(super) async fn upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let credentials = HandshakeCredentials {
        header: bearer_token(&headers).map(str::to_string),
        auth_payload: None,
        query: query.token,
    };
    ws.on_upgrade(move |socket| run_channel(socket, state, credentials))
}

async fn run_channel(socket: WebSocket, state: AppState, mut credentials: HandshakeCredentials) {
    let (mut sender, mut incoming) = socket.split();

    // Without a header or query credential the client gets one frame to authenticate.
    if credentials.resolve().is_none() {
        let wait = Duration::from_millis(state.config.realtime_auth_timeout_ms);
        credentials.auth_payload = await_auth_frame(&mut incoming, wait).await;
    }

    let profile = match handshake(&state, &credentials).await {
        Ok(profile) => profile,
        Err(err) => {
            tracing::info!(error = %err, "realtime handshake rejected");
            observability::register_realtime_event("connect", "handshake", "rejected");
            let rejection = serde_json::to_string(&ServerEvent::error(err)).unwrap_or_default();
            if !rejection.is_empty() {
                let _ = sender.send(Message::Text(rejection)).await;
            }
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "authentication failed".into(),
                })))
                .await;
            return;
        }
    };

    let user = ActorIdentity::from(&profile);
    let (outbound, mut outbound_rx) =
        mpsc::channel::<String>(state.config.realtime_outbound_capacity.max(1));
    let connection_id = state.realtime.register(&user.user_id, outbound).await;
    let session = ChannelSession::new(
        user.clone(),
        connection_id,
        state.realtime.clone(),
        state.messages.clone(),
    );
    set_online(&state, &user.user_id, true).await;
    observability::register_realtime_event("connect", "handshake", "ok");
    tracing::info!(user_id = %user.user_id, connection_id, "realtime channel active");

    state
        .realtime
        .send_to(
            connection_id,
            &ServerEvent::Ready {
                connection_id,
                user_id: user.user_id.clone(),
                username: user.username.clone(),
            },
        )
        .await;

    let mut heartbeat = interval(Duration::from_secs(
        state.config.realtime_heartbeat_secs.max(1),
    ));
    heartbeat.tick().await;

    let reason = loop {
        tokio::select! {
            queued = outbound_rx.recv() => {
                let Some(payload) = queued else {
                    break "outbound closed";
                };
                if sender.send(Message::Text(payload)).await.is_err() {
                    break "send failed";
                }
            }
            frame = incoming.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => handle_text(&state, &session, &text).await,
                    Some(Ok(Message::Close(_))) | None => break "client closed",
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, connection_id, "realtime transport error");
                        break "transport error";
                    }
                }
            }
            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break "heartbeat failed";
                }
            }
        }
    };

    state.realtime.disconnect(connection_id).await;
    if state.realtime.group_size(&user_group(&user.user_id)).await == 0 {
        set_online(&state, &user.user_id, false).await;
    }
    observability::register_realtime_event("disconnect", reason, "ok");
    tracing::info!(user_id = %user.user_id, connection_id, reason, "realtime channel closed");
    let _ = sender.close().await;
}

async fn handshake(
    state: &AppState,
    credentials: &HandshakeCredentials,
) -> Result<UserProfile, DomainError> {
    let token = credentials
        .resolve()
        .ok_or_else(|| DomainError::Unauthorized("missing credential".into()))?;
    authenticate(state.identity.as_ref(), state.users.as_ref(), token).await
}

async fn await_auth_frame(
    incoming: &mut SplitStream<WebSocket>,
    wait: Duration,
) -> Option<String> {
    let first_frame = async {
        while let Some(Ok(message)) = incoming.next().await {
            match message {
                Message::Text(text) => {
                    return serde_json::from_str::<ClientFrame>(&text)
                        .ok()
                        .and_then(|frame| auth_frame_token(&frame));
                }
                Message::Close(_) => return None,
                _ => continue,
            }
        }
        None
    };
    timeout(wait, first_frame).await.ok().flatten()
}

async fn handle_text(state: &AppState, session: &ChannelSession, text: &str) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::debug!(error = %err, "unparseable realtime frame");
            let event = ServerEvent::error(DomainError::invalid("frame", "malformed frame"));
            state.realtime.send_to(session.connection_id(), &event).await;
            return;
        }
    };
    if let Some(ack) = session.handle(frame).await {
        state
            .realtime
            .send_to(session.connection_id(), &ServerEvent::Ack(ack))
            .await;
    }
}

async fn set_online(state: &AppState, user_id: &str, online: bool) {
    if let Err(err) = state.users.set_online_status(user_id, online).await {
        tracing::warn!(user_id = %user_id, online, error = %err, "failed to update online status");
    }
}
