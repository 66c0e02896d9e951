mod socket;

use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::{
    Json, Router,
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use obrolan_domain::{
    chat::{Chat, ChatCreate, ChatKind},
    error::FieldError,
    identity::ActorIdentity,
    messages::{
        Attachment, ChatMessage, ChatSummary, ReadOutcome, SendMessageInput, build_message_page,
    },
    users::{AuthSession, Credentials, Registration, UserProfile},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::middleware::AuthContext;
use crate::realtime::{ServerEvent, chat_group};
use crate::{
    error::{ApiError, ApiJson, ApiQuery},
    middleware as app_middleware, observability, state::AppState, validation,
};

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/chats", get(list_chats).post(create_chat))
        .route("/v1/chats/:chat_id", get(get_chat).delete(close_chat))
        .route(
            "/v1/chats/:chat_id/messages",
            get(list_messages).post(send_message),
        )
        .route("/v1/chats/:chat_id/read", post(mark_read))
        .route("/v1/chats/:chat_id/unread-count", get(unread_count))
        .route("/v1/auth/me", get(me))
        .route_layer(middleware::from_fn(app_middleware::require_auth_middleware));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/auth/register", post(register))
        .route("/v1/auth/login", post(login))
        .route("/v1/ws", get(socket::upgrade))
        .merge(protected)
        .route_layer(middleware::from_fn(app_middleware::metrics_layer))
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::auth_middleware,
        ))
        .layer(middleware::from_fn(
            app_middleware::correlation_id_middleware,
        ));

    if !state.config.is_test() {
        app = app.layer(app_middleware::rate_limit_layer());
    }

    app.with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
    data_backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    store_error: Option<String>,
}

async fn health(State(state): State<AppState>) -> Response {
    let probe = state.store.ping().await;
    let (status_code, status, store_error) = match probe {
        Ok(()) => (StatusCode::OK, "ok", None),
        Err(err) => {
            tracing::warn!(error = %err, "store health probe failed");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded", Some(err.to_string()))
        }
    };
    let body = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
        data_backend: state.store.backend(),
        store_error,
    };
    (status_code, Json(body)).into_response()
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed",
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize, Validate)]
struct CreateChatRequest {
    kind: String,
    #[serde(default)]
    #[validate(length(max = 256))]
    participants: Vec<String>,
    #[validate(length(max = 100))]
    name: Option<String>,
    #[validate(length(max = 500))]
    description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct SendMessageRequest {
    #[validate(length(max = 4_000))]
    content: Option<String>,
    attachment: Option<Attachment>,
}

#[derive(Debug, Deserialize, Validate)]
struct RegisterRequest {
    #[validate(length(max = 64))]
    username: String,
    #[validate(email, length(max = 254))]
    email: String,
    password: String,
    #[validate(must_match(other = "password", message = "passwords do not match"))]
    confirm_password: String,
}

#[derive(Debug, Deserialize, Validate)]
struct LoginRequest {
    #[validate(length(min = 1, max = 254))]
    email: String,
    #[validate(length(min = 1, message = "password is required"))]
    password: String,
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    limit: Option<usize>,
    before: Option<String>,
}

#[derive(Serialize)]
struct UnreadCountResponse {
    count: u64,
}

async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthSession>), ApiError> {
    validation::validate(&payload)?;
    let session = state
        .accounts
        .register(Registration {
            username: payload.username,
            email: payload.email,
            password: payload.password,
        })
        .await?;
    tracing::info!(user_id = %session.user.user_id, "user registered");
    Ok((StatusCode::CREATED, Json(session)))
}

async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<Json<AuthSession>, ApiError> {
    validation::validate(&payload)?;
    let session = state
        .accounts
        .login(Credentials {
            email: payload.email,
            password: payload.password,
        })
        .await?;
    tracing::info!(user_id = %session.user.user_id, "user logged in");
    Ok(Json(session))
}

async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<UserProfile>, ApiError> {
    let actor = actor_identity(&auth)?;
    let profile = state.accounts.profile(&actor.user_id).await?;
    Ok(Json(profile))
}

async fn create_chat(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiJson(payload): ApiJson<CreateChatRequest>,
) -> Result<(StatusCode, Json<Chat>), ApiError> {
    validation::validate(&payload)?;
    let actor = actor_identity(&auth)?;
    let kind = ChatKind::parse(&payload.kind).ok_or_else(|| {
        ApiError::validation(vec![
            FieldError::new("kind", "kind must be direct or group")
                .with_value(payload.kind.as_str()),
        ])
    })?;
    let chat = state
        .chats
        .create(
            &actor,
            ChatCreate {
                kind,
                participants: payload.participants,
                name: payload.name,
                description: payload.description,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

async fn list_chats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<ChatSummary>>, ApiError> {
    let actor = actor_identity(&auth)?;
    let chats = state.messages.list_chats(&actor.user_id).await?;
    Ok(Json(chats))
}

async fn get_chat(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(chat_id): Path<String>,
) -> Result<Json<ChatSummary>, ApiError> {
    let actor = actor_identity(&auth)?;
    let chat = state.messages.chat_summary(&chat_id, &actor.user_id).await?;
    Ok(Json(chat))
}

async fn close_chat(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(chat_id): Path<String>,
) -> Result<Json<Chat>, ApiError> {
    let actor = actor_identity(&auth)?;
    let chat = state.chats.deactivate(&actor, &chat_id).await?;
    let notified = state
        .realtime
        .close_group(
            &chat_group(&chat.chat_id),
            &ServerEvent::ChatClosed {
                chat_id: chat.chat_id.clone(),
            },
        )
        .await;
    observability::register_broadcast("chat:closed", notified);
    tracing::info!(
        chat_id = %chat.chat_id,
        closed_by = %actor.user_id,
        notified,
        "chat deactivated"
    );
    Ok(Json(chat))
}

async fn send_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(chat_id): Path<String>,
    ApiJson(payload): ApiJson<SendMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), ApiError> {
    validation::validate(&payload)?;
    let actor = actor_identity(&auth)?;
    let message = state
        .messages
        .send(SendMessageInput {
            chat_id,
            sender_id: actor.user_id,
            content: payload.content,
            attachment: payload.attachment,
        })
        .await?;
    let recipients = state
        .realtime
        .broadcast(
            &chat_group(&message.chat_id),
            &ServerEvent::MessageNew(message.clone()),
        )
        .await;
    observability::register_broadcast("message:new", recipients);
    Ok((StatusCode::CREATED, Json(message)))
}

async fn list_messages(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(chat_id): Path<String>,
    ApiQuery(query): ApiQuery<MessagesQuery>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let actor = actor_identity(&auth)?;
    let page = build_message_page(query.limit, query.before)?;
    let messages = state
        .messages
        .list(&chat_id, &actor.user_id, page)
        .await?;
    Ok(Json(messages))
}

async fn mark_read(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(chat_id): Path<String>,
    body: Bytes,
) -> Result<Json<ReadOutcome>, ApiError> {
    let actor = actor_identity(&auth)?;
    let up_to = read_cursor(&body)?;
    let outcome = state
        .messages
        .mark_read(&chat_id, &actor.user_id, up_to.clone())
        .await?;
    let recipients = state
        .realtime
        .broadcast(
            &chat_group(&chat_id),
            &ServerEvent::MessageRead {
                chat_id: chat_id.clone(),
                user_id: actor.user_id,
                up_to,
                modified: outcome.modified,
            },
        )
        .await;
    observability::register_broadcast("message:read", recipients);
    Ok(Json(outcome))
}

async fn unread_count(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(chat_id): Path<String>,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let actor = actor_identity(&auth)?;
    let count = state
        .messages
        .unread_count(&chat_id, &actor.user_id)
        .await?;
    Ok(Json(UnreadCountResponse { count }))
}

/// An empty body marks everything read. Any other body must be an object
/// whose optional `up_to` is a message id.
fn read_cursor(body: &[u8]) -> Result<Option<String>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|_| ApiError::invalid("body", "request body is not valid JSON"))?;
    let Value::Object(fields) = value else {
        return Err(ApiError::invalid("body", "request body must be a JSON object"));
    };
    match fields.get("up_to") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(up_to)) => Ok(Some(up_to.clone())),
        Some(other) => Err(ApiError::validation(vec![
            FieldError::new("up_to", "up_to must be a message id").with_value(other.clone()),
        ])),
    }
}

fn actor_identity(auth: &AuthContext) -> Result<ActorIdentity, ApiError> {
    auth.actor.clone().ok_or_else(ApiError::unauthenticated)
}
