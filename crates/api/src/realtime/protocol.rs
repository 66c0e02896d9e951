use obrolan_domain::error::{DomainError, FieldError};
use obrolan_domain::messages::ChatMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const EVENT_AUTH: &str = "auth";
pub const EVENT_CHAT_JOIN: &str = "chat:join";
pub const EVENT_CHAT_LEAVE: &str = "chat:leave";
pub const EVENT_MESSAGE_SEND: &str = "message:send";
pub const EVENT_MESSAGE_READ: &str = "message:read";

/// Inbound frame: `{"event": .., "ack": .., "data": ..}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub ack: Option<u64>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "ready")]
    Ready {
        connection_id: u64,
        user_id: String,
        username: String,
    },
    #[serde(rename = "ack")]
    Ack(Ack),
    #[serde(rename = "message:new")]
    MessageNew(ChatMessage),
    #[serde(rename = "message:read")]
    MessageRead {
        chat_id: String,
        user_id: String,
        up_to: Option<String>,
        modified: u64,
    },
    #[serde(rename = "chat:closed")]
    ChatClosed { chat_id: String },
    #[serde(rename = "error")]
    Error {
        kind: &'static str,
        message: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        details: Vec<FieldError>,
    },
}

impl ServerEvent {
    pub fn error(err: DomainError) -> Self {
        let failure = Failure::from(err);
        ServerEvent::Error {
            kind: failure.kind,
            message: failure.message,
            details: failure.details,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Ack {
    pub ack: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<FieldError>,
}

impl Ack {
    pub fn success(ack: u64) -> Self {
        Self {
            ack,
            success: true,
            modified: None,
            message_id: None,
            error: None,
            kind: None,
            details: Vec::new(),
        }
    }

    pub fn failure(ack: u64, err: DomainError) -> Self {
        let failure = Failure::from(err);
        Self {
            error: Some(failure.message),
            kind: Some(failure.kind),
            details: failure.details,
            success: false,
            ..Self::success(ack)
        }
    }

    pub fn with_modified(mut self, modified: u64) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

struct Failure {
    kind: &'static str,
    message: String,
    details: Vec<FieldError>,
}

impl From<DomainError> for Failure {
    fn from(err: DomainError) -> Self {
        let (kind, message, details) = match err {
            DomainError::Validation(details) => {
                ("validation", "validation failed".to_string(), details)
            }
            DomainError::Unauthorized(message) => ("authentication", message, Vec::new()),
            DomainError::NotFound(message) => ("not_found", message, Vec::new()),
            DomainError::Conflict => ("conflict", "conflict".to_string(), Vec::new()),
            DomainError::Storage(message) => {
                tracing::error!(error = %message, "realtime store operation failed");
                ("internal", "internal error".to_string(), Vec::new())
            }
        };
        Self {
            kind,
            message,
            details,
        }
    }
}
