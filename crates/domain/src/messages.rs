use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::chat::{Chat, ChatService, validate_chat_id};
use crate::error::{DomainError, FieldError};
use crate::ports::messages::MessageRepository;
use crate::util::{is_valid_id, now_ms, uuid_v7_without_dashes};

pub const MAX_CONTENT_LENGTH: usize = 4_000;
pub const MAX_ATTACHMENT_FIELD_LENGTH: usize = 2_048;
const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Video,
    File,
    Audio,
}

impl AttachmentKind {
    pub const ALL: [AttachmentKind; 4] = [
        AttachmentKind::Image,
        AttachmentKind::Video,
        AttachmentKind::File,
        AttachmentKind::Audio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::Image => "image",
            AttachmentKind::Video => "video",
            AttachmentKind::File => "file",
            AttachmentKind::Audio => "audio",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadReceipt {
    pub user_id: String,
    pub read_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub message_id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
    pub read_by: Vec<ReadReceipt>,
    pub deleted: bool,
    pub deleted_at_ms: Option<i64>,
    pub deleted_by: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl ChatMessage {
    pub fn is_read_by(&self, user_id: &str) -> bool {
        self.read_by.iter().any(|receipt| receipt.user_id == user_id)
    }

    /// Appends a receipt for `user_id` when none exists yet.
    pub fn record_read(&mut self, user_id: &str, read_at_ms: i64) -> bool {
        if self.is_read_by(user_id) {
            return false;
        }
        self.read_by.push(ReadReceipt {
            user_id: user_id.to_string(),
            read_at_ms,
        });
        true
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    Attachment(Attachment),
}

impl MessageBody {
    pub fn from_parts(
        content: Option<String>,
        attachment: Option<Attachment>,
    ) -> Result<Self, Vec<FieldError>> {
        let content = content
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        match (content, attachment) {
            (None, None) => Err(vec![FieldError::new(
                "content",
                "content or attachment is required",
            )]),
            (Some(_), Some(_)) => Err(vec![FieldError::new(
                "content",
                "provide either content or an attachment, not both",
            )]),
            (Some(content), None) => {
                if content.chars().count() > MAX_CONTENT_LENGTH {
                    return Err(vec![FieldError::new(
                        "content",
                        format!("content exceeds max length of {MAX_CONTENT_LENGTH}"),
                    )]);
                }
                Ok(MessageBody::Text(content))
            }
            (None, Some(attachment)) => {
                validate_attachment(attachment).map(MessageBody::Attachment)
            }
        }
    }

    fn into_parts(self) -> (Option<String>, Option<Attachment>) {
        match self {
            MessageBody::Text(content) => (Some(content), None),
            MessageBody::Attachment(attachment) => (None, Some(attachment)),
        }
    }
}

fn validate_attachment(mut attachment: Attachment) -> Result<Attachment, Vec<FieldError>> {
    let mut errors = Vec::new();
    for (field, value) in [
        ("attachment.url", &mut attachment.url),
        ("attachment.name", &mut attachment.name),
    ] {
        *value = value
            .take()
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        if value
            .as_ref()
            .is_some_and(|text| text.chars().count() > MAX_ATTACHMENT_FIELD_LENGTH)
        {
            errors.push(FieldError::new(
                field,
                format!("{field} exceeds max length of {MAX_ATTACHMENT_FIELD_LENGTH}"),
            ));
        }
    }
    if errors.is_empty() {
        Ok(attachment)
    } else {
        Err(errors)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendMessageInput {
    pub chat_id: String,
    pub sender_id: String,
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessagePage {
    pub limit: usize,
    pub before: Option<String>,
}

pub fn build_message_page(
    limit: Option<usize>,
    before: Option<String>,
) -> DomainResult<MessagePage> {
    let before = before.filter(|value| !value.is_empty());
    if let Some(cursor) = before.as_deref() {
        if !is_valid_id(cursor) {
            return Err(DomainError::Validation(vec![
                FieldError::new("before", "invalid message id").with_value(cursor),
            ]));
        }
    }
    Ok(MessagePage {
        limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        before,
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadRequest {
    pub user_id: String,
    pub up_to: Option<String>,
    pub read_at_ms: i64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadOutcome {
    pub modified: u64,
}

/// A chat as shown to a participant, with its newest message inlined.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ChatSummary {
    #[serde(flatten)]
    pub chat: Chat,
    pub last_message: Option<ChatMessage>,
}

#[derive(Clone)]
pub struct MessageService {
    repository: Arc<dyn MessageRepository>,
    chats: ChatService,
}

impl MessageService {
    pub fn new(repository: Arc<dyn MessageRepository>, chats: ChatService) -> Self {
        Self { repository, chats }
    }

    pub fn chats(&self) -> &ChatService {
        &self.chats
    }

    pub async fn send(&self, input: SendMessageInput) -> DomainResult<ChatMessage> {
        let mut errors = Vec::new();
        if !is_valid_id(&input.chat_id) {
            errors.push(
                FieldError::new("chat_id", "invalid chat id").with_value(input.chat_id.as_str()),
            );
        }
        if !is_valid_id(&input.sender_id) {
            errors.push(
                FieldError::new("sender_id", "invalid sender id").with_value(input.sender_id.as_str()),
            );
        }
        let body = match MessageBody::from_parts(input.content, input.attachment) {
            Ok(body) => Some(body),
            Err(body_errors) => {
                errors.extend(body_errors);
                None
            }
        };
        let Some(body) = body.filter(|_| errors.is_empty()) else {
            return Err(DomainError::Validation(errors));
        };

        if !self.chats.is_member(&input.chat_id, &input.sender_id).await? {
            return Err(DomainError::NotFound("chat not found or access denied".into()));
        }

        let now = now_ms();
        let (content, attachment) = body.into_parts();
        let message = ChatMessage {
            message_id: uuid_v7_without_dashes(),
            chat_id: input.chat_id,
            sender_id: input.sender_id.clone(),
            content,
            attachment,
            read_by: vec![ReadReceipt {
                user_id: input.sender_id,
                read_at_ms: now,
            }],
            deleted: false,
            deleted_at_ms: None,
            deleted_by: None,
            created_at_ms: now,
            updated_at_ms: now,
        };

        let message = self.repository.create_message(&message).await?;
        self.chats
            .set_last_message(&message.chat_id, &message.message_id)
            .await?;
        Ok(message)
    }

    pub async fn list(
        &self,
        chat_id: &str,
        requesting_user_id: &str,
        page: MessagePage,
    ) -> DomainResult<Vec<ChatMessage>> {
        self.assert_member(chat_id, requesting_user_id).await?;
        let mut messages = self.repository.list_messages(chat_id, &page).await?;
        messages.reverse();
        Ok(messages)
    }

    pub async fn mark_read(
        &self,
        chat_id: &str,
        user_id: &str,
        up_to: Option<String>,
    ) -> DomainResult<ReadOutcome> {
        let up_to = up_to.filter(|value| !value.is_empty());
        if let Some(cursor) = up_to.as_deref() {
            if !is_valid_id(cursor) {
                return Err(DomainError::Validation(vec![
                    FieldError::new("up_to", "invalid message id").with_value(cursor),
                ]));
            }
        }
        self.assert_member(chat_id, user_id).await?;

        let request = ReadRequest {
            user_id: user_id.to_string(),
            up_to,
            read_at_ms: now_ms(),
        };
        let modified = self.repository.mark_read(chat_id, &request).await?;
        Ok(ReadOutcome { modified })
    }

    pub async fn unread_count(&self, chat_id: &str, user_id: &str) -> DomainResult<u64> {
        self.assert_member(chat_id, user_id).await?;
        self.repository.count_unread(chat_id, user_id).await
    }

    pub async fn list_chats(&self, user_id: &str) -> DomainResult<Vec<ChatSummary>> {
        let chats = self.chats.list_for_user(user_id).await?;
        self.summarize(chats).await
    }

    pub async fn chat_summary(
        &self,
        chat_id: &str,
        requesting_user_id: &str,
    ) -> DomainResult<ChatSummary> {
        let chat = self.chats.get_by_id(chat_id, requesting_user_id).await?;
        let mut summaries = self.summarize(vec![chat]).await?;
        summaries
            .pop()
            .ok_or_else(|| DomainError::NotFound("chat not found or access denied".into()))
    }

    async fn summarize(&self, chats: Vec<Chat>) -> DomainResult<Vec<ChatSummary>> {
        let wanted: Vec<String> = chats
            .iter()
            .filter_map(|chat| chat.last_message_id.clone())
            .collect();
        let mut found: HashMap<String, ChatMessage> = if wanted.is_empty() {
            HashMap::new()
        } else {
            self.repository
                .find_messages(&wanted)
                .await?
                .into_iter()
                .map(|message| (message.message_id.clone(), message))
                .collect()
        };
        Ok(chats
            .into_iter()
            .map(|chat| {
                let last_message = chat
                    .last_message_id
                    .as_ref()
                    .and_then(|message_id| found.remove(message_id));
                ChatSummary { chat, last_message }
            })
            .collect())
    }

    async fn assert_member(&self, chat_id: &str, user_id: &str) -> DomainResult<()> {
        validate_chat_id(chat_id)?;
        if self.chats.is_member(chat_id, user_id).await? {
            Ok(())
        } else {
            Err(DomainError::Unauthorized("not a member of this chat".into()))
        }
    }
}
