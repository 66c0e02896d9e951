use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::{DomainError, FieldError};
use crate::identity::ActorIdentity;
use crate::ports::chat::ChatRepository;
use crate::ports::users::UserDirectory;
use crate::util::{is_valid_id, now_ms, uuid_v7_without_dashes};

const MAX_NAME_LENGTH: usize = 100;
const MAX_DESCRIPTION_LENGTH: usize = 500;
const ACCESS_DENIED: &str = "chat not found or access denied";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Direct,
    Group,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Direct => "direct",
            ChatKind::Group => "group",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "direct" => Some(ChatKind::Direct),
            "group" => Some(ChatKind::Group),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Admin,
    Member,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatParticipant {
    pub user_id: String,
    pub role: ParticipantRole,
    pub joined_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub chat_id: String,
    pub kind: ChatKind,
    pub participants: Vec<ChatParticipant>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub created_by: String,
    pub is_active: bool,
    pub last_message_id: Option<String>,
    pub dedupe_key: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Chat {
    pub fn participant(&self, user_id: &str) -> Option<&ChatParticipant> {
        self.participants
            .iter()
            .find(|participant| participant.user_id == user_id)
    }

    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participant(user_id).is_some()
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.participant(user_id)
            .is_some_and(|participant| participant.role == ParticipantRole::Admin)
    }

    pub fn participant_ids(&self) -> Vec<String> {
        self.participants
            .iter()
            .map(|participant| participant.user_id.clone())
            .collect()
    }
}

/// Store-side mutations of a chat, applied as a single update call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatUpdate {
    LastMessage { message_id: String, at_ms: i64 },
    Deactivate { at_ms: i64 },
}

impl ChatUpdate {
    pub fn apply(&self, chat: &Chat) -> Chat {
        let mut next = chat.clone();
        match self {
            ChatUpdate::LastMessage { message_id, at_ms } => {
                next.last_message_id = Some(message_id.clone());
                next.updated_at_ms = (*at_ms).max(chat.updated_at_ms);
            }
            ChatUpdate::Deactivate { at_ms } => {
                next.is_active = false;
                next.updated_at_ms = (*at_ms).max(chat.updated_at_ms);
            }
        }
        next
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatCreate {
    pub kind: ChatKind,
    pub participants: Vec<String>,
    pub name: Option<String>,
    pub description: Option<String>,
}

pub fn direct_dedupe_key(user_a: &str, user_b: &str) -> String {
    let mut pair = [user_a, user_b];
    pair.sort_unstable();
    pair.join(":")
}

#[derive(Clone)]
pub struct ChatService {
    repository: Arc<dyn ChatRepository>,
    users: Arc<dyn UserDirectory>,
}

impl ChatService {
    pub fn new(repository: Arc<dyn ChatRepository>, users: Arc<dyn UserDirectory>) -> Self {
        Self { repository, users }
    }

    pub async fn create(&self, actor: &ActorIdentity, input: ChatCreate) -> DomainResult<Chat> {
        match input.kind {
            ChatKind::Direct => {
                let mut seen = HashSet::from([actor.user_id.as_str()]);
                let others: Vec<&str> = input
                    .participants
                    .iter()
                    .map(String::as_str)
                    .filter(|user_id| seen.insert(*user_id))
                    .collect();
                let [other] = others.as_slice() else {
                    return Err(DomainError::invalid(
                        "participants",
                        "direct chat must have exactly two distinct participants",
                    ));
                };
                self.create_direct(&actor.user_id, other).await
            }
            ChatKind::Group => {
                self.create_group(
                    &actor.user_id,
                    &input.participants,
                    input.name.as_deref().unwrap_or_default(),
                    input.description,
                )
                .await
            }
        }
    }

    pub async fn create_direct(&self, user_a: &str, user_b: &str) -> DomainResult<Chat> {
        validate_participant_ids(&[user_a, user_b])?;
        if user_a == user_b {
            return Err(DomainError::invalid(
                "participants",
                "direct chat must have exactly two distinct participants",
            ));
        }

        let dedupe_key = direct_dedupe_key(user_a, user_b);
        if let Some(existing) = self.repository.find_direct_chat(&dedupe_key).await? {
            return Ok(existing);
        }

        self.ensure_users_exist(&[user_a, user_b]).await?;

        let now = now_ms();
        let chat = Chat {
            chat_id: uuid_v7_without_dashes(),
            kind: ChatKind::Direct,
            participants: [user_a, user_b]
                .into_iter()
                .map(|user_id| ChatParticipant {
                    user_id: user_id.to_string(),
                    role: ParticipantRole::Member,
                    joined_at_ms: now,
                })
                .collect(),
            name: None,
            description: None,
            avatar: None,
            created_by: user_a.to_string(),
            is_active: true,
            last_message_id: None,
            dedupe_key: Some(dedupe_key.clone()),
            created_at_ms: now,
            updated_at_ms: now,
        };

        match self.repository.create_chat(&chat).await {
            Err(DomainError::Conflict) => self
                .repository
                .find_direct_chat(&dedupe_key)
                .await?
                .ok_or(DomainError::Conflict),
            other => other,
        }
    }

    pub async fn create_group(
        &self,
        creator_id: &str,
        other_ids: &[String],
        name: &str,
        description: Option<String>,
    ) -> DomainResult<Chat> {
        let mut errors = Vec::new();
        let name = name.trim();
        if name.is_empty() {
            errors.push(FieldError::new("name", "name is required for group chats"));
        } else if name.chars().count() > MAX_NAME_LENGTH {
            errors.push(FieldError::new(
                "name",
                format!("name exceeds max length of {MAX_NAME_LENGTH}"),
            ));
        }
        let description = description
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        if description
            .as_ref()
            .is_some_and(|value| value.chars().count() > MAX_DESCRIPTION_LENGTH)
        {
            errors.push(FieldError::new(
                "description",
                format!("description exceeds max length of {MAX_DESCRIPTION_LENGTH}"),
            ));
        }

        let mut seen = HashSet::from([creator_id]);
        let others: Vec<&str> = other_ids
            .iter()
            .map(String::as_str)
            .filter(|user_id| seen.insert(*user_id))
            .collect();
        let mut all_ids = vec![creator_id];
        all_ids.extend(others.iter().copied());
        if let Err(DomainError::Validation(id_errors)) = validate_participant_ids(&all_ids) {
            errors.extend(id_errors);
        }
        if !errors.is_empty() {
            return Err(DomainError::Validation(errors));
        }

        self.ensure_users_exist(&others).await?;

        let now = now_ms();
        let mut participants = vec![ChatParticipant {
            user_id: creator_id.to_string(),
            role: ParticipantRole::Admin,
            joined_at_ms: now,
        }];
        participants.extend(others.iter().map(|user_id| ChatParticipant {
            user_id: user_id.to_string(),
            role: ParticipantRole::Member,
            joined_at_ms: now,
        }));

        let chat = Chat {
            chat_id: uuid_v7_without_dashes(),
            kind: ChatKind::Group,
            participants,
            name: Some(name.to_string()),
            description,
            avatar: None,
            created_by: creator_id.to_string(),
            is_active: true,
            last_message_id: None,
            dedupe_key: None,
            created_at_ms: now,
            updated_at_ms: now,
        };
        self.repository.create_chat(&chat).await
    }

    pub async fn list_for_user(&self, user_id: &str) -> DomainResult<Vec<Chat>> {
        self.repository.list_chats_by_user(user_id).await
    }

    pub async fn get_by_id(&self, chat_id: &str, requesting_user_id: &str) -> DomainResult<Chat> {
        validate_chat_id(chat_id)?;
        self.repository
            .get_chat(chat_id)
            .await?
            .filter(|chat| chat.is_active && chat.has_participant(requesting_user_id))
            .ok_or_else(|| DomainError::NotFound(ACCESS_DENIED.into()))
    }

    pub async fn is_member(&self, chat_id: &str, user_id: &str) -> DomainResult<bool> {
        if !is_valid_id(chat_id) {
            return Ok(false);
        }
        self.repository.is_member(chat_id, user_id).await
    }

    pub async fn set_last_message(&self, chat_id: &str, message_id: &str) -> DomainResult<()> {
        let update = ChatUpdate::LastMessage {
            message_id: message_id.to_string(),
            at_ms: now_ms(),
        };
        self.repository
            .apply_update(chat_id, &update)
            .await?
            .ok_or_else(|| DomainError::NotFound(ACCESS_DENIED.into()))?;
        Ok(())
    }

    pub async fn deactivate(&self, actor: &ActorIdentity, chat_id: &str) -> DomainResult<Chat> {
        let chat = self.get_by_id(chat_id, &actor.user_id).await?;
        if chat.kind == ChatKind::Group && !chat.is_admin(&actor.user_id) {
            return Err(DomainError::Unauthorized(
                "only a group admin can close this chat".into(),
            ));
        }
        self.repository
            .apply_update(chat_id, &ChatUpdate::Deactivate { at_ms: now_ms() })
            .await?
            .ok_or_else(|| DomainError::NotFound(ACCESS_DENIED.into()))
    }

    async fn ensure_users_exist(&self, user_ids: &[&str]) -> DomainResult<()> {
        let mut missing = Vec::new();
        for user_id in user_ids {
            if self.users.find_by_id(user_id).await?.is_none() {
                missing.push(
                    FieldError::new("participants", "user not found").with_value(*user_id),
                );
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DomainError::Validation(missing))
        }
    }
}

pub fn validate_chat_id(chat_id: &str) -> DomainResult<()> {
    if is_valid_id(chat_id) {
        Ok(())
    } else {
        Err(DomainError::Validation(vec![
            FieldError::new("chat_id", "invalid chat id").with_value(chat_id),
        ]))
    }
}

fn validate_participant_ids(user_ids: &[&str]) -> DomainResult<()> {
    let errors: Vec<FieldError> = user_ids
        .iter()
        .filter(|user_id| !is_valid_id(user_id))
        .map(|user_id| FieldError::new("participants", "invalid user id").with_value(*user_id))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(DomainError::Validation(errors))
    }
}
