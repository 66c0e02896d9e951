use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::DomainResult;
use crate::chat::{Chat, ChatUpdate};
use crate::error::DomainError;
use crate::messages::{ChatMessage, MessagePage, ReadRequest};
use crate::ports::BoxFuture;
use crate::ports::auth::{IdentityGate, PasswordHasher, VerifiedToken};
use crate::ports::chat::ChatRepository;
use crate::ports::messages::MessageRepository;
use crate::ports::users::UserDirectory;
use crate::users::{UserAccount, UserProfile};

pub fn user_id(n: usize) -> String {
    format!("{n:032x}")
}

pub fn profile(n: usize) -> UserProfile {
    UserProfile {
        user_id: user_id(n),
        username: format!("user{n}"),
        email: format!("user{n}@example.com"),
        is_active: true,
        is_online: false,
    }
}

pub struct StaticGate;

impl IdentityGate for StaticGate {
    fn verify(&self, token: &str) -> DomainResult<VerifiedToken> {
        Ok(VerifiedToken {
            user_id: token.to_string(),
        })
    }

    fn issue(&self, user_id: &str) -> DomainResult<String> {
        Ok(user_id.to_string())
    }
}

pub struct PlainHasher;

impl PasswordHasher for PlainHasher {
    fn hash(&self, password: &str) -> DomainResult<String> {
        Ok(format!("plain${password}"))
    }

    fn verify(&self, password: &str, hash: &str) -> DomainResult<bool> {
        Ok(hash.strip_prefix("plain$") == Some(password))
    }
}

#[derive(Default)]
pub struct MockUsers {
    users: Arc<RwLock<HashMap<String, UserProfile>>>,
    password_hashes: Arc<RwLock<HashMap<String, String>>>,
}

impl MockUsers {
    pub fn with(profiles: Vec<UserProfile>) -> Self {
        let users = profiles
            .into_iter()
            .map(|profile| (profile.user_id.clone(), profile))
            .collect();
        Self {
            users: Arc::new(RwLock::new(users)),
            password_hashes: Arc::default(),
        }
    }
}

impl UserDirectory for MockUsers {
    fn find_by_id(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Option<UserProfile>>> {
        let user_id = user_id.to_string();
        let users = self.users.clone();
        Box::pin(async move { Ok(users.read().await.get(&user_id).cloned()) })
    }

    fn email_exists(&self, email: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let email = email.to_string();
        let users = self.users.clone();
        Box::pin(async move {
            Ok(users
                .read()
                .await
                .values()
                .any(|user| user.email.eq_ignore_ascii_case(&email)))
        })
    }

    fn username_exists(&self, username: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let username = username.to_string();
        let users = self.users.clone();
        Box::pin(async move {
            Ok(users
                .read()
                .await
                .values()
                .any(|user| user.username.eq_ignore_ascii_case(&username)))
        })
    }

    fn set_online_status(&self, user_id: &str, online: bool) -> BoxFuture<'_, DomainResult<()>> {
        let user_id = user_id.to_string();
        let users = self.users.clone();
        Box::pin(async move {
            if let Some(user) = users.write().await.get_mut(&user_id) {
                user.is_online = online;
            }
            Ok(())
        })
    }

    fn create_account(&self, account: &UserAccount) -> BoxFuture<'_, DomainResult<UserProfile>> {
        let account = account.clone();
        Box::pin(async move {
            let mut users = self.users.write().await;
            if users.values().any(|user| user.email == account.profile.email) {
                return Err(DomainError::Conflict);
            }
            users.insert(account.profile.user_id.clone(), account.profile.clone());
            self.password_hashes
                .write()
                .await
                .insert(account.profile.user_id.clone(), account.password_hash);
            Ok(account.profile)
        })
    }

    fn find_account_by_email(
        &self,
        email: &str,
    ) -> BoxFuture<'_, DomainResult<Option<UserAccount>>> {
        let email = email.to_string();
        Box::pin(async move {
            let users = self.users.read().await;
            let Some(profile) = users.values().find(|user| user.email == email) else {
                return Ok(None);
            };
            let hashes = self.password_hashes.read().await;
            Ok(hashes.get(&profile.user_id).map(|hash| UserAccount {
                profile: profile.clone(),
                password_hash: hash.clone(),
            }))
        })
    }
}

#[derive(Default)]
pub struct MockChatRepo {
    chats: Arc<RwLock<HashMap<String, Chat>>>,
    direct_keys: Arc<RwLock<HashMap<String, String>>>,
}

impl MockChatRepo {
    pub async fn chat_count(&self) -> usize {
        self.chats.read().await.len()
    }

    pub async fn chat(&self, chat_id: &str) -> Option<Chat> {
        self.chats.read().await.get(chat_id).cloned()
    }
}

impl ChatRepository for MockChatRepo {
    fn create_chat(&self, chat: &Chat) -> BoxFuture<'_, DomainResult<Chat>> {
        let chat = chat.clone();
        let chats = self.chats.clone();
        let direct_keys = self.direct_keys.clone();
        Box::pin(async move {
            let mut direct_keys = direct_keys.write().await;
            if let Some(key) = chat.dedupe_key.as_ref() {
                if direct_keys.contains_key(key) {
                    return Err(DomainError::Conflict);
                }
                direct_keys.insert(key.clone(), chat.chat_id.clone());
            }
            chats.write().await.insert(chat.chat_id.clone(), chat.clone());
            Ok(chat)
        })
    }

    fn find_direct_chat(&self, dedupe_key: &str) -> BoxFuture<'_, DomainResult<Option<Chat>>> {
        let dedupe_key = dedupe_key.to_string();
        let chats = self.chats.clone();
        let direct_keys = self.direct_keys.clone();
        Box::pin(async move {
            let Some(chat_id) = direct_keys.read().await.get(&dedupe_key).cloned() else {
                return Ok(None);
            };
            Ok(chats.read().await.get(&chat_id).cloned())
        })
    }

    fn get_chat(&self, chat_id: &str) -> BoxFuture<'_, DomainResult<Option<Chat>>> {
        let chat_id = chat_id.to_string();
        let chats = self.chats.clone();
        Box::pin(async move { Ok(chats.read().await.get(&chat_id).cloned()) })
    }

    fn list_chats_by_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Chat>>> {
        let user_id = user_id.to_string();
        let chats = self.chats.clone();
        Box::pin(async move {
            let mut output: Vec<_> = chats
                .read()
                .await
                .values()
                .filter(|chat| chat.is_active && chat.has_participant(&user_id))
                .cloned()
                .collect();
            output.sort_by(|a, b| b.updated_at_ms.cmp(&a.updated_at_ms));
            Ok(output)
        })
    }

    fn is_member(&self, chat_id: &str, user_id: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let chat_id = chat_id.to_string();
        let user_id = user_id.to_string();
        let chats = self.chats.clone();
        Box::pin(async move {
            Ok(chats
                .read()
                .await
                .get(&chat_id)
                .is_some_and(|chat| chat.is_active && chat.has_participant(&user_id)))
        })
    }

    fn apply_update(
        &self,
        chat_id: &str,
        update: &ChatUpdate,
    ) -> BoxFuture<'_, DomainResult<Option<Chat>>> {
        let chat_id = chat_id.to_string();
        let update = update.clone();
        let chats = self.chats.clone();
        let direct_keys = self.direct_keys.clone();
        Box::pin(async move {
            let mut chats = chats.write().await;
            let Some(current) = chats.get(&chat_id) else {
                return Ok(None);
            };
            let next = update.apply(current);
            if !next.is_active {
                if let Some(key) = next.dedupe_key.as_ref() {
                    direct_keys.write().await.remove(key);
                }
            }
            chats.insert(chat_id, next.clone());
            Ok(Some(next))
        })
    }
}

#[derive(Default)]
pub struct MockMessageRepo {
    messages: Arc<RwLock<HashMap<String, ChatMessage>>>,
}

impl MockMessageRepo {
    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

impl MessageRepository for MockMessageRepo {
    fn create_message(&self, message: &ChatMessage) -> BoxFuture<'_, DomainResult<ChatMessage>> {
        let message = message.clone();
        let messages = self.messages.clone();
        Box::pin(async move {
            let mut messages = messages.write().await;
            if messages.contains_key(&message.message_id) {
                return Err(DomainError::Conflict);
            }
            messages.insert(message.message_id.clone(), message.clone());
            Ok(message)
        })
    }

    fn list_messages(
        &self,
        chat_id: &str,
        page: &MessagePage,
    ) -> BoxFuture<'_, DomainResult<Vec<ChatMessage>>> {
        let chat_id = chat_id.to_string();
        let page = page.clone();
        let messages = self.messages.clone();
        Box::pin(async move {
            let mut output: Vec<_> = messages
                .read()
                .await
                .values()
                .filter(|message| message.chat_id == chat_id)
                .filter(|message| {
                    page.before
                        .as_ref()
                        .is_none_or(|before| &message.message_id < before)
                })
                .cloned()
                .collect();
            output.sort_by(|a, b| b.message_id.cmp(&a.message_id));
            output.truncate(page.limit);
            Ok(output)
        })
    }

    fn find_messages(
        &self,
        message_ids: &[String],
    ) -> BoxFuture<'_, DomainResult<Vec<ChatMessage>>> {
        let message_ids = message_ids.to_vec();
        let messages = self.messages.clone();
        Box::pin(async move {
            let messages = messages.read().await;
            Ok(message_ids
                .iter()
                .filter_map(|message_id| messages.get(message_id).cloned())
                .collect())
        })
    }

    fn mark_read(&self, chat_id: &str, request: &ReadRequest) -> BoxFuture<'_, DomainResult<u64>> {
        let chat_id = chat_id.to_string();
        let request = request.clone();
        let messages = self.messages.clone();
        Box::pin(async move {
            let mut modified = 0;
            for message in messages.write().await.values_mut() {
                let in_range = request
                    .up_to
                    .as_ref()
                    .is_none_or(|up_to| &message.message_id <= up_to);
                if message.chat_id == chat_id
                    && in_range
                    && message.record_read(&request.user_id, request.read_at_ms)
                {
                    modified += 1;
                }
            }
            Ok(modified)
        })
    }

    fn count_unread(&self, chat_id: &str, user_id: &str) -> BoxFuture<'_, DomainResult<u64>> {
        let chat_id = chat_id.to_string();
        let user_id = user_id.to_string();
        let messages = self.messages.clone();
        Box::pin(async move {
            Ok(messages
                .read()
                .await
                .values()
                .filter(|message| message.chat_id == chat_id && !message.is_read_by(&user_id))
                .count() as u64)
        })
    }
}
