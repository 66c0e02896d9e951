use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use obrolan_domain::DomainResult;
use obrolan_domain::chat::{Chat, ChatUpdate};
use obrolan_domain::error::DomainError;
use obrolan_domain::messages::{ChatMessage, MessagePage, ReadRequest};
use obrolan_domain::ports::BoxFuture;
use obrolan_domain::ports::chat::ChatRepository;
use obrolan_domain::ports::messages::MessageRepository;
use obrolan_domain::ports::users::UserDirectory;
use obrolan_domain::users::{UserAccount, UserProfile};
use tokio::sync::RwLock;

#[derive(Default)]
struct ChatTables {
    chats: HashMap<String, Chat>,
    // dedupe key -> chat id, active direct chats only
    direct_keys: HashMap<String, String>,
}

#[derive(Default, Clone)]
pub struct InMemoryChatRepository {
    store: Arc<RwLock<ChatTables>>,
}

impl InMemoryChatRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChatRepository for InMemoryChatRepository {
    fn create_chat(&self, chat: &Chat) -> BoxFuture<'_, DomainResult<Chat>> {
        let chat = chat.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            if store.chats.contains_key(&chat.chat_id) {
                return Err(DomainError::Conflict);
            }
            if let Some(key) = chat.dedupe_key.as_ref().filter(|_| chat.is_active) {
                if store.direct_keys.contains_key(key) {
                    return Err(DomainError::Conflict);
                }
                store.direct_keys.insert(key.clone(), chat.chat_id.clone());
            }
            store.chats.insert(chat.chat_id.clone(), chat.clone());
            Ok(chat)
        })
    }

    fn find_direct_chat(&self, dedupe_key: &str) -> BoxFuture<'_, DomainResult<Option<Chat>>> {
        let dedupe_key = dedupe_key.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let store = store.read().await;
            Ok(store
                .direct_keys
                .get(&dedupe_key)
                .and_then(|chat_id| store.chats.get(chat_id))
                .filter(|chat| chat.is_active)
                .cloned())
        })
    }

    fn get_chat(&self, chat_id: &str) -> BoxFuture<'_, DomainResult<Option<Chat>>> {
        let chat_id = chat_id.to_string();
        let store = self.store.clone();
        Box::pin(async move { Ok(store.read().await.chats.get(&chat_id).cloned()) })
    }

    fn list_chats_by_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Chat>>> {
        let user_id = user_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut chats: Vec<_> = store
                .read()
                .await
                .chats
                .values()
                .filter(|chat| chat.is_active && chat.has_participant(&user_id))
                .cloned()
                .collect();
            chats.sort_by(|a, b| {
                b.updated_at_ms
                    .cmp(&a.updated_at_ms)
                    .then_with(|| b.chat_id.cmp(&a.chat_id))
            });
            Ok(chats)
        })
    }

    fn is_member(&self, chat_id: &str, user_id: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let chat_id = chat_id.to_string();
        let user_id = user_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            Ok(store
                .read()
                .await
                .chats
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
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let Some(next) = store.chats.get(&chat_id).map(|chat| update.apply(chat)) else {
                return Ok(None);
            };
            if !next.is_active {
                if let Some(key) = next.dedupe_key.as_ref() {
                    if store.direct_keys.get(key) == Some(&next.chat_id) {
                        store.direct_keys.remove(key);
                    }
                }
            }
            store.chats.insert(chat_id, next.clone());
            Ok(Some(next))
        })
    }
}

#[derive(Default, Clone)]
pub struct InMemoryMessageRepository {
    // chat id -> messages ordered by message id
    store: Arc<RwLock<HashMap<String, Vec<ChatMessage>>>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageRepository for InMemoryMessageRepository {
    fn create_message(&self, message: &ChatMessage) -> BoxFuture<'_, DomainResult<ChatMessage>> {
        let message = message.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let timeline = store.entry(message.chat_id.clone()).or_default();
            match timeline.binary_search_by(|probe| probe.message_id.cmp(&message.message_id)) {
                Ok(_) => Err(DomainError::Conflict),
                Err(position) => {
                    timeline.insert(position, message.clone());
                    Ok(message)
                }
            }
        })
    }

    fn list_messages(
        &self,
        chat_id: &str,
        page: &MessagePage,
    ) -> BoxFuture<'_, DomainResult<Vec<ChatMessage>>> {
        let chat_id = chat_id.to_string();
        let page = page.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let store = store.read().await;
            let Some(timeline) = store.get(&chat_id) else {
                return Ok(Vec::new());
            };
            let end = match page.before.as_ref() {
                Some(before) => timeline.partition_point(|message| &message.message_id < before),
                None => timeline.len(),
            };
            Ok(timeline[..end]
                .iter()
                .rev()
                .take(page.limit)
                .cloned()
                .collect())
        })
    }

    fn find_messages(
        &self,
        message_ids: &[String],
    ) -> BoxFuture<'_, DomainResult<Vec<ChatMessage>>> {
        let wanted: HashSet<String> = message_ids.iter().cloned().collect();
        let store = self.store.clone();
        Box::pin(async move {
            Ok(store
                .read()
                .await
                .values()
                .flatten()
                .filter(|message| wanted.contains(&message.message_id))
                .cloned()
                .collect())
        })
    }

    fn mark_read(&self, chat_id: &str, request: &ReadRequest) -> BoxFuture<'_, DomainResult<u64>> {
        let chat_id = chat_id.to_string();
        let request = request.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let Some(timeline) = store.get_mut(&chat_id) else {
                return Ok(0);
            };
            let end = match request.up_to.as_ref() {
                Some(up_to) => timeline.partition_point(|message| &message.message_id <= up_to),
                None => timeline.len(),
            };
            let mut modified = 0;
            for message in &mut timeline[..end] {
                if message.record_read(&request.user_id, request.read_at_ms) {
                    modified += 1;
                }
            }
            Ok(modified)
        })
    }

    fn count_unread(&self, chat_id: &str, user_id: &str) -> BoxFuture<'_, DomainResult<u64>> {
        let chat_id = chat_id.to_string();
        let user_id = user_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let count = store.read().await.get(&chat_id).map_or(0, |timeline| {
                timeline
                    .iter()
                    .filter(|message| !message.is_read_by(&user_id))
                    .count()
            });
            Ok(count as u64)
        })
    }
}

#[derive(Default)]
struct UserTables {
    profiles: HashMap<String, UserProfile>,
    // user id -> password hash, registered accounts only
    password_hashes: HashMap<String, String>,
}

impl UserTables {
    fn is_taken(&self, profile: &UserProfile) -> bool {
        self.profiles.values().any(|existing| {
            existing.user_id == profile.user_id
                || existing.email.eq_ignore_ascii_case(&profile.email)
                || existing.username.eq_ignore_ascii_case(&profile.username)
        })
    }
}

#[derive(Default, Clone)]
pub struct InMemoryUserDirectory {
    store: Arc<RwLock<UserTables>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, profile: UserProfile) -> DomainResult<UserProfile> {
        let mut store = self.store.write().await;
        if store.is_taken(&profile) {
            return Err(DomainError::Conflict);
        }
        store
            .profiles
            .insert(profile.user_id.clone(), profile.clone());
        Ok(profile)
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn find_by_id(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Option<UserProfile>>> {
        let user_id = user_id.to_string();
        let store = self.store.clone();
        Box::pin(async move { Ok(store.read().await.profiles.get(&user_id).cloned()) })
    }

    fn email_exists(&self, email: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let email = email.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            Ok(store
                .read()
                .await
                .profiles
                .values()
                .any(|user| user.email.eq_ignore_ascii_case(&email)))
        })
    }

    fn username_exists(&self, username: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let username = username.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            Ok(store
                .read()
                .await
                .profiles
                .values()
                .any(|user| user.username.eq_ignore_ascii_case(&username)))
        })
    }

    fn set_online_status(&self, user_id: &str, online: bool) -> BoxFuture<'_, DomainResult<()>> {
        let user_id = user_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            match store.write().await.profiles.get_mut(&user_id) {
                Some(user) => {
                    user.is_online = online;
                    Ok(())
                }
                None => Err(DomainError::NotFound(format!("user {user_id} not found"))),
            }
        })
    }

    fn create_account(&self, account: &UserAccount) -> BoxFuture<'_, DomainResult<UserProfile>> {
        let account = account.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            if store.is_taken(&account.profile) {
                return Err(DomainError::Conflict);
            }
            let user_id = account.profile.user_id.clone();
            store
                .password_hashes
                .insert(user_id.clone(), account.password_hash);
            store.profiles.insert(user_id, account.profile.clone());
            Ok(account.profile)
        })
    }

    fn find_account_by_email(
        &self,
        email: &str,
    ) -> BoxFuture<'_, DomainResult<Option<UserAccount>>> {
        let email = email.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let store = store.read().await;
            let account = store
                .profiles
                .values()
                .find(|user| user.email.eq_ignore_ascii_case(&email))
                .and_then(|profile| {
                    store
                        .password_hashes
                        .get(&profile.user_id)
                        .map(|hash| UserAccount {
                            profile: profile.clone(),
                            password_hash: hash.clone(),
                        })
                });
            Ok(account)
        })
    }
}
