use std::sync::Arc;

use metrics::counter;
use obrolan_domain::DomainResult;
use obrolan_domain::chat::{Chat, ChatUpdate};
use obrolan_domain::error::DomainError;
use obrolan_domain::messages::{ChatMessage, MessagePage, ReadRequest};
use obrolan_domain::ports::BoxFuture;
use obrolan_domain::ports::chat::ChatRepository;
use obrolan_domain::ports::messages::MessageRepository;
use obrolan_domain::ports::users::UserDirectory;
use obrolan_domain::users::{UserAccount, UserProfile};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, to_value};
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::Client;

const STORE_CONFLICTS_TOTAL: &str = "obrolan_store_conflicts_total";

const CHAT_SCHEMA: &str = "DEFINE INDEX IF NOT EXISTS chat_id_unique ON TABLE chat FIELDS chat_id UNIQUE;\n\
     DEFINE INDEX IF NOT EXISTS chat_participants ON TABLE chat FIELDS participant_ids;\n\
     DEFINE INDEX IF NOT EXISTS chat_message_id_unique ON TABLE chat_message FIELDS message_id UNIQUE;\n\
     DEFINE INDEX IF NOT EXISTS chat_message_timeline ON TABLE chat_message FIELDS chat_id, message_id;\n\
     DEFINE INDEX IF NOT EXISTS app_user_id_unique ON TABLE app_user FIELDS user_id UNIQUE;\n\
     DEFINE INDEX IF NOT EXISTS app_user_email_unique ON TABLE app_user FIELDS email UNIQUE;\n\
     DEFINE INDEX IF NOT EXISTS app_user_username_unique ON TABLE app_user FIELDS username UNIQUE;";

fn map_surreal_error(err: surrealdb::Error) -> DomainError {
    let error_message = err.to_string().to_lowercase();
    if error_message.contains("already exists")
        || error_message.contains("duplicate")
        || error_message.contains("unique")
        || error_message.contains("conflict")
    {
        return DomainError::Conflict;
    }
    DomainError::Storage(format!("surreal query failed: {error_message}"))
}

fn invalid_result(err: surrealdb::Error) -> DomainError {
    DomainError::Storage(format!("invalid query result: {err}"))
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>, what: &str) -> DomainResult<Vec<T>> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value::<T>(row)
                .map_err(|err| DomainError::Storage(format!("invalid {what} row: {err}")))
        })
        .collect()
}

fn encode_row<T: Serialize>(value: &T, what: &str) -> DomainResult<Value> {
    to_value(value).map_err(|err| DomainError::Storage(format!("invalid {what} payload: {err}")))
}

fn first_count(rows: &[Value], field: &str) -> u64 {
    rows.first()
        .and_then(|row| row.get(field))
        .and_then(|value| {
            value
                .as_u64()
                .or_else(|| value.as_i64().and_then(|count| u64::try_from(count).ok()))
        })
        .unwrap_or_default()
}

pub async fn ensure_schema(client: &Surreal<Client>) -> anyhow::Result<()> {
    let response = client.query(CHAT_SCHEMA).await?;
    response.check()?;
    tracing::info!("surreal chat schema ensured");
    Ok(())
}

// Stored chat rows carry a flat `participant_ids` array for membership filters.
#[derive(Serialize)]
struct ChatRow<'a> {
    #[serde(flatten)]
    chat: &'a Chat,
    participant_ids: Vec<String>,
}

#[derive(Clone)]
pub struct SurrealChatRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealChatRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }
}

impl ChatRepository for SurrealChatRepository {
    fn create_chat(&self, chat: &Chat) -> BoxFuture<'_, DomainResult<Chat>> {
        let payload = match encode_row(
            &ChatRow {
                chat,
                participant_ids: chat.participant_ids(),
            },
            "chat",
        ) {
            Ok(payload) => payload,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let chat = chat.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let response = match chat.dedupe_key.clone() {
                Some(dedupe_key) => client
                    .query(
                        "BEGIN TRANSACTION;\n\
                         CREATE type::record('chat_direct_key', $dedupe_key) CONTENT { chat_id: $chat_id };\n\
                         CREATE chat CONTENT $payload;\n\
                         COMMIT TRANSACTION;",
                    )
                    .bind(("dedupe_key", dedupe_key))
                    .bind(("chat_id", chat.chat_id.clone()))
                    .bind(("payload", payload)),
                None => client
                    .query("CREATE chat CONTENT $payload")
                    .bind(("payload", payload)),
            }
            .await
            .map_err(map_surreal_error)?;
            if let Err(err) = response.check() {
                let err = map_surreal_error(err);
                if matches!(err, DomainError::Conflict) {
                    counter!(STORE_CONFLICTS_TOTAL, "table" => "chat").increment(1);
                }
                return Err(err);
            }
            Ok(chat)
        })
    }

    fn find_direct_chat(&self, dedupe_key: &str) -> BoxFuture<'_, DomainResult<Option<Chat>>> {
        let dedupe_key = dedupe_key.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT * OMIT id, participant_ids FROM chat \
                     WHERE dedupe_key = $dedupe_key AND is_active = true LIMIT 1",
                )
                .bind(("dedupe_key", dedupe_key))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(invalid_result)?;
            Ok(decode_rows::<Chat>(rows, "chat")?.into_iter().next())
        })
    }

    fn get_chat(&self, chat_id: &str) -> BoxFuture<'_, DomainResult<Option<Chat>>> {
        let chat_id = chat_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT * OMIT id, participant_ids FROM chat WHERE chat_id = $chat_id LIMIT 1",
                )
                .bind(("chat_id", chat_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(invalid_result)?;
            Ok(decode_rows::<Chat>(rows, "chat")?.into_iter().next())
        })
    }

    fn list_chats_by_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Chat>>> {
        let user_id = user_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT * OMIT id, participant_ids FROM chat \
                     WHERE is_active = true AND participant_ids CONTAINS $user_id \
                     ORDER BY updated_at_ms DESC, chat_id DESC",
                )
                .bind(("user_id", user_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(invalid_result)?;
            decode_rows(rows, "chat")
        })
    }

    fn is_member(&self, chat_id: &str, user_id: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let chat_id = chat_id.to_string();
        let user_id = user_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT chat_id FROM chat \
                     WHERE chat_id = $chat_id AND is_active = true \
                     AND participant_ids CONTAINS $user_id LIMIT 1",
                )
                .bind(("chat_id", chat_id))
                .bind(("user_id", user_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(invalid_result)?;
            Ok(!rows.is_empty())
        })
    }

    fn apply_update(
        &self,
        chat_id: &str,
        update: &ChatUpdate,
    ) -> BoxFuture<'_, DomainResult<Option<Chat>>> {
        let chat_id = chat_id.to_string();
        let update = update.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let query = client
                .query(chat_update_statement(&update))
                .bind(("chat_id", chat_id.clone()));
            let query = match update {
                ChatUpdate::LastMessage { message_id, at_ms } => query
                    .bind(("message_id", message_id))
                    .bind(("at_ms", at_ms)),
                ChatUpdate::Deactivate { at_ms } => query.bind(("at_ms", at_ms)),
            };
            let response = query.await.map_err(map_surreal_error)?;
            response.check().map_err(map_surreal_error)?;
            self.get_chat(&chat_id).await
        })
    }
}

// Each update writes only its own fields so a concurrent update cannot be undone.
fn chat_update_statement(update: &ChatUpdate) -> &'static str {
    match update {
        ChatUpdate::LastMessage { .. } => {
            "UPDATE chat SET last_message_id = $message_id, \
             updated_at_ms = math::max([updated_at_ms, $at_ms]) \
             WHERE chat_id = $chat_id RETURN NONE;"
        }
        ChatUpdate::Deactivate { .. } => {
            "BEGIN TRANSACTION;\n\
             UPDATE chat SET is_active = false, \
             updated_at_ms = math::max([updated_at_ms, $at_ms]) \
             WHERE chat_id = $chat_id RETURN NONE;\n\
             DELETE chat_direct_key WHERE chat_id = $chat_id RETURN NONE;\n\
             COMMIT TRANSACTION;"
        }
    }
}

#[derive(Clone)]
pub struct SurrealMessageRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealMessageRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }
}

impl MessageRepository for SurrealMessageRepository {
    fn create_message(&self, message: &ChatMessage) -> BoxFuture<'_, DomainResult<ChatMessage>> {
        let payload = match encode_row(message, "message") {
            Ok(payload) => payload,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let message = message.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let response = client
                .query("CREATE chat_message CONTENT $payload")
                .bind(("payload", payload))
                .await
                .map_err(map_surreal_error)?;
            response.check().map_err(map_surreal_error)?;
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
        let client = self.client.clone();
        Box::pin(async move {
            let mut query_sql =
                String::from("SELECT * OMIT id FROM chat_message WHERE chat_id = $chat_id");
            if page.before.is_some() {
                query_sql.push_str(" AND message_id < $before");
            }
            query_sql.push_str(" ORDER BY message_id DESC LIMIT $limit");

            let mut query_handle = client
                .query(&query_sql)
                .bind(("chat_id", chat_id))
                .bind(("limit", page.limit as i64));
            if let Some(before) = page.before {
                query_handle = query_handle.bind(("before", before));
            }
            let mut response = query_handle.await.map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(invalid_result)?;
            decode_rows(rows, "message")
        })
    }

    fn find_messages(
        &self,
        message_ids: &[String],
    ) -> BoxFuture<'_, DomainResult<Vec<ChatMessage>>> {
        let message_ids = message_ids.to_vec();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query("SELECT * OMIT id FROM chat_message WHERE message_id IN $message_ids")
                .bind(("message_ids", message_ids))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(invalid_result)?;
            decode_rows(rows, "message")
        })
    }

    fn mark_read(&self, chat_id: &str, request: &ReadRequest) -> BoxFuture<'_, DomainResult<u64>> {
        let chat_id = chat_id.to_string();
        let request = request.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let mut query_sql = String::from(
                "UPDATE chat_message \
                 SET read_by += { user_id: $user_id, read_at_ms: $read_at_ms } \
                 WHERE chat_id = $chat_id AND $user_id NOTINSIDE read_by.user_id",
            );
            if request.up_to.is_some() {
                query_sql.push_str(" AND message_id <= $up_to");
            }
            query_sql.push_str(" RETURN message_id");

            let mut query_handle = client
                .query(&query_sql)
                .bind(("chat_id", chat_id))
                .bind(("user_id", request.user_id))
                .bind(("read_at_ms", request.read_at_ms));
            if let Some(up_to) = request.up_to {
                query_handle = query_handle.bind(("up_to", up_to));
            }
            let mut response = query_handle.await.map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(invalid_result)?;
            Ok(rows.len() as u64)
        })
    }

    fn count_unread(&self, chat_id: &str, user_id: &str) -> BoxFuture<'_, DomainResult<u64>> {
        let chat_id = chat_id.to_string();
        let user_id = user_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT count() AS total FROM chat_message \
                     WHERE chat_id = $chat_id AND $user_id NOTINSIDE read_by.user_id GROUP ALL",
                )
                .bind(("chat_id", chat_id))
                .bind(("user_id", user_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(invalid_result)?;
            Ok(first_count(&rows, "total"))
        })
    }
}

#[derive(Clone)]
pub struct SurrealUserDirectory {
    client: Arc<Surreal<Client>>,
}

impl SurrealUserDirectory {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    async fn exists(&self, field: &'static str, value: String) -> DomainResult<bool> {
        let query_sql = format!(
            "SELECT count() AS total FROM app_user \
             WHERE string::lowercase({field}) = string::lowercase($value) GROUP ALL"
        );
        let mut response = self
            .client
            .query(&query_sql)
            .bind(("value", value))
            .await
            .map_err(map_surreal_error)?;
        let rows: Vec<Value> = response.take(0).map_err(invalid_result)?;
        Ok(first_count(&rows, "total") > 0)
    }
}

impl UserDirectory for SurrealUserDirectory {
    fn find_by_id(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Option<UserProfile>>> {
        let user_id = user_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query("SELECT * OMIT id, password_hash FROM app_user WHERE user_id = $user_id LIMIT 1")
                .bind(("user_id", user_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(invalid_result)?;
            Ok(decode_rows::<UserProfile>(rows, "user")?.into_iter().next())
        })
    }

    fn email_exists(&self, email: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let email = email.to_string();
        Box::pin(self.exists("email", email))
    }

    fn username_exists(&self, username: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let username = username.to_string();
        Box::pin(self.exists("username", username))
    }

    fn set_online_status(&self, user_id: &str, online: bool) -> BoxFuture<'_, DomainResult<()>> {
        let user_id = user_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let response = client
                .query("UPDATE app_user SET is_online = $online WHERE user_id = $user_id")
                .bind(("online", online))
                .bind(("user_id", user_id))
                .await
                .map_err(map_surreal_error)?;
            response.check().map_err(map_surreal_error)?;
            Ok(())
        })
    }

    fn create_account(&self, account: &UserAccount) -> BoxFuture<'_, DomainResult<UserProfile>> {
        let row = encode_row(account, "user");
        let profile = account.profile.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let response = client
                .query("CREATE app_user CONTENT $row RETURN NONE")
                .bind(("row", row?))
                .await
                .map_err(map_surreal_error)?;
            response.check().map_err(|err| {
                let mapped = map_surreal_error(err);
                if matches!(mapped, DomainError::Conflict) {
                    counter!(STORE_CONFLICTS_TOTAL, "table" => "app_user").increment(1);
                }
                mapped
            })?;
            Ok(profile)
        })
    }

    fn find_account_by_email(
        &self,
        email: &str,
    ) -> BoxFuture<'_, DomainResult<Option<UserAccount>>> {
        let email = email.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT * OMIT id FROM app_user \
                     WHERE email = $email AND password_hash != NONE LIMIT 1",
                )
                .bind(("email", email))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(invalid_result)?;
            Ok(decode_rows::<UserAccount>(rows, "user")?.into_iter().next())
        })
    }
}
