use crate::DomainResult;
use crate::chat::{Chat, ChatUpdate};

pub trait ChatRepository: Send + Sync {
    /// Fails with `DomainError::Conflict` when an active chat already holds the dedupe key.
    fn create_chat(&self, chat: &Chat) -> crate::ports::BoxFuture<'_, DomainResult<Chat>>;

    fn find_direct_chat(
        &self,
        dedupe_key: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Option<Chat>>>;

    fn get_chat(&self, chat_id: &str) -> crate::ports::BoxFuture<'_, DomainResult<Option<Chat>>>;

    fn list_chats_by_user(
        &self,
        user_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Vec<Chat>>>;

    fn is_member(
        &self,
        chat_id: &str,
        user_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<bool>>;

    fn apply_update(
        &self,
        chat_id: &str,
        update: &ChatUpdate,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Option<Chat>>>;
}
