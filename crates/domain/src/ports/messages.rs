use crate::DomainResult;
use crate::messages::{ChatMessage, MessagePage, ReadRequest};

pub trait MessageRepository: Send + Sync {
    fn create_message(
        &self,
        message: &ChatMessage,
    ) -> crate::ports::BoxFuture<'_, DomainResult<ChatMessage>>;

    /// Newest first, strictly below `page.before` when set.
    fn list_messages(
        &self,
        chat_id: &str,
        page: &MessagePage,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Vec<ChatMessage>>>;

    fn mark_read(
        &self,
        chat_id: &str,
        request: &ReadRequest,
    ) -> crate::ports::BoxFuture<'_, DomainResult<u64>>;

    fn count_unread(
        &self,
        chat_id: &str,
        user_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<u64>>;

    /// Messages with the given ids, in no particular order. Missing ids are skipped.
    fn find_messages(
        &self,
        message_ids: &[String],
    ) -> crate::ports::BoxFuture<'_, DomainResult<Vec<ChatMessage>>>;
}
