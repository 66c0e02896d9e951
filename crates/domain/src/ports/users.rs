use crate::DomainResult;
use crate::users::{UserAccount, UserProfile};

pub trait UserDirectory: Send + Sync {
    fn find_by_id(
        &self,
        user_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Option<UserProfile>>>;

    fn email_exists(&self, email: &str) -> crate::ports::BoxFuture<'_, DomainResult<bool>>;

    fn username_exists(&self, username: &str)
    -> crate::ports::BoxFuture<'_, DomainResult<bool>>;

    fn set_online_status(
        &self,
        user_id: &str,
        online: bool,
    ) -> crate::ports::BoxFuture<'_, DomainResult<()>>;

    /// Stores a new account. Taken emails or usernames fail with `Conflict`.
    fn create_account(
        &self,
        account: &UserAccount,
    ) -> crate::ports::BoxFuture<'_, DomainResult<UserProfile>>;

    fn find_account_by_email(
        &self,
        email: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Option<UserAccount>>>;
}
