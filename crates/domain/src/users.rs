use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::{DomainError, FieldError};
use crate::ports::auth::{IdentityGate, PasswordHasher};
use crate::ports::users::UserDirectory;
use crate::util::uuid_v7_without_dashes;

const USERNAME_MIN_LENGTH: usize = 3;
const USERNAME_MAX_LENGTH: usize = 20;
const PASSWORD_MIN_LENGTH: usize = 6;
const PASSWORD_MAX_LENGTH: usize = 128;
const INVALID_CREDENTIALS: &str = "invalid email or password";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    #[serde(default)]
    pub is_online: bool,
}

/// A profile plus its stored password hash. Never leaves the service layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub password_hash: String,
}

#[derive(Clone, Debug)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Clone, Debug)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuthSession {
    pub user: UserProfile,
    pub token: String,
}

pub async fn ensure_registration_available(
    users: &dyn UserDirectory,
    email: &str,
    username: &str,
) -> DomainResult<()> {
    let mut errors = Vec::new();
    if users.email_exists(email).await? {
        errors.push(FieldError::new("email", "email is already registered").with_value(email));
    }
    if users.username_exists(username).await? {
        errors.push(FieldError::new("username", "username is already taken").with_value(username));
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(DomainError::Validation(errors))
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_registration(input: &Registration) -> Vec<FieldError> {
    let mut errors = Vec::new();
    let username = input.username.trim();
    let username_length = username.chars().count();
    if !(USERNAME_MIN_LENGTH..=USERNAME_MAX_LENGTH).contains(&username_length) {
        errors.push(
            FieldError::new(
                "username",
                format!(
                    "username must be between {USERNAME_MIN_LENGTH} and {USERNAME_MAX_LENGTH} characters"
                ),
            )
            .with_value(username),
        );
    } else if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        errors.push(
            FieldError::new(
                "username",
                "username may only contain letters, digits and underscores",
            )
            .with_value(username),
        );
    }

    if !is_plausible_email(&normalize_email(&input.email)) {
        errors.push(
            FieldError::new("email", "email address is invalid").with_value(input.email.as_str()),
        );
    }

    let password_length = input.password.chars().count();
    if !(PASSWORD_MIN_LENGTH..=PASSWORD_MAX_LENGTH).contains(&password_length) {
        errors.push(FieldError::new(
            "password",
            format!(
                "password must be between {PASSWORD_MIN_LENGTH} and {PASSWORD_MAX_LENGTH} characters"
            ),
        ));
    }
    errors
}

// local@domain.tld with no whitespace
fn is_plausible_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !local.is_empty() && !host.is_empty() && !tld.is_empty() && !domain.contains('@')
}

#[derive(Clone)]
pub struct AccountService {
    users: Arc<dyn UserDirectory>,
    identity: Arc<dyn IdentityGate>,
    hasher: Arc<dyn PasswordHasher>,
}

impl AccountService {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        identity: Arc<dyn IdentityGate>,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        Self {
            users,
            identity,
            hasher,
        }
    }

    pub async fn register(&self, input: Registration) -> DomainResult<AuthSession> {
        let errors = validate_registration(&input);
        if !errors.is_empty() {
            return Err(DomainError::Validation(errors));
        }
        let username = input.username.trim().to_string();
        let email = normalize_email(&input.email);
        ensure_registration_available(self.users.as_ref(), &email, &username).await?;

        let account = UserAccount {
            profile: UserProfile {
                user_id: uuid_v7_without_dashes(),
                username,
                email,
                is_active: true,
                is_online: false,
            },
            password_hash: self.hasher.hash(&input.password)?,
        };
        let user = self.users.create_account(&account).await?;
        let token = self.identity.issue(&user.user_id)?;
        Ok(AuthSession { user, token })
    }

    /// Unknown emails and wrong passwords fail with the same message.
    pub async fn login(&self, input: Credentials) -> DomainResult<AuthSession> {
        let email = normalize_email(&input.email);
        let account = self
            .users
            .find_account_by_email(&email)
            .await?
            .ok_or_else(|| DomainError::Unauthorized(INVALID_CREDENTIALS.into()))?;
        if !self.hasher.verify(&input.password, &account.password_hash)? {
            return Err(DomainError::Unauthorized(INVALID_CREDENTIALS.into()));
        }
        if !account.profile.is_active {
            return Err(DomainError::Unauthorized("user account is inactive".into()));
        }
        let token = self.identity.issue(&account.profile.user_id)?;
        Ok(AuthSession {
            user: account.profile,
            token,
        })
    }

    pub async fn profile(&self, user_id: &str) -> DomainResult<UserProfile> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("user {user_id} not found")))
    }
}
