use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::DomainError;
use crate::ports::auth::IdentityGate;
use crate::ports::users::UserDirectory;
use crate::users::UserProfile;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorIdentity {
    pub user_id: String,
    pub username: String,
}

impl ActorIdentity {
    pub fn with_user_id(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            user_id: user_id.clone(),
            username: user_id,
        }
    }
}

impl From<&UserProfile> for ActorIdentity {
    fn from(profile: &UserProfile) -> Self {
        Self {
            user_id: profile.user_id.clone(),
            username: profile.username.clone(),
        }
    }
}

pub async fn authenticate(
    gate: &dyn IdentityGate,
    users: &dyn UserDirectory,
    token: &str,
) -> DomainResult<UserProfile> {
    let token = token.trim();
    if token.is_empty() {
        return Err(DomainError::Unauthorized("missing credential".into()));
    }
    let verified = gate.verify(token)?;
    let profile = users
        .find_by_id(&verified.user_id)
        .await?
        .ok_or_else(|| DomainError::Unauthorized("user not found".into()))?;
    if !profile.is_active {
        return Err(DomainError::Unauthorized("user account is inactive".into()));
    }
    Ok(profile)
}
