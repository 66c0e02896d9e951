use crate::DomainResult;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedToken {
    pub user_id: String,
}

pub trait IdentityGate: Send + Sync {
    fn verify(&self, token: &str) -> DomainResult<VerifiedToken>;

    fn issue(&self, user_id: &str) -> DomainResult<String>;
}

pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> DomainResult<String>;

    fn verify(&self, password: &str, hash: &str) -> DomainResult<bool>;
}
