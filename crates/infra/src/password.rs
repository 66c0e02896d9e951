use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{
    PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString,
};
use obrolan_domain::DomainResult;
use obrolan_domain::error::DomainError;
use obrolan_domain::ports::auth::PasswordHasher;

/// Argon2id with the crate's default parameters, stored as a PHC string.
#[derive(Clone, Default)]
pub struct Argon2PasswordHasher {
    argon2: Argon2<'static>,
}

impl Argon2PasswordHasher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PasswordHasher for Argon2PasswordHasher {
    fn hash(&self, password: &str) -> DomainResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| DomainError::Storage(format!("hash password: {err}")))
    }

    fn verify(&self, password: &str, hash: &str) -> DomainResult<bool> {
        let parsed = PasswordHash::new(hash).map_err(|err| {
            tracing::warn!(error = %err, "stored password hash is unreadable");
            DomainError::Storage("stored password hash is unreadable".into())
        })?;
        Ok(self
            .argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}
