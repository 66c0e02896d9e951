use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use obrolan_domain::DomainResult;
use obrolan_domain::error::DomainError;
use obrolan_domain::ports::auth::{IdentityGate, VerifiedToken};
use obrolan_domain::util::now_ms;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

#[derive(Clone)]
pub struct JwtIdentityGate {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: u64,
}

impl JwtIdentityGate {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs,
        }
    }

    pub fn from_app_config(config: &AppConfig) -> Self {
        Self::new(&config.jwt_secret, config.jwt_ttl_secs)
    }
}

impl IdentityGate for JwtIdentityGate {
    fn verify(&self, token: &str) -> DomainResult<VerifiedToken> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|err| {
            tracing::debug!(error = %err, "rejected bearer token");
            DomainError::Unauthorized("invalid or expired token".into())
        })?;
        if data.claims.sub.trim().is_empty() {
            return Err(DomainError::Unauthorized("token has no subject".into()));
        }
        Ok(VerifiedToken {
            user_id: data.claims.sub,
        })
    }

    fn issue(&self, user_id: &str) -> DomainResult<String> {
        let exp = (now_ms() / 1_000) as u64 + self.ttl_secs;
        let claims = Claims {
            sub: user_id.to_string(),
            exp: exp as usize,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| DomainError::Storage(format!("sign token: {err}")))
    }
}
