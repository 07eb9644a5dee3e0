use crate::{AuthzError, AuthzResult, Identity};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SluiceClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
}

/// Mints HS256 bearer tokens. Used by tooling and tests.
pub struct TokenIssuer {
    issuer: String,
    audience: String,
    ttl: Duration,
    key: EncodingKey,
}

impl TokenIssuer {
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        ttl: Duration,
        secret: &[u8],
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            ttl,
            key: EncodingKey::from_secret(secret),
        }
    }

    pub fn mint(&self, subject: &str, groups: Vec<String>) -> AuthzResult<String> {
        let now = now_epoch_seconds();
        let claims = SluiceClaims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: subject.to_string(),
            exp: now + self.ttl.as_secs() as i64,
            iat: now,
            groups,
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.key,
        )?)
    }
}

/// Verifies HS256 bearer tokens and extracts the identity they carry.
pub struct TokenVerifier {
    issuer: String,
    audience: String,
    leeway: u64,
    key: DecodingKey,
}

impl TokenVerifier {
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        leeway: u64,
        secret: &[u8],
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            leeway,
            key: DecodingKey::from_secret(secret),
        }
    }

    pub fn verify(&self, token: &str) -> AuthzResult<Identity> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.leeway = self.leeway;
        let decoded = jsonwebtoken::decode::<SluiceClaims>(token, &self.key, &validation)?;
        if decoded.claims.sub.is_empty() {
            return Err(AuthzError::EmptySubject);
        }
        Ok(Identity::new(decoded.claims.sub).with_groups(decoded.claims.groups))
    }
}

fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs() as i64
}
