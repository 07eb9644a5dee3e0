// Bearer-token authentication for producer sessions.
use crate::config::GatewayConfig;
use async_trait::async_trait;
use sluice_authz::{Identity, TokenVerifier};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("token verification is not configured")]
    NotConfigured,
    #[error("invalid token: {0}")]
    Invalid(String),
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Verifies HS256 tokens issued for the gateway audience.
pub struct JwtAuthenticator {
    verifier: Option<TokenVerifier>,
}

impl JwtAuthenticator {
    pub fn new(verifier: TokenVerifier) -> Self {
        Self {
            verifier: Some(verifier),
        }
    }

    // Every token is rejected; anonymous sessions still work when credentials are optional.
    pub fn disabled() -> Self {
        Self { verifier: None }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        match &config.token_secret {
            Some(secret) => Self::new(TokenVerifier::new(
                config.token_issuer.clone(),
                config.token_audience.clone(),
                config.token_leeway_secs,
                secret.as_bytes(),
            )),
            None => Self::disabled(),
        }
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let verifier = self.verifier.as_ref().ok_or(AuthError::NotConfigured)?;
        verifier
            .verify(token)
            .map_err(|err| AuthError::Invalid(err.to_string()))
    }
}
