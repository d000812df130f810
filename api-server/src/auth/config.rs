use crate::auth::{AuthError, AuthResult};

/// Authentication configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub issuer: String,
    pub audience: String,
    pub access_token_ttl_secs: i64,
    pub jwt_secret: String,
    pub jwt_kid: Option<String>,
}

impl AuthConfig {
    pub fn from_env() -> AuthResult<Self> {
        let issuer =
            std::env::var("MAILFLOW_JWT_ISSUER").unwrap_or_else(|_| "http://localhost".into());
        let audience =
            std::env::var("MAILFLOW_JWT_AUDIENCE").unwrap_or_else(|_| "mailflow-api".into());
        let access_token_ttl_secs = std::env::var("MAILFLOW_ACCESS_TOKEN_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(3600);
        let jwt_secret = std::env::var("MAILFLOW_JWT_SECRET")
            .ok()
            .filter(|secret| !secret.trim().is_empty())
            .ok_or_else(|| AuthError::Config("MAILFLOW_JWT_SECRET is required".into()))?;
        let jwt_kid = std::env::var("MAILFLOW_JWT_KID").ok();

        Ok(Self {
            issuer,
            audience,
            access_token_ttl_secs,
            jwt_secret,
            jwt_kid,
        })
    }
}
