use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use crate::auth::{AuthConfig, AuthResult};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub email: String,
    pub token_version: i32,
}

#[derive(Debug, Clone)]
pub struct SignedAccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    access_token_ttl: Duration,
    kid: Option<String>,
}

impl JwtService {
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        let secret_bytes = config.jwt_secret.as_bytes();
        let encoding_key = EncodingKey::from_secret(secret_bytes);
        let decoding_key = DecodingKey::from_secret(secret_bytes);

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[config.audience.clone()]);
        validation.set_issuer(&[config.issuer.clone()]);
        validation.leeway = 30;

        Ok(Self {
            encoding_key,
            decoding_key,
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_token_ttl: Duration::seconds(config.access_token_ttl_secs),
            kid: config.jwt_kid.clone(),
        })
    }

    pub fn issue_access_token(
        &self,
        user_id: i32,
        email: &str,
        token_version: i32,
    ) -> AuthResult<SignedAccessToken> {
        let now = Utc::now();
        let expires_at = now + self.access_token_ttl;

        let mut header = Header::new(Algorithm::HS256);
        header.kid = self.kid.clone();

        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            email: email.to_string(),
            token_version,
        };

        let token = encode(&header, &claims, &self.encoding_key)?;

        Ok(SignedAccessToken { token, expires_at })
    }

    pub fn decode_access_token(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        let token_data = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)?;
        Ok(token_data.claims)
    }
}
