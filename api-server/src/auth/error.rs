use rocket::http::Status;
use thiserror::Error;

use crate::store::StoreError;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("account disabled")]
    AccountDisabled,
    #[error("token expired")]
    TokenExpired,
    #[error("token invalid")]
    TokenInvalid,
    #[error("unauthorized")]
    Unauthorized,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl AuthError {
    pub fn status(&self) -> Status {
        match self {
            AuthError::AccountDisabled => Status::Forbidden,
            AuthError::TokenExpired | AuthError::TokenInvalid | AuthError::Unauthorized => {
                Status::Unauthorized
            }
            AuthError::Jwt(err) => match err.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidKeyFormat => Status::InternalServerError,
                _ => Status::Unauthorized,
            },
            AuthError::Config(_) | AuthError::Store(_) => Status::InternalServerError,
        }
    }

    /// Message safe to show to the caller.
    pub fn public_message(&self) -> String {
        match self.status().code {
            403 => "Account disabled".to_string(),
            401 => "Unauthorized".to_string(),
            _ => "Authentication failed".to_string(),
        }
    }
}
