use chrono::Utc;
use rocket::Request;
use rocket::State;
use rocket::request::{FromRequest, Outcome};
use rocket_okapi::request::OpenApiFromRequest;

use crate::auth::jwt::AccessTokenClaims;
use crate::auth::{AuthError, AuthResult, AuthState};
use crate::state::AppState;

/// The account a request acts for, resolved from its bearer token.
#[derive(Debug, Clone, OpenApiFromRequest)]
pub struct AuthUser {
    pub id: i32,
    pub email: String,
    pub token_version: i32,
}

/// Why the last auth guard on this request failed; read by the JSON catchers.
#[derive(Debug, Clone, Default)]
pub struct AuthFailure(pub Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthUser {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match extract_user(request).await {
            Ok(user) => Outcome::Success(user),
            Err(err) => {
                if err.status().code >= 500 {
                    log::error!("authentication failed: {}", err);
                } else {
                    log::debug!("authentication rejected: {}", err);
                }
                request.local_cache(|| AuthFailure(Some(err.public_message())));
                Outcome::Error((err.status(), err))
            }
        }
    }
}

async fn extract_user(request: &Request<'_>) -> AuthResult<AuthUser> {
    let token = bearer_token_from_request(request)?;

    let auth_state = request
        .guard::<&State<AuthState>>()
        .await
        .succeeded()
        .ok_or_else(|| AuthError::Config("AuthState missing from state".into()))?;

    let app = request
        .guard::<&State<AppState>>()
        .await
        .succeeded()
        .ok_or_else(|| AuthError::Config("AppState missing from state".into()))?;

    let claims = auth_state.jwt_service.decode_access_token(token)?;
    validate_claims(&claims)?;

    let user_id: i32 = claims.sub.parse().map_err(|_| AuthError::Unauthorized)?;

    let account = app
        .store
        .find_account(user_id)
        .await?
        .ok_or(AuthError::Unauthorized)?;

    if account.disabled {
        return Err(AuthError::AccountDisabled);
    }

    if account.token_version != claims.token_version {
        return Err(AuthError::TokenInvalid);
    }

    Ok(AuthUser {
        id: account.id,
        email: account.email,
        token_version: account.token_version,
    })
}

fn bearer_token_from_request<'a>(request: &'a Request<'_>) -> AuthResult<&'a str> {
    let header = request
        .headers()
        .get_one("Authorization")
        .ok_or(AuthError::Unauthorized)?;
    let mut parts = header.splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    if scheme.eq_ignore_ascii_case("Bearer") && !token.is_empty() {
        Ok(token)
    } else {
        Err(AuthError::Unauthorized)
    }
}

fn validate_claims(claims: &AccessTokenClaims) -> AuthResult<()> {
    let now = Utc::now().timestamp();
    if claims.exp < now {
        return Err(AuthError::TokenExpired);
    }
    Ok(())
}
