use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;

use super::cookies::ACCESS_COOKIE;
use super::jwt::JwtKeys;
use super::repo_types::PublicUser;
use crate::{error::AppError, state::AppState};

/// Resolved identity of the caller. Handlers take it as an argument; nothing is
/// stashed on the request.
pub struct AuthUser(pub PublicUser);

fn bearer_token(parts: &Parts) -> Option<String> {
    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(c) = jar.get(ACCESS_COOKIE) {
        if !c.value().is_empty() {
            return Some(c.value().to_string());
        }
    }
    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::Unauthorized("Missing access token".into()))?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify_access(&token).map_err(|_| {
            warn!("invalid or expired token");
            AppError::Unauthorized("Invalid or expired token".into())
        })?;

        let user = state
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or_else(|| {
                warn!(user_id = %claims.sub, "token for unknown user");
                AppError::Unauthorized("Unauthorized user".into())
            })?;

        Ok(AuthUser(PublicUser::from(user)))
    }
}
