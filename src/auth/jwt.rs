use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::{AccessClaims, RefreshClaims, TokenKind};
use crate::{config::JwtConfig, error::AppError, state::AppState};

/// Signing and verification keys. Access and refresh tokens use separate secrets,
/// so a token of one kind never verifies as the other.
#[derive(Clone)]
pub struct JwtKeys {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.keys.as_ref().clone()
    }
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(cfg.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(cfg.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(cfg.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(cfg.refresh_secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: Duration::from_secs((cfg.ttl_minutes.max(1) as u64) * 60),
            refresh_ttl: Duration::from_secs((cfg.refresh_ttl_minutes.max(1) as u64) * 60),
        }
    }

    fn window(ttl: Duration) -> (usize, usize) {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        (now.unix_timestamp() as usize, exp.unix_timestamp() as usize)
    }

    pub fn issue_access(&self, user_id: Uuid, username: &str, email: &str) -> anyhow::Result<String> {
        let (iat, exp) = Self::window(self.access_ttl);
        let claims = AccessClaims {
            sub: user_id,
            username: username.to_string(),
            email: email.to_string(),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::Access,
        };
        let token = encode(&Header::default(), &claims, &self.access_encoding)?;
        debug!(user_id = %user_id, kind = ?TokenKind::Access, "jwt signed");
        Ok(token)
    }

    pub fn issue_refresh(&self, user_id: Uuid) -> anyhow::Result<String> {
        let (iat, exp) = Self::window(self.refresh_ttl);
        let claims = RefreshClaims {
            sub: user_id,
            jti: Uuid::new_v4(),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::Refresh,
        };
        let token = encode(&Header::default(), &claims, &self.refresh_encoding)?;
        debug!(user_id = %user_id, kind = ?TokenKind::Refresh, "jwt signed");
        Ok(token)
    }

    fn decode_with<C: DeserializeOwned>(&self, token: &str, key: &DecodingKey) -> Result<C, AppError> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        decode::<C>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "jwt rejected");
                AppError::InvalidToken
            })
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, AppError> {
        let claims: AccessClaims = self.decode_with(token, &self.access_decoding)?;
        if claims.kind != TokenKind::Access {
            return Err(AppError::InvalidToken);
        }
        debug!(user_id = %claims.sub, "access token verified");
        Ok(claims)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, AppError> {
        let claims: RefreshClaims = self.decode_with(token, &self.refresh_decoding)?;
        if claims.kind != TokenKind::Refresh {
            return Err(AppError::InvalidToken);
        }
        debug!(user_id = %claims.sub, "refresh token verified");
        Ok(claims)
    }
}

/// Test-only signing hook for hand-built claim sets.
#[cfg(test)]
impl JwtKeys {
    pub(crate) fn sign_raw_access<C: serde::Serialize>(&self, claims: &C) -> String {
        encode(&Header::default(), claims, &self.access_encoding).expect("sign raw")
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> JwtConfig {
    JwtConfig {
        access_secret: "access-secret".into(),
        refresh_secret: "refresh-secret".into(),
        issuer: "test-issuer".into(),
        audience: "test-aud".into(),
        ttl_minutes: 5,
        refresh_ttl_minutes: 60,
    }
}
