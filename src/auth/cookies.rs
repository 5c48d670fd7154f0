use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use super::dto::TokenPair;
use super::jwt::JwtKeys;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

/// Browsers drop `SameSite=None` cookies that are not `Secure`, so plain-HTTP
/// deployments only get same-site cookies.
fn same_site(secure: bool) -> SameSite {
    if secure {
        SameSite::None
    } else {
        SameSite::Lax
    }
}

fn session_cookie(name: &'static str, value: String, secure: bool, max_age_secs: u64) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(same_site(secure))
        .max_age(time::Duration::seconds(max_age_secs as i64))
        .build()
}

/// Sets both token cookies on the jar.
pub fn with_tokens(jar: CookieJar, tokens: &TokenPair, keys: &JwtKeys, secure: bool) -> CookieJar {
    jar.add(session_cookie(
        ACCESS_COOKIE,
        tokens.access_token.clone(),
        secure,
        keys.access_ttl.as_secs(),
    ))
    .add(session_cookie(
        REFRESH_COOKIE,
        tokens.refresh_token.clone(),
        secure,
        keys.refresh_ttl.as_secs(),
    ))
}

/// Expires both token cookies with the attributes they were set with.
pub fn cleared(jar: CookieJar, secure: bool) -> CookieJar {
    jar.remove(session_cookie(ACCESS_COOKIE, String::new(), secure, 0))
        .remove(session_cookie(REFRESH_COOKIE, String::new(), secure, 0))
}
