use axum::{
    extract::{FromRef, State},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::{cookie::CookieJar, WithRejection};
use tracing::instrument;

use super::{
    cookies::{self, REFRESH_COOKIE},
    dto::{AuthResponse, LoginRequest, RefreshRequest, RegisterRequest, ResendOtpRequest, TokenPair, VerifyOtpRequest},
    extractors::AuthUser,
    jwt::JwtKeys,
    repo_types::PublicUser,
    services,
};
use crate::{error::AppError, response::ApiResponse, state::AppState};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/register/verify-otp", post(verify_otp))
        .route("/register/resend-otp", post(resend_otp))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/regenerate-access-token", post(regenerate_access_token))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/get-user", get(get_user))
}

fn set_session(state: &AppState, jar: CookieJar, tokens: &TokenPair) -> CookieJar {
    let keys = JwtKeys::from_ref(state);
    cookies::with_tokens(jar, tokens, &keys, state.config.cookie_secure)
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<RegisterRequest>, AppError>,
) -> Result<ApiResponse<PublicUser>, AppError> {
    let user = services::register(&state, payload).await?;
    Ok(ApiResponse::created(user, "User registered successfully"))
}

#[instrument(skip(state, jar, payload))]
pub async fn verify_otp(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(payload), _): WithRejection<Json<VerifyOtpRequest>, AppError>,
) -> Result<(CookieJar, ApiResponse<AuthResponse>), AppError> {
    let session = services::verify_otp(&state, &payload.email, &payload.otp).await?;
    let jar = set_session(&state, jar, &session.tokens);
    Ok((jar, ApiResponse::ok(session, "User verified successfully")))
}

#[instrument(skip(state, payload))]
pub async fn resend_otp(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<ResendOtpRequest>, AppError>,
) -> Result<ApiResponse<()>, AppError> {
    services::resend_otp(&state, &payload.email).await?;
    Ok(ApiResponse::empty("OTP resent successfully"))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(payload), _): WithRejection<Json<LoginRequest>, AppError>,
) -> Result<(CookieJar, ApiResponse<AuthResponse>), AppError> {
    let session = services::login(&state, &payload.email, &payload.password).await?;
    let jar = set_session(&state, jar, &session.tokens);
    Ok((jar, ApiResponse::ok(session, "Login successful")))
}

#[instrument(skip(state, jar, user))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    jar: CookieJar,
) -> Result<(CookieJar, ApiResponse<()>), AppError> {
    services::logout(&state, user.id).await?;
    Ok((cookies::cleared(jar, state.config.cookie_secure), ApiResponse::empty("Logout successful")))
}

#[instrument(skip(state, jar, body))]
pub async fn regenerate_access_token(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> Result<(CookieJar, ApiResponse<TokenPair>), AppError> {
    let presented = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| body.map(|Json(b)| b.refresh_token))
        .ok_or_else(|| AppError::Unauthorized("Refresh token is required".into()))?;

    let tokens = services::rotate(&state, &presented).await?;
    let jar = set_session(&state, jar, &tokens);
    Ok((jar, ApiResponse::ok(tokens, "Access token regenerated successfully")))
}

#[instrument(skip(user))]
pub async fn get_user(AuthUser(user): AuthUser) -> ApiResponse<PublicUser> {
    ApiResponse::ok(user, "User fetched successfully")
}

#[cfg(test)]
mod tests {
    use crate::app::build_app;
    use crate::state::testing::{test_app, TestApp};
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        response::Response,
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn send(router: &Router, req: Request<Body>) -> Response {
        router.clone().oneshot(req).await.unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn cookie_pairs(resp: &Response) -> Vec<String> {
        resp.headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    fn cookie_header(set_cookies: &[String]) -> String {
        set_cookies
            .iter()
            .map(|c| c.split(';').next().unwrap().to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }

    async fn registered(app: &TestApp, router: &Router) -> String {
        let resp = send(
            router,
            post_json(
                "/api/v1/users/register",
                json!({"username": "alice", "email": "a@x.com", "password": "pw1"}),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        app.mailer.last_code_for("a@x.com").unwrap()
    }

    #[tokio::test]
    async fn register_verify_and_fetch_user() {
        let app = test_app();
        let router = build_app(app.state.clone());
        let code = registered(&app, &router).await;

        let resp = send(
            &router,
            post_json("/api/v1/users/register/verify-otp", json!({"email": "a@x.com", "otp": code})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let cookies = cookie_pairs(&resp);
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().all(|c| c.contains("HttpOnly") && c.contains("Secure")));
        assert!(cookies.iter().all(|c| c.contains("SameSite=None")));

        let req = Request::builder()
            .uri("/api/v1/users/get-user")
            .header(header::COOKIE, cookie_header(&cookies))
            .body(Body::empty())
            .unwrap();
        let resp = send(&router, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["username"], "alice");
        assert!(json["data"].get("passwordHash").is_none());
        assert!(json["data"].get("refreshToken").is_none());
    }

    #[tokio::test]
    async fn duplicate_registration_is_409_envelope() {
        let app = test_app();
        let router = build_app(app.state.clone());
        registered(&app, &router).await;
        let resp = send(
            &router,
            post_json(
                "/api/v1/users/register",
                json!({"username": "bob", "email": "a@x.com", "password": "pw"}),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let json = body_json(resp).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["statusCode"], 409);
    }

    #[tokio::test]
    async fn malformed_json_is_a_validation_error() {
        let app = test_app();
        let router = build_app(app.state.clone());
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/users/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let resp = send(&router, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["success"], false);
    }

    #[tokio::test]
    async fn login_returns_tokens_and_refresh_rotates() {
        let app = test_app();
        let router = build_app(app.state.clone());
        let code = registered(&app, &router).await;
        send(
            &router,
            post_json("/api/v1/users/register/verify-otp", json!({"email": "a@x.com", "otp": code})),
        )
        .await;

        let resp = send(
            &router,
            post_json("/api/v1/users/login", json!({"email": "a@x.com", "password": "pw1"})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let cookies = cookie_pairs(&resp);
        let json = body_json(resp).await;
        let old_refresh = json["data"]["refreshToken"].as_str().unwrap().to_string();
        assert!(json["data"]["accessToken"].is_string());

        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/users/regenerate-access-token")
            .header(header::COOKIE, cookie_header(&cookies))
            .body(Body::empty())
            .unwrap();
        let resp = send(&router, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = send(
            &router,
            post_json(
                "/api/v1/users/regenerate-access-token",
                json!({"refreshToken": old_refresh}),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn bad_password_is_401() {
        let app = test_app();
        let router = build_app(app.state.clone());
        registered(&app, &router).await;
        let resp = send(
            &router,
            post_json("/api/v1/users/login", json!({"email": "a@x.com", "password": "wrong"})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["message"], "Invalid credentials");
    }

    #[tokio::test]
    async fn logout_clears_cookies_and_requires_auth() {
        let app = test_app();
        let router = build_app(app.state.clone());

        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/users/logout")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&router, req).await.status(), StatusCode::UNAUTHORIZED);

        let code = registered(&app, &router).await;
        let resp = send(
            &router,
            post_json("/api/v1/users/register/verify-otp", json!({"email": "a@x.com", "otp": code})),
        )
        .await;
        let cookies = cookie_pairs(&resp);

        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/users/logout")
            .header(header::COOKIE, cookie_header(&cookies))
            .body(Body::empty())
            .unwrap();
        let resp = send(&router, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let cleared = cookie_pairs(&resp);
        assert_eq!(cleared.len(), 2);
        assert!(cleared.iter().all(|c| c.contains("Max-Age=0")));
        assert!(cleared.iter().all(|c| c.contains("SameSite=None")));
        assert!(cleared.iter().all(|c| c.contains("Secure") && c.contains("HttpOnly")));
        assert!(cleared.iter().all(|c| c.contains("Path=/")));
        assert!(app.users.get_by_email("a@x.com").unwrap().refresh_token.is_none());
    }

    #[tokio::test]
    async fn missing_refresh_token_is_401() {
        let app = test_app();
        let router = build_app(app.state.clone());
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/users/regenerate-access-token")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&router, req).await.status(), StatusCode::UNAUTHORIZED);
    }
}
