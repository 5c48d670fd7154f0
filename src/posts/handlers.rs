use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    routing::{delete, get, post},
    Router,
};
use axum_extra::extract::WithRejection;
use tracing::instrument;
use uuid::Uuid;

use super::dto::{MediaUpload, Pagination};
use super::repo_types::PostView;
use super::services;
use crate::{auth::extractors::AuthUser, error::AppError, response::ApiResponse, state::AppState};

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_posts))
        .route("/mine", get(list_my_posts))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/create-post", post(create_post))
        .route("/:id", delete(delete_post))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

/// POST /create-post (multipart): `text` field, optional `media` file.
#[instrument(skip(state, user, mp))]
pub async fn create_post(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    WithRejection(mut mp, _): WithRejection<Multipart, AppError>,
) -> Result<ApiResponse<PostView>, AppError> {
    let mut text: Option<String> = None;
    let mut media: Option<MediaUpload> = None;

    while let Some(field) = mp.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("text") => text = Some(field.text().await?),
            Some("media") => {
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/octet-stream".into());
                let body = field.bytes().await?;
                if !body.is_empty() {
                    media = Some(MediaUpload { body, content_type });
                }
            }
            _ => {}
        }
    }

    let text = text.ok_or_else(|| AppError::Validation("Content is required".into()))?;
    let post = services::create_post(&state, &user, &text, media).await?;
    Ok(ApiResponse::created(post, "Post created successfully"))
}

#[instrument(skip(state, _user))]
pub async fn list_posts(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    WithRejection(Query(p), _): WithRejection<Query<Pagination>, AppError>,
) -> Result<ApiResponse<Vec<PostView>>, AppError> {
    let (limit, offset) = p.clamped();
    let posts = services::list_posts(&state, limit, offset).await?;
    Ok(ApiResponse::ok(posts, "Posts fetched successfully"))
}

#[instrument(skip(state, user))]
pub async fn list_my_posts(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    WithRejection(Query(p), _): WithRejection<Query<Pagination>, AppError>,
) -> Result<ApiResponse<Vec<PostView>>, AppError> {
    let (limit, offset) = p.clamped();
    let posts = services::list_posts_by_author(&state, user.id, limit, offset).await?;
    Ok(ApiResponse::ok(posts, "Posts fetched successfully"))
}

#[instrument(skip(state, user))]
pub async fn delete_post(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    WithRejection(Path(id), _): WithRejection<Path<Uuid>, AppError>,
) -> Result<ApiResponse<()>, AppError> {
    services::delete_post(&state, id, user.id).await?;
    Ok(ApiResponse::empty("Post deleted successfully"))
}
