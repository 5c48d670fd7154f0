use anyhow::Context;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::MediaUpload;
use super::repo_types::{NewPost, PostAuthor, PostView};
use crate::auth::repo_types::PublicUser;
use crate::{error::AppError, state::AppState};

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        "video/mp4" => Some("mp4"),
        _ => None,
    }
}

fn normalize_text(raw: &str) -> Result<String, AppError> {
    let text = raw.trim().to_lowercase();
    if text.is_empty() {
        return Err(AppError::Validation("Content is required".into()));
    }
    Ok(text)
}

/// Stores the file and returns the URL it is served from.
pub async fn upload_media(st: &AppState, author_id: Uuid, media: MediaUpload) -> anyhow::Result<String> {
    anyhow::ensure!(!media.body.is_empty(), "empty media file");
    let ext = ext_from_mime(&media.content_type).unwrap_or("bin");
    let key = format!("posts/{}/{}.{}", author_id, Uuid::new_v4(), ext);
    st.storage
        .put_object(&key, media.body, &media.content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;
    Ok(st.storage.public_url(&key))
}

#[instrument(skip(st, author, text, media), fields(author_id = %author.id))]
pub async fn create_post(
    st: &AppState,
    author: &PublicUser,
    text: &str,
    media: Option<MediaUpload>,
) -> Result<PostView, AppError> {
    let text = normalize_text(text)?;

    let media_url = match media {
        Some(m) => Some(upload_media(st, author.id, m).await?),
        None => None,
    };

    let post = st
        .posts
        .create(NewPost {
            author_id: author.id,
            text,
            media_url,
        })
        .await?;

    info!(post_id = %post.id, user_id = %author.id, "post created");
    Ok(PostView {
        id: post.id,
        text: post.text,
        media_url: post.media_url,
        created_at: post.created_at,
        author: PostAuthor {
            id: author.id,
            username: author.username.clone(),
            email: author.email.clone(),
        },
    })
}

pub async fn list_posts(st: &AppState, limit: i64, offset: i64) -> Result<Vec<PostView>, AppError> {
    let rows = st.posts.list_all(limit, offset).await?;
    Ok(rows.into_iter().map(PostView::from).collect())
}

pub async fn list_posts_by_author(
    st: &AppState,
    author_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<PostView>, AppError> {
    let rows = st.posts.list_by_author(author_id, limit, offset).await?;
    Ok(rows.into_iter().map(PostView::from).collect())
}

/// Missing and not-yours are the same answer.
#[instrument(skip(st))]
pub async fn delete_post(st: &AppState, post_id: Uuid, author_id: Uuid) -> Result<(), AppError> {
    if !st.posts.delete_owned(post_id, author_id).await? {
        warn!(%post_id, user_id = %author_id, "delete refused");
        return Err(AppError::NotFound(
            "Post not found or you are not authorized to delete this post".into(),
        ));
    }
    info!(%post_id, user_id = %author_id, "post deleted");
    Ok(())
}
