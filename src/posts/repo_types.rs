use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub text: String,
    pub media_url: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub author_id: Uuid,
    pub text: String,
    pub media_url: Option<String>,
}

/// A post joined with its author's public fields.
#[derive(Debug, Clone, FromRow)]
pub struct PostWithAuthor {
    pub id: Uuid,
    pub text: String,
    pub media_url: Option<String>,
    pub created_at: OffsetDateTime,
    pub author_id: Uuid,
    pub author_username: String,
    pub author_email: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PostAuthor {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub id: Uuid,
    pub text: String,
    pub media_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub author: PostAuthor,
}

impl From<PostWithAuthor> for PostView {
    fn from(r: PostWithAuthor) -> Self {
        Self {
            id: r.id,
            text: r.text,
            media_url: r.media_url,
            created_at: r.created_at,
            author: PostAuthor {
                id: r.author_id,
                username: r.author_username,
                email: r.author_email,
            },
        }
    }
}
