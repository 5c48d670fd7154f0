use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::{NewPost, Post, PostWithAuthor};
use crate::error::AppError;

#[async_trait]
pub trait PostRepo: Send + Sync {
    async fn create(&self, post: NewPost) -> Result<Post, AppError>;
    async fn list_all(&self, limit: i64, offset: i64) -> Result<Vec<PostWithAuthor>, AppError>;
    async fn list_by_author(
        &self,
        author_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PostWithAuthor>, AppError>;
    /// Deletes the post only if `author_id` wrote it. `false` otherwise.
    async fn delete_owned(&self, post_id: Uuid, author_id: Uuid) -> Result<bool, AppError>;
}

pub struct PgPostRepo {
    db: PgPool,
}

impl PgPostRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PostRepo for PgPostRepo {
    async fn create(&self, post: NewPost) -> Result<Post, AppError> {
        let row = sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO posts (id, author_id, text, media_url)
            VALUES ($1, $2, $3, $4)
            RETURNING id, author_id, text, media_url, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(post.author_id)
        .bind(&post.text)
        .bind(&post.media_url)
        .fetch_one(&self.db)
        .await
        .context("insert post")?;
        Ok(row)
    }

    async fn list_all(&self, limit: i64, offset: i64) -> Result<Vec<PostWithAuthor>, AppError> {
        let rows = sqlx::query_as::<_, PostWithAuthor>(
            r#"
            SELECT p.id, p.text, p.media_url, p.created_at,
                   u.id AS author_id, u.username AS author_username, u.email AS author_email
              FROM posts p
              JOIN users u ON u.id = p.author_id
             ORDER BY p.created_at DESC
             LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .context("list posts")?;
        Ok(rows)
    }

    async fn list_by_author(
        &self,
        author_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PostWithAuthor>, AppError> {
        let rows = sqlx::query_as::<_, PostWithAuthor>(
            r#"
            SELECT p.id, p.text, p.media_url, p.created_at,
                   u.id AS author_id, u.username AS author_username, u.email AS author_email
              FROM posts p
              JOIN users u ON u.id = p.author_id
             WHERE p.author_id = $1
             ORDER BY p.created_at DESC
             LIMIT $2 OFFSET $3
            "#,
        )
        .bind(author_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .context("list posts by author")?;
        Ok(rows)
    }

    async fn delete_owned(&self, post_id: Uuid, author_id: Uuid) -> Result<bool, AppError> {
        let res = sqlx::query(r#"DELETE FROM posts WHERE id = $1 AND author_id = $2"#)
            .bind(post_id)
            .bind(author_id)
            .execute(&self.db)
            .await
            .context("delete post")?;
        Ok(res.rows_affected() == 1)
    }
}
