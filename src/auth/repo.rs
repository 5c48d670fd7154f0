use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{NewUser, User};
use crate::error::AppError;

/// Credential store. Every mutating method is a single atomic statement.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    async fn find_by_email_or_username(
        &self,
        email: &str,
        username: &str,
    ) -> Result<Option<User>, AppError>;
    /// Fails with `Conflict` when the username or email is taken.
    async fn create(&self, user: NewUser) -> Result<User, AppError>;
    /// Overwrites the pending code of an unverified user. `false` if no such user.
    async fn replace_otp(
        &self,
        user_id: Uuid,
        code: &str,
        expiry: OffsetDateTime,
    ) -> Result<bool, AppError>;
    /// Flips `is_verified` and clears the OTP, only if `code` is still pending and unexpired.
    async fn mark_verified(
        &self,
        user_id: Uuid,
        code: &str,
        now: OffsetDateTime,
    ) -> Result<bool, AppError>;
    /// Replaces the stored refresh token. `false` if the user does not exist.
    async fn set_refresh_token(&self, user_id: Uuid, token: Option<&str>) -> Result<bool, AppError>;
}

const USER_COLUMNS: &str = "id, username, email, password_hash, is_verified, otp_code, otp_expiry, refresh_token, created_at";

pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("select user by id")?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .context("select user by email")?;
        Ok(user)
    }

    async fn find_by_email_or_username(
        &self,
        email: &str,
        username: &str,
    ) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 OR username = $2 LIMIT 1"
        ))
        .bind(email)
        .bind(username)
        .fetch_optional(&self.db)
        .await
        .context("select user by email or username")?;
        Ok(user)
    }

    async fn create(&self, user: NewUser) -> Result<User, AppError> {
        let res = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, username, email, password_hash, otp_code, otp_expiry)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.password_hash.as_str())
        .bind(&user.otp_code)
        .bind(user.otp_expiry)
        .fetch_one(&self.db)
        .await;

        match res {
            Ok(u) => Ok(u),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(AppError::Conflict(
                "User with given email or username already exists".into(),
            )),
            Err(e) => Err(anyhow::Error::new(e).context("insert user").into()),
        }
    }

    async fn replace_otp(
        &self,
        user_id: Uuid,
        code: &str,
        expiry: OffsetDateTime,
    ) -> Result<bool, AppError> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET otp_code = $2, otp_expiry = $3, updated_at = now()
             WHERE id = $1 AND is_verified = FALSE
            "#,
        )
        .bind(user_id)
        .bind(code)
        .bind(expiry)
        .execute(&self.db)
        .await
        .context("replace otp")?;
        Ok(res.rows_affected() == 1)
    }

    async fn mark_verified(
        &self,
        user_id: Uuid,
        code: &str,
        now: OffsetDateTime,
    ) -> Result<bool, AppError> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET is_verified = TRUE, otp_code = NULL, otp_expiry = NULL, updated_at = now()
             WHERE id = $1
               AND is_verified = FALSE
               AND otp_code = $2
               AND otp_expiry >= $3
            "#,
        )
        .bind(user_id)
        .bind(code)
        .bind(now)
        .execute(&self.db)
        .await
        .context("mark user verified")?;
        Ok(res.rows_affected() == 1)
    }

    async fn set_refresh_token(&self, user_id: Uuid, token: Option<&str>) -> Result<bool, AppError> {
        let res = sqlx::query(
            r#"UPDATE users SET refresh_token = $2, updated_at = now() WHERE id = $1"#,
        )
        .bind(user_id)
        .bind(token)
        .execute(&self.db)
        .await
        .context("set refresh token")?;
        Ok(res.rows_affected() == 1)
    }
}
