use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::auth::jwt::JwtKeys;
use crate::auth::repo::{PgUserRepo, UserRepo};
use crate::config::AppConfig;
use crate::mail::{self, Mailer};
use crate::posts::repo::{PgPostRepo, PostRepo};
use crate::storage::{Storage, StorageClient};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub keys: Arc<JwtKeys>,
    pub users: Arc<dyn UserRepo>,
    pub posts: Arc<dyn PostRepo>,
    pub storage: Arc<dyn StorageClient>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("run migrations")?;

        let storage = Arc::new(
            Storage::new(
                &config.minio_endpoint,
                &config.minio_bucket,
                &config.minio_access_key,
                &config.minio_secret_key,
                "us-east-1",
                &config.media_public_url,
            )
            .await?,
        ) as Arc<dyn StorageClient>;

        let mailer: Arc<dyn Mailer> = Arc::from(mail::from_config(&config.mail)?);

        Ok(Self {
            keys: Arc::new(JwtKeys::from_config(&config.jwt)),
            users: Arc::new(PgUserRepo::new(db.clone())),
            posts: Arc::new(PgPostRepo::new(db)),
            storage,
            mailer,
            config,
        })
    }
}
