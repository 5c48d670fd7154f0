use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    /// Transactional mail endpoint. `None` falls back to logging the code.
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub otp_ttl_minutes: i64,
    pub mail: MailConfig,
    pub minio_endpoint: String,
    pub minio_bucket: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    pub media_public_url: String,
    pub cookie_secure: bool,
    pub frontend_url: Option<String>,
}

fn env_i64(key: &str, default: i64) -> anyhow::Result<i64> {
    match std::env::var(key) {
        Ok(v) => v
            .parse::<i64>()
            .map_err(|e| anyhow::anyhow!("{key} must be an integer: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("{key} is not set"))
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env_required("DATABASE_URL")?;
        let jwt = JwtConfig {
            access_secret: env_required("ACCESS_TOKEN_SECRET")?,
            refresh_secret: env_required("REFRESH_TOKEN_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "quillpost".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "quillpost-users".into()),
            ttl_minutes: env_i64("ACCESS_TOKEN_TTL_MINUTES", 15)?,
            refresh_ttl_minutes: env_i64("REFRESH_TOKEN_TTL_MINUTES", 60 * 24 * 10)?,
        };
        if jwt.access_secret == jwt.refresh_secret {
            anyhow::bail!("ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ");
        }

        let mail = MailConfig {
            api_url: std::env::var("MAIL_API_URL").ok(),
            api_key: std::env::var("MAIL_API_KEY").ok(),
            from: std::env::var("MAIL_FROM").unwrap_or_else(|_| "no-reply@quillpost.local".into()),
        };

        let minio_endpoint = env_required("MINIO_ENDPOINT")?;
        let minio_bucket = env_required("MINIO_BUCKET")?;
        let media_public_url = std::env::var("MEDIA_PUBLIC_URL")
            .unwrap_or_else(|_| format!("{}/{}", minio_endpoint.trim_end_matches('/'), minio_bucket));

        Ok(Self {
            database_url,
            jwt,
            otp_ttl_minutes: env_i64("OTP_TTL_MINUTES", 10)?,
            mail,
            minio_endpoint,
            minio_bucket,
            minio_access_key: env_required("MINIO_ACCESS_KEY")?,
            minio_secret_key: env_required("MINIO_SECRET_KEY")?,
            media_public_url,
            cookie_secure: std::env::var("COOKIE_SECURE")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            frontend_url: std::env::var("FRONTEND_URL").ok(),
        })
    }
}
