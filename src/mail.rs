use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::MailConfig;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_otp_email(&self, to: &str, code: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize)]
struct OutboundMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: String,
    html: String,
}

/// Posts messages to a transactional-mail HTTP API.
pub struct HttpMailer {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    from: String,
}

impl HttpMailer {
    pub fn new(api_url: String, api_key: Option<String>, from: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("build mail http client")?;
        Ok(Self {
            client,
            api_url,
            api_key,
            from,
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_otp_email(&self, to: &str, code: &str) -> anyhow::Result<()> {
        let msg = OutboundMessage {
            from: &self.from,
            to,
            subject: "Your Verification Code",
            text: format!("Your verification code is: {code}"),
            html: format!("<p>Your verification code is: <b>{code}</b></p>"),
        };

        let mut req = self.client.post(&self.api_url).json(&msg);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req.send()
            .await
            .context("mail api request")?
            .error_for_status()
            .context("mail api rejected message")?;

        info!(to = %to, "verification email sent");
        Ok(())
    }
}

/// Development mailer: writes the code to the log instead of sending it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_otp_email(&self, to: &str, code: &str) -> anyhow::Result<()> {
        warn!(to = %to, code = %code, "MAIL_API_URL not set; verification code logged, not sent");
        Ok(())
    }
}

pub fn from_config(cfg: &MailConfig) -> anyhow::Result<Box<dyn Mailer>> {
    match &cfg.api_url {
        Some(url) => Ok(Box::new(HttpMailer::new(
            url.clone(),
            cfg.api_key.clone(),
            cfg.from.clone(),
        )?)),
        None => Ok(Box::new(LogMailer)),
    }
}
