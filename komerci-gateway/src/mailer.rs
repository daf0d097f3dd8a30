use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::info;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, subject: &str, title: &str, body: &str) -> Result<()>;
}

/// Writes mails to the log; the default when no mail relay is configured.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, subject: &str, title: &str, body: &str) -> Result<()> {
        info!(subject, title, body, "Mail (log only)");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct MailPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    to: Option<&'a str>,
    subject: &'a str,
    title: &'a str,
    body: &'a str,
    sent_at: DateTime<Utc>,
}

/// Hands mails to an HTTP relay as JSON.
#[derive(Clone)]
pub struct WebhookMailer {
    client: Client,
    url: String,
    bearer: Option<String>,
    to: Option<String>,
}

impl WebhookMailer {
    pub fn new(client: Client, url: impl Into<String>, bearer: Option<String>, to: Option<String>) -> Self {
        Self { client, url: url.into(), bearer, to }
    }
}

#[async_trait]
impl Mailer for WebhookMailer {
    async fn send(&self, subject: &str, title: &str, body: &str) -> Result<()> {
        let payload = MailPayload { to: self.to.as_deref(), subject, title, body, sent_at: Utc::now() };
        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Mail relay returned status {}", response.status()));
        }
        Ok(())
    }
}
