// src/notify/telegram.rs
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::Transport;
use crate::error::DeliveryError;
use crate::retry::RetryPolicy;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API `sendMessage` client.
#[derive(Clone)]
pub struct TelegramNotifier {
    token: String,
    chat_id: String,
    client: Client,
    api_base: String,
    timeout: Duration,
    retry: RetryPolicy,
    silent: bool,
}

impl TelegramNotifier {
    pub fn new(client: Client, token: String, chat_id: String) -> Self {
        Self {
            token,
            chat_id,
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            silent: false,
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs.max(1));
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.retry = self.retry.with_attempts(retries);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Deliver without a notification sound.
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    async fn send_once(&self, payload: &SendMessage<'_>) -> Result<(), DeliveryError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let send = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(payload)
            .send();
        let rsp = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| DeliveryError::Timeout(self.timeout))?
            // the token is part of the URL; keep it out of logs and errors
            .map_err(|e| DeliveryError::Request(e.without_url()))?;

        let status = rsp.status();
        let body = rsp.text().await.map_err(|e| DeliveryError::Request(e.without_url()))?;
        let reply: ApiReply = serde_json::from_str(&body).unwrap_or_default();

        if status.is_success() && reply.ok {
            return Ok(());
        }
        let description = reply
            .description
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
        if status.as_u16() == 400 {
            return Err(DeliveryError::Rejected(description));
        }
        Err(DeliveryError::Status {
            status: status.as_u16(),
            description,
            retry_after: reply
                .parameters
                .and_then(|p| p.retry_after)
                .map(Duration::from_secs),
        })
    }
}

#[async_trait::async_trait]
impl Transport for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<(), DeliveryError> {
        let payload = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
            disable_notification: self.silent,
        };
        self.retry.run("telegram", || self.send_once(&payload)).await
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
    disable_notification: bool,
}

#[derive(Deserialize, Default)]
struct ApiReply {
    #[serde(default)]
    ok: bool,
    description: Option<String>,
    parameters: Option<ReplyParameters>,
}

#[derive(Deserialize)]
struct ReplyParameters {
    retry_after: Option<u64>,
}
