//! Telegram Bot API notifier. The account id is the chat id.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Notifier;
use crate::store::AccountId;

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramNotifier {
    send_url: String,
    client: Client,
}

impl TelegramNotifier {
    pub fn new(api_base: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building Telegram HTTP client")?;

        Ok(Self {
            send_url: format!("{}/bot{}/sendMessage", api_base.trim_end_matches('/'), token),
            client,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, account: AccountId, text: &str) -> Result<()> {
        // reqwest errors carry the URL, which embeds the bot token
        let response = self
            .client
            .post(&self.send_url)
            .json(&SendMessage {
                chat_id: account.0,
                text,
            })
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("sendMessage request failed: {}", e.without_url()))?;

        let status = response.status();
        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("failed to parse sendMessage reply: {}", e.without_url()))?;

        if !status.is_success() || !body.ok {
            bail!(
                "sendMessage rejected ({}): {}",
                status,
                body.description.unwrap_or_default()
            );
        }
        Ok(())
    }
}
