//! External collaborators and the registry that wires them from config
//!
//! - Payments: LNbits wallet API (invoice creation, payment status)
//! - Answers: OpenAI-compatible chat completions
//! - Notifications: Telegram Bot API `sendMessage`
//! - QR codes: PNG rendering of payment requests
//!
//! A collaborator whose credentials are missing is replaced by
//! [`Unconfigured`], which fails every call. Commands that never touch that
//! provider keep working.

mod lnbits;
mod openai;
mod qr;
mod telegram;

pub use lnbits::LnbitsClient;
pub use openai::OpenAiClient;
pub use qr::PngQrRenderer;
pub use telegram::TelegramNotifier;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::store::AccountId;
use crate::Config;

/// An invoice issued by the payment provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    pub invoice_id: String,
    pub payment_hash: String,
    /// BOLT11 string to show to the payer
    pub payment_request: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_invoice(&self, amount_sats: i64, memo: &str) -> Result<Invoice>;

    async fn is_paid(&self, payment_hash: &str) -> Result<bool>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn answer(&self, query: &str) -> Result<String>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, account: AccountId, text: &str) -> Result<()>;
}

pub trait QrRenderer: Send + Sync {
    /// Encode `payload` as image bytes
    fn render(&self, payload: &str) -> Result<Vec<u8>>;
}

/// Stand-in for a provider whose credentials are not configured
pub struct Unconfigured(pub &'static str);

impl Unconfigured {
    fn error(&self) -> anyhow::Error {
        anyhow!("{} is not configured", self.0)
    }
}

#[async_trait]
impl PaymentProvider for Unconfigured {
    async fn create_invoice(&self, _amount_sats: i64, _memo: &str) -> Result<Invoice> {
        Err(self.error())
    }

    async fn is_paid(&self, _payment_hash: &str) -> Result<bool> {
        Err(self.error())
    }
}

#[async_trait]
impl LanguageModel for Unconfigured {
    async fn answer(&self, _query: &str) -> Result<String> {
        Err(self.error())
    }
}

#[async_trait]
impl Notifier for Unconfigured {
    async fn notify(&self, _account: AccountId, _text: &str) -> Result<()> {
        Err(self.error())
    }
}

/// The set of collaborators the broker talks to
#[derive(Clone)]
pub struct Collaborators {
    pub payments: Arc<dyn PaymentProvider>,
    pub model: Arc<dyn LanguageModel>,
    pub notifier: Arc<dyn Notifier>,
    pub qr: Arc<dyn QrRenderer>,
}

impl Collaborators {
    pub fn from_config(config: &Config) -> Result<Self> {
        let payments: Arc<dyn PaymentProvider> =
            match (&config.lnbits.domain, &config.lnbits.admin_key) {
                (Some(domain), Some(key)) => Arc::new(LnbitsClient::new(
                    domain,
                    key,
                    Duration::from_secs(config.lnbits.timeout_secs),
                )?),
                _ => Arc::new(Unconfigured("LNbits (LNBITS_DOMAIN / LNBITS_ADMIN_KEY)")),
            };

        let model: Arc<dyn LanguageModel> = match &config.openai.api_key {
            Some(key) => Arc::new(OpenAiClient::new(
                &config.openai.base_url,
                key,
                &config.openai.model,
                Duration::from_secs(config.openai.timeout_secs),
            )?),
            None => Arc::new(Unconfigured("OpenAI (OPENAI_API_KEY)")),
        };

        let notifier: Arc<dyn Notifier> = match &config.telegram.token {
            Some(token) => Arc::new(TelegramNotifier::new(
                &config.telegram.api_base,
                token,
                Duration::from_secs(config.settlement.notify_timeout_secs),
            )?),
            None => Arc::new(Unconfigured("Telegram (TELEGRAM_TOKEN)")),
        };

        Ok(Self {
            payments,
            model,
            notifier,
            qr: Arc::new(PngQrRenderer::default()),
        })
    }
}
