//! LNbits wallet API client

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{Invoice, PaymentProvider};

#[derive(Debug, Serialize)]
struct CreateInvoiceRequest<'a> {
    out: bool,
    amount: i64,
    memo: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateInvoiceResponse {
    payment_hash: String,
    #[serde(alias = "bolt11")]
    payment_request: String,
    #[serde(default)]
    checking_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentStatusResponse {
    #[serde(default)]
    paid: bool,
}

pub struct LnbitsClient {
    base_url: String,
    admin_key: String,
    client: Client,
}

impl LnbitsClient {
    pub fn new(domain: &str, admin_key: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building LNbits HTTP client")?;

        Ok(Self {
            base_url: domain.trim_end_matches('/').to_string(),
            admin_key: admin_key.to_string(),
            client,
        })
    }
}

#[async_trait]
impl PaymentProvider for LnbitsClient {
    async fn create_invoice(&self, amount_sats: i64, memo: &str) -> Result<Invoice> {
        let url = format!("{}/api/v1/payments", self.base_url);
        let request = CreateInvoiceRequest {
            out: false,
            amount: amount_sats,
            memo,
        };

        let response = self
            .client
            .post(&url)
            .header("X-Api-Key", &self.admin_key)
            .json(&request)
            .send()
            .await
            .context("invoice request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            bail!("invoice creation failed with status {}: {}", status, error_text);
        }

        let created: CreateInvoiceResponse = response
            .json()
            .await
            .context("failed to parse invoice response")?;

        info!(amount_sats, payment_hash = %created.payment_hash, "invoice created");

        Ok(Invoice {
            invoice_id: created
                .checking_id
                .unwrap_or_else(|| created.payment_hash.clone()),
            payment_hash: created.payment_hash,
            payment_request: created.payment_request,
        })
    }

    async fn is_paid(&self, payment_hash: &str) -> Result<bool> {
        let url = format!("{}/api/v1/payments/{}", self.base_url, payment_hash);

        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.admin_key)
            .send()
            .await
            .context("payment status request failed")?;

        if !response.status().is_success() {
            bail!("payment status check failed with status {}", response.status());
        }

        let status: PaymentStatusResponse = response
            .json()
            .await
            .context("failed to parse payment status")?;

        debug!(payment_hash, paid = status.paid, "payment status checked");
        Ok(status.paid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoice_response_accepts_bolt11_field() {
        let body = r#"{"payment_hash":"abc","bolt11":"lnbc500n1...","checking_id":"chk"}"#;
        let parsed: CreateInvoiceResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.payment_request, "lnbc500n1...");
        assert_eq!(parsed.checking_id.as_deref(), Some("chk"));
    }

    #[test]
    fn test_status_defaults_to_unpaid() {
        let parsed: PaymentStatusResponse = serde_json::from_str(r#"{"details":{}}"#).unwrap();
        assert!(!parsed.paid);
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client =
            LnbitsClient::new("https://lnbits.example/", "key", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "https://lnbits.example");
    }
}
