//! Purchase initiation: invoice first, then the pending ledger row

use std::sync::Arc;
use tracing::{info, warn};

use crate::catalog::Tier;
use crate::provider::{PaymentProvider, QrRenderer};
use crate::store::{AccountId, Ledger, LedgerError, NewTransaction};

#[derive(Debug, thiserror::Error)]
pub enum PurchaseError {
    /// The provider could not issue an invoice; nothing was recorded
    #[error("invoice creation failed: {0:#}")]
    Invoice(anyhow::Error),

    #[error("recording transaction failed: {0}")]
    Ledger(#[from] LedgerError),
}

/// What the chat layer shows the payer
#[derive(Debug, Clone)]
pub struct InvoiceOffer {
    pub transaction_id: i64,
    pub tier: Tier,
    pub payment_request: String,
    /// PNG bytes; `None` if rendering failed, the text request still works
    pub qr_png: Option<Vec<u8>>,
}

pub struct PurchaseInitiator {
    ledger: Arc<Ledger>,
    payments: Arc<dyn PaymentProvider>,
    qr: Arc<dyn QrRenderer>,
}

impl PurchaseInitiator {
    pub fn new(
        ledger: Arc<Ledger>,
        payments: Arc<dyn PaymentProvider>,
        qr: Arc<dyn QrRenderer>,
    ) -> Self {
        Self {
            ledger,
            payments,
            qr,
        }
    }

    pub async fn initiate(
        &self,
        account: AccountId,
        tier: Tier,
    ) -> Result<InvoiceOffer, PurchaseError> {
        let invoice = self
            .payments
            .create_invoice(tier.price_sats(), &tier.memo())
            .await
            .map_err(PurchaseError::Invoice)?;

        let transaction_id = self
            .ledger
            .create_transaction(NewTransaction {
                account,
                invoice_id: &invoice.invoice_id,
                payment_hash: &invoice.payment_hash,
                amount_sats: tier.price_sats(),
                queries: tier.queries(),
            })
            .await?;

        info!(
            %account,
            transaction = transaction_id,
            queries = tier.queries(),
            sats = tier.price_sats(),
            "purchase pending"
        );

        let qr_png = match self.qr.render(&invoice.payment_request) {
            Ok(png) => Some(png),
            Err(e) => {
                warn!(transaction = transaction_id, "QR rendering failed: {:#}", e);
                None
            }
        };

        Ok(InvoiceOffer {
            transaction_id,
            tier,
            payment_request: invoice.payment_request,
            qr_png,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Invoice;
    use crate::store::{RetryPolicy, TransactionStatus};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FixedInvoices {
        fail: bool,
    }

    #[async_trait]
    impl PaymentProvider for FixedInvoices {
        async fn create_invoice(&self, amount_sats: i64, _memo: &str) -> anyhow::Result<Invoice> {
            if self.fail {
                return Err(anyhow!("connection refused"));
            }
            Ok(Invoice {
                invoice_id: format!("inv-{}", amount_sats),
                payment_hash: format!("hash-{}", amount_sats),
                payment_request: format!("lnbc{}n1test", amount_sats),
            })
        }

        async fn is_paid(&self, _payment_hash: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    struct BrokenQr;

    impl QrRenderer for BrokenQr {
        fn render(&self, _payload: &str) -> anyhow::Result<Vec<u8>> {
            Err(anyhow!("no encoder"))
        }
    }

    struct StubQr;

    impl QrRenderer for StubQr {
        fn render(&self, payload: &str) -> anyhow::Result<Vec<u8>> {
            Ok(payload.as_bytes().to_vec())
        }
    }

    fn ledger(dir: &TempDir) -> Arc<Ledger> {
        Arc::new(
            Ledger::open(
                &dir.path().join("ledger.db"),
                Duration::ZERO,
                RetryPolicy::default(),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_records_pending_transaction() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        let initiator = PurchaseInitiator::new(
            ledger.clone(),
            Arc::new(FixedInvoices { fail: false }),
            Arc::new(StubQr),
        );

        let offer = initiator.initiate(AccountId(1), Tier::Ten).await.unwrap();
        assert_eq!(offer.payment_request, "lnbc450n1test");
        assert_eq!(offer.qr_png.as_deref(), Some("lnbc450n1test".as_bytes()));

        let tx = ledger.get_transaction(offer.transaction_id).unwrap().unwrap();
        assert_eq!(tx.payment_hash, "hash-450");
        assert_eq!(tx.invoice_id, "inv-450");
        assert_eq!(tx.queries, 10);
        assert_eq!(tx.amount_sats, 450);
        assert_eq!(tx.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_invoice_failure_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        let initiator = PurchaseInitiator::new(
            ledger.clone(),
            Arc::new(FixedInvoices { fail: true }),
            Arc::new(StubQr),
        );

        let result = initiator.initiate(AccountId(1), Tier::Hundred).await;
        assert!(matches!(result, Err(PurchaseError::Invoice(_))));
        assert!(ledger.list_pending_transactions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_qr_failure_still_offers_invoice() {
        let dir = TempDir::new().unwrap();
        let initiator = PurchaseInitiator::new(
            ledger(&dir),
            Arc::new(FixedInvoices { fail: false }),
            Arc::new(BrokenQr),
        );

        let offer = initiator.initiate(AccountId(2), Tier::Single).await.unwrap();
        assert!(offer.qr_png.is_none());
        assert_eq!(offer.payment_request, "lnbc50n1test");
    }
}
