//! The surface the chat layer talks to
//!
//! Owns the ledger, the collaborators and the three components built on them
//! (purchase initiator, query gate, settlement loop). Chat front-ends call
//! [`Broker::handle_incoming_query`], [`Broker::handle_purchase_request`] and
//! [`Broker::account_summary`]; the service entry point runs
//! [`Broker::settlement`] in the background.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;

use crate::catalog::Tier;
use crate::deadletter::{DeadLetterLog, QueuedAdjustment};
use crate::gate::{QueryGate, QueryOutcome};
use crate::provider::Collaborators;
use crate::purchase::{InvoiceOffer, PurchaseError, PurchaseInitiator};
use crate::settlement::{SettlementLoop, SettlementTiming};
use crate::store::{
    AccountId, AccountStats, HistoryRow, Ledger, LedgerError, LogRow, TransactionRow,
};
use crate::Config;

/// Rows shown per section of an account summary
pub const SUMMARY_TAIL: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub account: AccountId,
    pub balance: i64,
    pub history: Vec<HistoryRow>,
    pub favorites: Vec<LogRow>,
    pub shared: Vec<LogRow>,
    pub payments: Vec<TransactionRow>,
    pub stats: AccountStats,
}

pub struct Broker {
    ledger: Arc<Ledger>,
    dead_letters: Arc<DeadLetterLog>,
    purchases: Arc<PurchaseInitiator>,
    gate: QueryGate,
    settlement: Arc<SettlementLoop>,
}

impl Broker {
    pub fn new(
        ledger: Arc<Ledger>,
        dead_letters: Arc<DeadLetterLog>,
        collaborators: Collaborators,
        timing: SettlementTiming,
    ) -> Self {
        let purchases = Arc::new(PurchaseInitiator::new(
            ledger.clone(),
            collaborators.payments.clone(),
            collaborators.qr.clone(),
        ));
        let gate = QueryGate::new(
            ledger.clone(),
            purchases.clone(),
            collaborators.model.clone(),
            dead_letters.clone(),
        );
        let settlement = Arc::new(SettlementLoop::new(
            ledger.clone(),
            collaborators.payments,
            collaborators.notifier,
            dead_letters.clone(),
            timing,
        ));

        Self {
            ledger,
            dead_letters,
            purchases,
            gate,
            settlement,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let ledger = Ledger::from_config(config).with_context(|| {
            format!("opening ledger at {}", config.database_path().display())
        })?;
        let dead_letters = DeadLetterLog::open(&config.dead_letter_path())?;
        let collaborators = Collaborators::from_config(config)?;

        Ok(Self::new(
            Arc::new(ledger),
            Arc::new(dead_letters),
            collaborators,
            SettlementTiming::from(config),
        ))
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn settlement(&self) -> Arc<SettlementLoop> {
        self.settlement.clone()
    }

    /// Serve the query if the account has balance, otherwise issue a top-up invoice
    pub async fn handle_incoming_query(
        &self,
        account: AccountId,
        text: &str,
    ) -> Result<QueryOutcome, LedgerError> {
        self.gate.handle(account, text.trim()).await
    }

    pub async fn handle_purchase_request(
        &self,
        account: AccountId,
        tier: Tier,
    ) -> Result<InvoiceOffer, PurchaseError> {
        self.purchases.initiate(account, tier).await
    }

    pub fn account_summary(&self, account: AccountId) -> Result<AccountSummary, LedgerError> {
        Ok(AccountSummary {
            account,
            balance: self.ledger.get_balance(account)?,
            history: self.ledger.history_tail(account, SUMMARY_TAIL)?,
            favorites: self.ledger.favorites_tail(account, SUMMARY_TAIL)?,
            shared: self.ledger.shared_tail(account, SUMMARY_TAIL)?,
            payments: self.ledger.recent_transactions(account, SUMMARY_TAIL)?,
            stats: self.ledger.stats(account)?,
        })
    }

    /// Save the most recent answer as a favorite. `None` if there is no answer yet.
    pub async fn save_favorite(&self, account: AccountId) -> Result<Option<String>, LedgerError> {
        let latest = match self.ledger.history_tail(account, 1)?.into_iter().next() {
            Some(entry) => entry.response,
            None => return Ok(None),
        };
        self.ledger.save_favorite(account, &latest).await?;
        Ok(Some(latest))
    }

    pub async fn share_topic(&self, account: AccountId, content: &str) -> Result<(), LedgerError> {
        self.ledger.share_topic(account, content.trim()).await
    }

    pub async fn outstanding_dead_letters(&self) -> Result<Vec<QueuedAdjustment>> {
        self.dead_letters.outstanding().await
    }

    pub fn dead_letter_path(&self) -> &std::path::Path {
        self.dead_letters.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{
        Invoice, LanguageModel, Notifier, PaymentProvider, PngQrRenderer, Unconfigured,
    };
    use crate::store::RetryPolicy;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Echo;

    #[async_trait]
    impl LanguageModel for Echo {
        async fn answer(&self, query: &str) -> anyhow::Result<String> {
            Ok(query.to_uppercase())
        }
    }

    struct AlwaysPaid;

    #[async_trait]
    impl PaymentProvider for AlwaysPaid {
        async fn create_invoice(&self, amount_sats: i64, _memo: &str) -> anyhow::Result<Invoice> {
            Ok(Invoice {
                invoice_id: format!("inv{}", amount_sats),
                payment_hash: format!("hash{}", amount_sats),
                payment_request: format!("lnbc{}n1", amount_sats),
            })
        }

        async fn is_paid(&self, _payment_hash: &str) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    struct Silent;

    #[async_trait]
    impl Notifier for Silent {
        async fn notify(&self, _account: AccountId, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn broker(dir: &TempDir, payments: Arc<dyn PaymentProvider>) -> Broker {
        let ledger = Ledger::open(
            &dir.path().join("ledger.db"),
            Duration::ZERO,
            RetryPolicy::default(),
        )
        .unwrap();
        let dead_letters = DeadLetterLog::open(&dir.path().join("dead.jsonl")).unwrap();
        Broker::new(
            Arc::new(ledger),
            Arc::new(dead_letters),
            Collaborators {
                payments,
                model: Arc::new(Echo),
                notifier: Arc::new(Silent),
                qr: Arc::new(PngQrRenderer::default()),
            },
            SettlementTiming::default(),
        )
    }

    #[tokio::test]
    async fn test_summary_for_new_account_is_empty() {
        let dir = TempDir::new().unwrap();
        let broker = broker(&dir, Arc::new(AlwaysPaid));

        let summary = broker.account_summary(AccountId(1)).unwrap();
        assert_eq!(summary.balance, 0);
        assert!(summary.history.is_empty());
        assert!(summary.payments.is_empty());
        assert_eq!(summary.stats, AccountStats::default());
    }

    #[tokio::test]
    async fn test_purchase_settle_query_favorite() {
        let dir = TempDir::new().unwrap();
        let broker = broker(&dir, Arc::new(AlwaysPaid));
        let account = AccountId(77);

        let offer = broker
            .handle_purchase_request(account, Tier::Ten)
            .await
            .unwrap();
        assert!(offer.qr_png.is_some());
        broker.settlement().run_cycle().await.unwrap();

        let outcome = broker
            .handle_incoming_query(account, "  hello  ")
            .await
            .unwrap();
        assert!(matches!(outcome, QueryOutcome::Answered { ref answer } if answer == "HELLO"));

        assert_eq!(
            broker.save_favorite(account).await.unwrap().as_deref(),
            Some("HELLO")
        );
        broker.share_topic(account, "sats").await.unwrap();

        let summary = broker.account_summary(account).unwrap();
        assert_eq!(summary.balance, 9);
        assert_eq!(summary.history[0].query, "hello");
        assert_eq!(summary.favorites[0].content, "HELLO");
        assert_eq!(summary.shared[0].content, "sats");
        assert_eq!(summary.payments[0].amount_sats, 450);
        assert_eq!(summary.stats.queries_served, 1);
        assert_eq!(summary.stats.sats_settled, 450);
    }

    #[tokio::test]
    async fn test_save_favorite_without_history() {
        let dir = TempDir::new().unwrap();
        let broker = broker(&dir, Arc::new(Unconfigured("LNbits")));

        assert_eq!(broker.save_favorite(AccountId(5)).await.unwrap(), None);
        assert!(broker
            .account_summary(AccountId(5))
            .unwrap()
            .favorites
            .is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_payments_fail_purchase_cleanly() {
        let dir = TempDir::new().unwrap();
        let broker = broker(&dir, Arc::new(Unconfigured("LNbits")));

        let result = broker.handle_purchase_request(AccountId(5), Tier::Single).await;
        assert!(matches!(result, Err(PurchaseError::Invoice(_))));

        let outcome = broker.handle_incoming_query(AccountId(5), "hi").await.unwrap();
        assert!(matches!(outcome, QueryOutcome::TopUpUnavailable));
        assert!(broker.ledger().list_pending_transactions().unwrap().is_empty());
    }
}
