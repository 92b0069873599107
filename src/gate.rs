//! Query gate: serve a paid query or hand out a top-up invoice

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::catalog::Tier;
use crate::deadletter::DeadLetterLog;
use crate::provider::LanguageModel;
use crate::purchase::{InvoiceOffer, PurchaseInitiator};
use crate::store::{AccountId, Ledger, LedgerError};

pub const MODEL_APOLOGY: &str = "Sorry, an error occurred while answering your question. \
     You have not been charged for this query.";

pub const INSUFFICIENT_BALANCE: &str = "Insufficient balance. After payment, it may take up \
     to 2 minutes for credit to be granted.";

#[derive(Debug, Clone)]
pub enum QueryOutcome {
    /// Answer produced; one query debited
    Answered { answer: String },
    /// The model failed; nothing debited
    ModelUnavailable { apology: String },
    /// Balance exhausted; a single-query invoice was issued
    TopUpRequired { offer: InvoiceOffer },
    /// Balance exhausted and no invoice could be issued
    TopUpUnavailable,
}

pub struct QueryGate {
    ledger: Arc<Ledger>,
    purchases: Arc<PurchaseInitiator>,
    model: Arc<dyn LanguageModel>,
    dead_letters: Arc<DeadLetterLog>,
}

impl QueryGate {
    pub fn new(
        ledger: Arc<Ledger>,
        purchases: Arc<PurchaseInitiator>,
        model: Arc<dyn LanguageModel>,
        dead_letters: Arc<DeadLetterLog>,
    ) -> Self {
        Self {
            ledger,
            purchases,
            model,
            dead_letters,
        }
    }

    /// The balance check does not reserve a query: concurrent queries at
    /// balance 1 can both be answered, leaving the balance at -1 until the
    /// next purchase covers it.
    pub async fn handle(&self, account: AccountId, text: &str) -> Result<QueryOutcome, LedgerError> {
        let balance = self.ledger.get_balance(account)?;

        if balance <= 0 {
            info!(%account, balance, "insufficient balance, issuing top-up invoice");
            return Ok(match self.purchases.initiate(account, Tier::TOP_UP).await {
                Ok(offer) => QueryOutcome::TopUpRequired { offer },
                Err(e) => {
                    warn!(%account, "top-up invoice unavailable: {}", e);
                    QueryOutcome::TopUpUnavailable
                }
            });
        }

        let answer = match self.model.answer(text).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(%account, "language model failed: {:#}", e);
                return Ok(QueryOutcome::ModelUnavailable {
                    apology: MODEL_APOLOGY.to_string(),
                });
            }
        };

        self.debit(account).await;

        if let Err(e) = self.ledger.log_history(account, text, &answer).await {
            warn!(%account, "history entry not recorded: {}", e);
        }

        Ok(QueryOutcome::Answered { answer })
    }

    /// Debit one query for a produced answer. A debit the ledger cannot take
    /// goes to the dead-letter queue instead of being dropped.
    async fn debit(&self, account: AccountId) {
        let err = match self.ledger.adjust_balance(account, -1).await {
            Ok(_) => return,
            Err(e) => e,
        };

        if let Err(queue_err) = self
            .dead_letters
            .enqueue(account, -1, &format!("query debit: {}", err))
            .await
        {
            error!(
                %account,
                "debit lost: ledger failed ({}) and dead-letter write failed ({:#})",
                err,
                queue_err
            );
        }
    }
}
