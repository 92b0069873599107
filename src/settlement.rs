//! Settlement loop: poll pending invoices and credit paid ones exactly once
//!
//! Each cycle replays dead-lettered adjustments, snapshots the pending
//! transactions, asks the payment provider about each one and settles the paid
//! ones through [`Ledger::settle`]. Provider and notification calls are bounded
//! by timeouts so one stuck account cannot stall the batch. A transaction only
//! leaves `pending` through the atomic settle step, so rescanning is harmless.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::deadletter::DeadLetterLog;
use crate::provider::{Notifier, PaymentProvider};
use crate::store::{Ledger, LedgerError, Settlement, TransactionRow};

/// Counters for one pass over the pending transactions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub scanned: usize,
    pub settled: usize,
    pub unpaid: usize,
    /// Status checks that errored or timed out; retried next cycle
    pub check_failures: usize,
    /// Paid, but the ledger write failed; retried next cycle
    pub deferred: usize,
    pub already_settled: usize,
    pub notify_failures: usize,
    pub replayed: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct SettlementTiming {
    pub interval: Duration,
    pub provider_timeout: Duration,
    pub notify_timeout: Duration,
}

impl Default for SettlementTiming {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            provider_timeout: Duration::from_secs(10),
            notify_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&Config> for SettlementTiming {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.settlement_interval(),
            provider_timeout: Duration::from_secs(config.settlement.provider_timeout_secs),
            notify_timeout: Duration::from_secs(config.settlement.notify_timeout_secs),
        }
    }
}

pub struct SettlementLoop {
    ledger: Arc<Ledger>,
    payments: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn Notifier>,
    dead_letters: Arc<DeadLetterLog>,
    timing: SettlementTiming,
}

impl SettlementLoop {
    pub fn new(
        ledger: Arc<Ledger>,
        payments: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn Notifier>,
        dead_letters: Arc<DeadLetterLog>,
        timing: SettlementTiming,
    ) -> Self {
        Self {
            ledger,
            payments,
            notifier,
            dead_letters,
            timing,
        }
    }

    /// Run forever: one recovery pass immediately, then a cycle every period
    pub async fn start(self: Arc<Self>) {
        info!(
            "Starting settlement loop (every {:?})",
            self.timing.interval
        );

        let mut interval = tokio::time::interval(self.timing.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // First tick completes immediately
        interval.tick().await;
        self.recover().await;

        loop {
            interval.tick().await;

            match self.run_cycle().await {
                Ok(report) => debug!(?report, "settlement cycle complete"),
                Err(e) => warn!("Settlement cycle failed: {}", e),
            }
        }
    }

    /// Startup pass: settle anything paid while we were down and replay
    /// adjustments queued by a previous run
    pub async fn recover(&self) -> Option<CycleReport> {
        match self.run_cycle().await {
            Ok(report) => {
                info!(
                    settled = report.settled,
                    replayed = report.replayed,
                    pending = report.unpaid + report.check_failures + report.deferred,
                    "recovery pass complete"
                );
                Some(report)
            }
            Err(e) => {
                error!("recovery pass failed: {}", e);
                None
            }
        }
    }

    /// One full pass. Only failing to read the pending snapshot aborts it.
    pub async fn run_cycle(&self) -> Result<CycleReport, LedgerError> {
        let mut report = CycleReport {
            replayed: self.replay_dead_letters().await,
            ..CycleReport::default()
        };

        let pending = self.ledger.list_pending_transactions()?;
        report.scanned = pending.len();

        for transaction in &pending {
            self.process(transaction, &mut report).await;
        }

        if report.settled > 0 || report.deferred > 0 {
            info!(
                scanned = report.scanned,
                settled = report.settled,
                deferred = report.deferred,
                "settlement cycle"
            );
        }
        Ok(report)
    }

    async fn process(&self, transaction: &TransactionRow, report: &mut CycleReport) {
        let id = transaction.id;
        let account = transaction.account;

        let paid = match timeout(
            self.timing.provider_timeout,
            self.payments.is_paid(&transaction.payment_hash),
        )
        .await
        {
            Ok(Ok(paid)) => paid,
            Ok(Err(e)) => {
                warn!(transaction = id, %account, "payment status unavailable: {:#}", e);
                report.check_failures += 1;
                return;
            }
            Err(_) => {
                warn!(transaction = id, %account, "payment status check timed out");
                report.check_failures += 1;
                return;
            }
        };

        if !paid {
            report.unpaid += 1;
            return;
        }

        match self.ledger.settle(transaction).await {
            Ok(Settlement::Applied { balance }) => {
                info!(
                    transaction = id,
                    %account,
                    queries = transaction.queries,
                    balance,
                    "payment settled"
                );
                report.settled += 1;
            }
            Ok(Settlement::AlreadySettled) => {
                debug!(transaction = id, "already settled elsewhere");
                report.already_settled += 1;
                return;
            }
            Err(e) => {
                error!(transaction = id, %account, "settlement deferred: {}", e);
                report.deferred += 1;
                return;
            }
        }

        let text = credit_notice(transaction.queries);
        match timeout(self.timing.notify_timeout, self.notifier.notify(account, &text)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(transaction = id, %account, "credit notification failed: {:#}", e);
                report.notify_failures += 1;
            }
            Err(_) => {
                warn!(transaction = id, %account, "credit notification timed out");
                report.notify_failures += 1;
            }
        }
    }

    /// Apply outstanding dead-lettered adjustments and return how many this
    /// call applied. The ledger claims each id in the same transaction as the
    /// balance change, so concurrent replays or a crash before `resolve` never
    /// apply one twice. Stops at the first ledger failure since the storage is
    /// evidently still contended.
    pub async fn replay_dead_letters(&self) -> usize {
        let outstanding = match self.dead_letters.outstanding().await {
            Ok(outstanding) => outstanding,
            Err(e) => {
                error!("reading dead letters failed: {:#}", e);
                return 0;
            }
        };

        let mut replayed = 0;
        for adjustment in outstanding {
            let applied = match self.ledger.apply_queued(&adjustment).await {
                Ok(applied) => applied,
                Err(e) => {
                    warn!(id = %adjustment.id, "dead letter replay deferred: {}", e);
                    break;
                }
            };

            if applied {
                info!(
                    id = %adjustment.id,
                    account = %adjustment.account,
                    delta = adjustment.delta,
                    "dead letter replayed"
                );
                replayed += 1;
            }

            // Bookkeeping only; an unresolved entry is skipped by the ledger next time
            if let Err(e) = self.dead_letters.resolve(adjustment.id).await {
                warn!(id = %adjustment.id, "dead letter not marked resolved: {:#}", e);
            }
        }
        replayed
    }
}

pub fn credit_notice(queries: i64) -> String {
    if queries == 1 {
        "Payment received! 1 query has been added to your balance.".to_string()
    } else {
        format!(
            "Payment received! {} queries have been added to your balance.",
            queries
        )
    }
}
