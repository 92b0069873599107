use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use satsgate::deadletter::DeadLetterLog;
use satsgate::provider::{Invoice, PngQrRenderer};
use satsgate::purchase::PurchaseError;
use satsgate::settlement::SettlementTiming;
use satsgate::store::{RetryPolicy, TransactionStatus};
use satsgate::{
    AccountId, Broker, Collaborators, LanguageModel, Ledger, Notifier, PaymentProvider,
    QueryOutcome, Tier,
};

#[derive(Default)]
struct FakeLnbits {
    issued: AtomicUsize,
    paid: Mutex<HashSet<String>>,
    down: AtomicBool,
}

impl FakeLnbits {
    fn pay(&self, payment_hash: &str) {
        self.paid.lock().unwrap().insert(payment_hash.to_string());
    }
}

#[async_trait]
impl PaymentProvider for FakeLnbits {
    async fn create_invoice(&self, amount_sats: i64, _memo: &str) -> anyhow::Result<Invoice> {
        if self.down.load(Ordering::SeqCst) {
            return Err(anyhow!("error sending request: connection refused"));
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(Invoice {
            invoice_id: format!("chk-{}", n),
            payment_hash: format!("hash-{}", n),
            payment_request: format!("lnbc{}n1invoice{}", amount_sats, n),
        })
    }

    async fn is_paid(&self, payment_hash: &str) -> anyhow::Result<bool> {
        Ok(self.paid.lock().unwrap().contains(payment_hash))
    }
}

#[derive(Default)]
struct FakeModel {
    calls: AtomicUsize,
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn answer(&self, query: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("42 ({})", query))
    }
}

#[derive(Default)]
struct FakeChat {
    sent: Mutex<Vec<(AccountId, String)>>,
}

#[async_trait]
impl Notifier for FakeChat {
    async fn notify(&self, account: AccountId, text: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((account, text.to_string()));
        Ok(())
    }
}

struct Harness {
    dir: TempDir,
    lnbits: Arc<FakeLnbits>,
    model: Arc<FakeModel>,
    chat: Arc<FakeChat>,
    broker: Broker,
}

impl Harness {
    /// A second broker on the same database and dead-letter files, as a
    /// separate process would open them
    fn another_process(&self) -> Broker {
        open_broker(self.dir.path(), &self.lnbits, &self.model, &self.chat)
    }
}

fn open_broker(
    dir: &Path,
    lnbits: &Arc<FakeLnbits>,
    model: &Arc<FakeModel>,
    chat: &Arc<FakeChat>,
) -> Broker {
    let ledger = Ledger::open(
        &dir.join("botdata.db"),
        Duration::ZERO,
        RetryPolicy {
            attempts: 50,
            backoff: Duration::from_millis(20),
        },
    )
    .unwrap();
    let dead_letters = DeadLetterLog::open(&dir.join("dead_letters.jsonl")).unwrap();

    Broker::new(
        Arc::new(ledger),
        Arc::new(dead_letters),
        Collaborators {
            payments: lnbits.clone(),
            model: model.clone(),
            notifier: chat.clone(),
            qr: Arc::new(PngQrRenderer::default()),
        },
        SettlementTiming::default(),
    )
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let lnbits = Arc::new(FakeLnbits::default());
    let model = Arc::new(FakeModel::default());
    let chat = Arc::new(FakeChat::default());
    let broker = open_broker(dir.path(), &lnbits, &model, &chat);

    Harness {
        dir,
        lnbits,
        model,
        chat,
        broker,
    }
}

#[tokio::test]
async fn fresh_account_gets_single_query_invoice() {
    let h = harness();
    let account = AccountId(1001);

    assert_eq!(h.broker.ledger().get_balance(account).unwrap(), 0);

    let outcome = h
        .broker
        .handle_incoming_query(account, "what is lightning?")
        .await
        .unwrap();

    let offer = match outcome {
        QueryOutcome::TopUpRequired { offer } => offer,
        other => panic!("expected a top-up invoice, got {:?}", other),
    };
    assert_eq!(offer.tier, Tier::Single);
    assert!(offer.payment_request.starts_with("lnbc50n1"));
    assert!(offer.qr_png.is_some());
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);

    let tx = h
        .broker
        .ledger()
        .get_transaction(offer.transaction_id)
        .unwrap()
        .unwrap();
    assert_eq!((tx.amount_sats, tx.queries), (50, 1));
}

#[tokio::test]
async fn bulk_purchase_settles_on_confirmation() {
    let h = harness();
    let account = AccountId(1002);

    let offer = h
        .broker
        .handle_purchase_request(account, Tier::Ten)
        .await
        .unwrap();
    let tx = h
        .broker
        .ledger()
        .get_transaction(offer.transaction_id)
        .unwrap()
        .unwrap();
    assert_eq!(tx.queries, 10);
    assert_eq!(tx.amount_sats, 450);
    assert_eq!(tx.status, TransactionStatus::Pending);

    // Polled before payment: nothing happens, however many times
    let settlement = h.broker.settlement();
    for _ in 0..3 {
        settlement.run_cycle().await.unwrap();
    }
    assert_eq!(h.broker.ledger().get_balance(account).unwrap(), 0);

    h.lnbits.pay(&tx.payment_hash);
    let report = settlement.run_cycle().await.unwrap();
    assert_eq!(report.settled, 1);

    let tx = h.broker.ledger().get_transaction(tx.id).unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(h.broker.ledger().get_balance(account).unwrap(), 10);

    // No double credit on later cycles
    for _ in 0..3 {
        let report = settlement.run_cycle().await.unwrap();
        assert_eq!(report.scanned, 0);
    }
    assert_eq!(h.broker.ledger().get_balance(account).unwrap(), 10);
    assert_eq!(h.chat.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn balance_runs_down_then_gates() {
    let h = harness();
    let account = AccountId(1003);
    h.broker.ledger().adjust_balance(account, 3).await.unwrap();

    for i in 0..3 {
        let outcome = h
            .broker
            .handle_incoming_query(account, &format!("question {}", i))
            .await
            .unwrap();
        assert!(matches!(outcome, QueryOutcome::Answered { .. }));
    }
    assert_eq!(h.broker.ledger().get_balance(account).unwrap(), 0);
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 3);

    let outcome = h
        .broker
        .handle_incoming_query(account, "one more")
        .await
        .unwrap();
    assert!(matches!(outcome, QueryOutcome::TopUpRequired { .. }));
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 3);

    let summary = h.broker.account_summary(account).unwrap();
    assert_eq!(summary.stats.queries_served, 3);
    assert_eq!(summary.history[0].query, "question 2");
}

#[tokio::test]
async fn invoice_failure_leaves_no_transaction() {
    let h = harness();
    let account = AccountId(1004);
    h.lnbits.down.store(true, Ordering::SeqCst);

    let result = h.broker.handle_purchase_request(account, Tier::Hundred).await;
    assert!(matches!(result, Err(PurchaseError::Invoice(_))));

    let outcome = h.broker.handle_incoming_query(account, "hi").await.unwrap();
    assert!(matches!(outcome, QueryOutcome::TopUpUnavailable));

    assert!(h
        .broker
        .ledger()
        .list_pending_transactions()
        .unwrap()
        .is_empty());
    assert!(h
        .broker
        .ledger()
        .recent_transactions(account, 10)
        .unwrap()
        .is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_debits_and_credits_are_not_lost() {
    let h = harness();
    let account = AccountId(1005);
    h.broker.ledger().adjust_balance(account, 20).await.unwrap();

    let offer = h
        .broker
        .handle_purchase_request(account, Tier::Hundred)
        .await
        .unwrap();
    let tx = h
        .broker
        .ledger()
        .get_transaction(offer.transaction_id)
        .unwrap()
        .unwrap();
    h.lnbits.pay(&tx.payment_hash);

    // Half the queries go through a separate ledger handle, so writers
    // contend in SQLite itself and not only on the in-process lock
    let first = Arc::new(h.another_process());
    let second = Arc::new(h.another_process());

    let mut queries = vec![];
    for i in 0..10 {
        let broker = if i % 2 == 0 { first.clone() } else { second.clone() };
        queries.push(tokio::spawn(async move {
            broker
                .handle_incoming_query(account, &format!("q{}", i))
                .await
                .unwrap()
        }));
    }
    let settlement = first.settlement();
    let cycle = tokio::spawn(async move { settlement.run_cycle().await.unwrap() });

    for query in queries {
        assert!(matches!(query.await.unwrap(), QueryOutcome::Answered { .. }));
    }
    let report = cycle.await.unwrap();
    assert_eq!(report.settled, 1);

    // 20 + 100 credited once - 10 served
    assert_eq!(h.broker.ledger().get_balance(account).unwrap(), 110);
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 10);
    assert!(h.broker.ledger().list_pending_transactions().unwrap().is_empty());
    assert!(h.broker.outstanding_dead_letters().await.unwrap().is_empty());
}
