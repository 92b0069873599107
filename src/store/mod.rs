//! Ledger storage with SQLite
//!
//! Balances, invoice lifecycles and the per-account logs live in a single
//! SQLite file. SQLite admits one writer at a time, so every mutation goes
//! through `Ledger::write`: an in-process lock serializes our own writers and
//! a bounded retry loop absorbs `SQLITE_BUSY` from anyone else holding the file.
//! Connections are opened per operation and never shared between tasks.
//!
//! Writes run on the blocking pool, so a non-zero `busy_timeout` waits there
//! rather than on a runtime worker. Reads stay inline: WAL readers never wait
//! on the writer.

mod schema;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, ErrorCode, ToSql, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::deadletter::QueuedAdjustment;

pub use schema::SCHEMA;

/// Ledger error types.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{operation} failed after {attempts} attempts: storage busy")]
    FailedAfterRetries {
        operation: &'static str,
        attempts: u32,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

// ============================================
// DOMAIN TYPES
// ============================================

/// Chat identity owning a balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub i64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0.to_string())
    }
}

impl FromStr for AccountId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(AccountId)
    }
}

impl ToSql for AccountId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for AccountId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_i64().map(AccountId)
    }
}

/// Invoice lifecycle state. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown transaction status '{0}'")]
pub struct UnknownStatus(String);

impl FromStr for TransactionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl ToSql for TransactionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TransactionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Fields of a new pending transaction
#[derive(Debug, Clone)]
pub struct NewTransaction<'a> {
    pub account: AccountId,
    pub invoice_id: &'a str,
    pub payment_hash: &'a str,
    pub amount_sats: i64,
    pub queries: i64,
}

/// Result of applying a paid invoice to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Marked completed and credited in the same SQLite transaction
    Applied { balance: i64 },
    /// Another writer completed it first; nothing was credited
    AlreadySettled,
}

/// Bounded retry for writes that hit a busy database
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_millis(200),
        }
    }
}

// ============================================
// LEDGER
// ============================================

pub struct Ledger {
    path: PathBuf,
    busy_timeout: Duration,
    retry: RetryPolicy,
    write_lock: Mutex<()>,
}

impl Ledger {
    pub fn open(path: &Path, busy_timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        // WAL lets readers proceed while the single writer holds the lock
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            path: path.to_path_buf(),
            busy_timeout,
            retry,
            write_lock: Mutex::new(()),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::open(
            &config.database_path(),
            Duration::from_millis(config.database.busy_timeout_ms),
            RetryPolicy {
                attempts: config.ledger.write_attempts,
                backoff: Duration::from_millis(config.ledger.write_backoff_ms),
            },
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        open_connection(&self.path, self.busy_timeout)
    }

    /// Run one logical mutation under the write lock, retrying while the
    /// database reports busy. The lock is released on every exit path when
    /// the guard drops.
    async fn write<T, F>(&self, operation: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _guard = self.write_lock.lock().await;
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let path = self.path.clone();
            let busy_timeout = self.busy_timeout;
            // The closure travels to the blocking pool and back for the next attempt
            let (returned, result) = tokio::task::spawn_blocking(move || {
                let result =
                    open_connection(&path, busy_timeout).and_then(|mut conn| op(&mut conn));
                (op, result)
            })
            .await?;
            op = returned;

            match result {
                Ok(value) => return Ok(value),
                Err(e) if is_busy(&e) => {
                    if attempt >= attempts {
                        error!(operation, attempts = attempt, "storage busy, giving up");
                        return Err(LedgerError::FailedAfterRetries {
                            operation,
                            attempts: attempt,
                        });
                    }
                    warn!(
                        operation,
                        attempt,
                        "storage busy, retrying in {:?}",
                        self.retry.backoff
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // ============================================
    // BALANCES
    // ============================================

    /// Current balance, 0 for an account that never transacted
    pub fn get_balance(&self, account: AccountId) -> Result<i64> {
        let conn = self.connect()?;
        let result = conn.query_row(
            "SELECT balance FROM users WHERE telegram_id = ?",
            params![account],
            |row| row.get(0),
        );

        match result {
            Ok(balance) => Ok(balance),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Create-or-update the account row and apply `delta`. Returns the new balance.
    pub async fn adjust_balance(&self, account: AccountId, delta: i64) -> Result<i64> {
        let balance = self
            .write("adjust_balance", move |conn| credit(conn, account, delta))
            .await?;
        debug!(%account, delta, balance, "balance adjusted");
        Ok(balance)
    }

    // ============================================
    // TRANSACTIONS
    // ============================================

    /// Insert a pending transaction and return its id
    pub async fn create_transaction(&self, new: NewTransaction<'_>) -> Result<i64> {
        let now = Utc::now();
        let account = new.account;
        let invoice_id = new.invoice_id.to_string();
        let payment_hash = new.payment_hash.to_string();
        let (amount_sats, queries) = (new.amount_sats, new.queries);
        self.write("create_transaction", move |conn| {
            conn.query_row(
                "INSERT INTO transactions
                 (telegram_id, invoice_id, payment_hash, amount, queries, status, timestamp)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 RETURNING id",
                params![
                    account,
                    invoice_id,
                    payment_hash,
                    amount_sats,
                    queries,
                    TransactionStatus::Pending,
                    now,
                ],
                |row| row.get(0),
            )
        })
        .await
    }

    /// One-way pending -> completed transition without a credit.
    /// Returns false if the transaction was not pending.
    pub async fn mark_completed(&self, transaction_id: i64) -> Result<bool> {
        let changed = self
            .write("mark_completed", move |conn| complete(conn, transaction_id))
            .await?;
        Ok(changed)
    }

    /// Mark a paid transaction completed and credit its queries as one unit.
    ///
    /// Both writes share a `BEGIN IMMEDIATE` transaction; if either fails the
    /// row stays pending for the next cycle. The status update only matches
    /// pending rows, so a repeated call never credits twice.
    pub async fn settle(&self, transaction: &TransactionRow) -> Result<Settlement> {
        let id = transaction.id;
        let account = transaction.account;
        let queries = transaction.queries;

        let outcome = self
            .write("settle", move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                if !complete(&tx, id)? {
                    return Ok(Settlement::AlreadySettled);
                }
                let balance = credit(&tx, account, queries)?;
                tx.commit()?;
                Ok(Settlement::Applied { balance })
            })
            .await?;

        if outcome == Settlement::AlreadySettled && self.get_transaction(id)?.is_none() {
            return Err(LedgerError::NotFound(format!("transaction {}", id)));
        }
        Ok(outcome)
    }

    /// Apply a dead-lettered adjustment at most once, across processes.
    ///
    /// The adjustment id is claimed in `applied_adjustments` inside the same
    /// `BEGIN IMMEDIATE` transaction as the balance change. Returns false when
    /// the id was already claimed, in which case nothing changes.
    pub async fn apply_queued(&self, adjustment: &QueuedAdjustment) -> Result<bool> {
        let id = adjustment.id.to_string();
        let account = adjustment.account;
        let delta = adjustment.delta;

        let applied = self
            .write("apply_queued", move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let claimed = tx.execute(
                    "INSERT OR IGNORE INTO applied_adjustments
                     (id, telegram_id, delta, applied_at) VALUES (?, ?, ?, ?)",
                    params![id, account, delta, Utc::now()],
                )?;
                if claimed == 0 {
                    return Ok(false);
                }
                credit(&tx, account, delta)?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !applied {
            debug!(id = %adjustment.id, "queued adjustment already applied");
        }
        Ok(applied)
    }

    /// Snapshot of every pending transaction
    pub fn list_pending_transactions(&self) -> Result<Vec<TransactionRow>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE status = ? ORDER BY id",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![TransactionStatus::Pending], map_transaction)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn get_transaction(&self, transaction_id: i64) -> Result<Option<TransactionRow>> {
        let conn = self.connect()?;
        let result = conn.query_row(
            &format!("{} WHERE id = ?", TRANSACTION_COLUMNS),
            params![transaction_id],
            map_transaction,
        );

        match result {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Most recent transactions for an account, newest first
    pub fn recent_transactions(
        &self,
        account: AccountId,
        limit: usize,
    ) -> Result<Vec<TransactionRow>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE telegram_id = ? ORDER BY id DESC LIMIT ?",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![account, limit as i64], map_transaction)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    // ============================================
    // LOGS
    // ============================================

    pub async fn log_history(&self, account: AccountId, query: &str, response: &str) -> Result<()> {
        let now = Utc::now();
        let query = query.to_string();
        let response = response.to_string();
        self.write("log_history", move |conn| {
            conn.execute(
                "INSERT INTO history (telegram_id, query, response, timestamp) VALUES (?, ?, ?, ?)",
                params![account, query, response, now],
            )
        })
        .await?;
        Ok(())
    }

    pub async fn save_favorite(&self, account: AccountId, content: &str) -> Result<()> {
        self.append_log("save_favorite", LogTable::Favorites, account, content)
            .await
    }

    pub async fn share_topic(&self, account: AccountId, content: &str) -> Result<()> {
        self.append_log("share_topic", LogTable::SharedTopics, account, content)
            .await
    }

    async fn append_log(
        &self,
        operation: &'static str,
        table: LogTable,
        account: AccountId,
        content: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO {} (telegram_id, content, timestamp) VALUES (?, ?, ?)",
            table.name()
        );
        let content = content.to_string();
        self.write(operation, move |conn| {
            conn.execute(&sql, params![account, content, now])
        })
        .await?;
        Ok(())
    }

    /// Last `limit` history entries, newest first
    pub fn history_tail(&self, account: AccountId, limit: usize) -> Result<Vec<HistoryRow>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT query, response, timestamp FROM history
             WHERE telegram_id = ? ORDER BY id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![account, limit as i64], |row| {
            Ok(HistoryRow {
                query: row.get(0)?,
                response: row.get(1)?,
                timestamp: row.get(2)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn favorites_tail(&self, account: AccountId, limit: usize) -> Result<Vec<LogRow>> {
        self.log_tail(LogTable::Favorites, account, limit)
    }

    pub fn shared_tail(&self, account: AccountId, limit: usize) -> Result<Vec<LogRow>> {
        self.log_tail(LogTable::SharedTopics, account, limit)
    }

    fn log_tail(&self, table: LogTable, account: AccountId, limit: usize) -> Result<Vec<LogRow>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT content, timestamp FROM {} WHERE telegram_id = ? ORDER BY id DESC LIMIT ?",
            table.name()
        ))?;
        let rows = stmt.query_map(params![account, limit as i64], |row| {
            Ok(LogRow {
                content: row.get(0)?,
                timestamp: row.get(1)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    // ============================================
    // QUERIES
    // ============================================

    pub fn stats(&self, account: AccountId) -> Result<AccountStats> {
        let conn = self.connect()?;
        let queries_served: i64 = conn.query_row(
            "SELECT COUNT(*) FROM history WHERE telegram_id = ?",
            params![account],
            |row| row.get(0),
        )?;
        let (completed_purchases, sats_settled, pending_purchases) = conn.query_row(
            "SELECT
                 COALESCE(SUM(status = 'completed'), 0),
                 COALESCE(SUM(CASE WHEN status = 'completed' THEN amount ELSE 0 END), 0),
                 COALESCE(SUM(status = 'pending'), 0)
             FROM transactions WHERE telegram_id = ?",
            params![account],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(AccountStats {
            queries_served,
            completed_purchases,
            sats_settled,
            pending_purchases,
        })
    }
}

const TRANSACTION_COLUMNS: &str = "SELECT id, telegram_id, invoice_id, payment_hash, amount, \
     queries, status, timestamp, completed_at FROM transactions";

fn map_transaction(row: &rusqlite::Row) -> rusqlite::Result<TransactionRow> {
    Ok(TransactionRow {
        id: row.get(0)?,
        account: row.get(1)?,
        invoice_id: row.get(2)?,
        payment_hash: row.get(3)?,
        amount_sats: row.get(4)?,
        queries: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

fn open_connection(path: &Path, busy_timeout: Duration) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

fn credit(conn: &Connection, account: AccountId, delta: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "INSERT INTO users (telegram_id, balance) VALUES (?1, ?2)
         ON CONFLICT(telegram_id) DO UPDATE SET balance = balance + excluded.balance
         RETURNING balance",
        params![account, delta],
        |row| row.get(0),
    )
}

fn complete(conn: &Connection, transaction_id: i64) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE transactions SET status = ?1, completed_at = ?2
         WHERE id = ?3 AND status = ?4",
        params![
            TransactionStatus::Completed,
            Utc::now(),
            transaction_id,
            TransactionStatus::Pending,
        ],
    )?;
    Ok(changed == 1)
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

#[derive(Debug, Clone, Copy)]
enum LogTable {
    Favorites,
    SharedTopics,
}

impl LogTable {
    fn name(&self) -> &'static str {
        match self {
            LogTable::Favorites => "favorites",
            LogTable::SharedTopics => "shared_topics",
        }
    }
}

// ============================================
// ROW TYPES
// ============================================

#[derive(Debug, Clone, Serialize)]
pub struct TransactionRow {
    pub id: i64,
    pub account: AccountId,
    pub invoice_id: String,
    pub payment_hash: String,
    pub amount_sats: i64,
    pub queries: i64,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryRow {
    pub query: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogRow {
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccountStats {
    pub queries_served: i64,
    pub completed_purchases: i64,
    pub sats_settled: i64,
    pub pending_purchases: i64,
}
