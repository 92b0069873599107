//! SQLite schema definition
//!
//! There are no foreign keys: transactions and log rows reference accounts by
//! their chat identity only, and consistency is kept by the ledger code.

pub const SCHEMA: &str = r#"
-- ============================================
-- BALANCES
-- ============================================

-- One row per account, created lazily on the first balance mutation
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    telegram_id INTEGER NOT NULL UNIQUE,
    balance INTEGER NOT NULL DEFAULT 0     -- queries remaining
);

-- ============================================
-- INVOICES
-- ============================================

-- One row per invoice lifecycle; never deleted
CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    telegram_id INTEGER NOT NULL,
    invoice_id TEXT NOT NULL,
    payment_hash TEXT NOT NULL,
    amount INTEGER NOT NULL,               -- sats
    queries INTEGER NOT NULL CHECK (queries >= 1),
    status TEXT NOT NULL DEFAULT 'pending', -- 'pending' | 'completed'
    timestamp TEXT NOT NULL,               -- RFC 3339, creation time
    completed_at TEXT                      -- RFC 3339, set once on settlement
);

-- ============================================
-- REPLAYED ADJUSTMENTS
-- ============================================

-- Dead-letter ids already applied to a balance; the primary key makes replay idempotent
CREATE TABLE IF NOT EXISTS applied_adjustments (
    id TEXT PRIMARY KEY,                   -- dead-letter UUID
    telegram_id INTEGER NOT NULL,
    delta INTEGER NOT NULL,
    applied_at TEXT NOT NULL
);

-- ============================================
-- APPEND-ONLY LOGS
-- ============================================

CREATE TABLE IF NOT EXISTS history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    telegram_id INTEGER NOT NULL,
    query TEXT NOT NULL,
    response TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS favorites (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    telegram_id INTEGER NOT NULL,
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS shared_topics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    telegram_id INTEGER NOT NULL,
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

-- ============================================
-- INDEXES
-- ============================================

CREATE INDEX IF NOT EXISTS idx_transactions_status ON transactions(status);
CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(telegram_id);
CREATE INDEX IF NOT EXISTS idx_history_account ON history(telegram_id);
CREATE INDEX IF NOT EXISTS idx_favorites_account ON favorites(telegram_id);
CREATE INDEX IF NOT EXISTS idx_shared_account ON shared_topics(telegram_id);
"#;
