//! Configuration management with YAML support and environment overrides

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub settlement: SettlementConfig,

    #[serde(default)]
    pub lnbits: LnbitsConfig,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,

    /// SQLite busy handler timeout. Zero hands contention straight to the
    /// ledger's own retry loop.
    #[serde(default)]
    pub busy_timeout_ms: u64,
}

/// Write retry discipline for balance and transaction mutations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_write_attempts")]
    pub write_attempts: u32,

    #[serde(default = "default_write_backoff_ms")]
    pub write_backoff_ms: u64,

    #[serde(default = "default_dead_letter_path")]
    pub dead_letter_path: String,
}

/// Settlement loop timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_call_timeout_secs")]
    pub provider_timeout_secs: u64,

    #[serde(default = "default_call_timeout_secs")]
    pub notify_timeout_secs: u64,
}

/// LNbits wallet access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LnbitsConfig {
    #[serde(default)]
    pub domain: Option<String>,

    #[serde(default)]
    pub admin_key: Option<String>,

    #[serde(default = "default_lnbits_timeout_secs")]
    pub timeout_secs: u64,
}

/// Language model access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_openai_timeout_secs")]
    pub timeout_secs: u64,
}

/// Bot API access used for settlement notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
}

// Default value functions
fn default_database_path() -> String {
    "~/.local/share/satsgate/botdata.db".to_string()
}

fn default_write_attempts() -> u32 {
    5
}

fn default_write_backoff_ms() -> u64 {
    200
}

fn default_dead_letter_path() -> String {
    "~/.local/share/satsgate/dead_letters.jsonl".to_string()
}

fn default_interval_secs() -> u64 {
    60
}

fn default_call_timeout_secs() -> u64 {
    10
}

fn default_lnbits_timeout_secs() -> u64 {
    15
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_timeout_secs() -> u64 {
    60
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout_ms: 0,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            write_attempts: default_write_attempts(),
            write_backoff_ms: default_write_backoff_ms(),
            dead_letter_path: default_dead_letter_path(),
        }
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            provider_timeout_secs: default_call_timeout_secs(),
            notify_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl Default for LnbitsConfig {
    fn default() -> Self {
        Self {
            domain: None,
            admin_key: None,
            timeout_secs: default_lnbits_timeout_secs(),
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: default_openai_base_url(),
            timeout_secs: default_openai_timeout_secs(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: default_telegram_api_base(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file, then apply environment overrides.
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./satsgate.yaml (current directory)
    /// 3. ~/.config/satsgate/satsgate.yaml
    pub fn load(path: &str) -> Result<Self> {
        // A missing .env is normal outside development
        let _ = dotenvy::dotenv();

        let search_paths = vec![
            shellexpand::tilde(path).to_string(),
            "satsgate.yaml".to_string(),
            shellexpand::tilde("~/.config/satsgate/satsgate.yaml").to_string(),
        ];

        let mut config = Config::default();
        for search_path in &search_paths {
            if std::path::Path::new(search_path).exists() {
                let content = std::fs::read_to_string(search_path)?;
                config = serde_yaml::from_str(&content)?;
                break;
            }
        }

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay credentials from the environment. Non-empty values win over YAML.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("TELEGRAM_TOKEN") {
            self.telegram.token = Some(token);
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.openai.api_key = Some(key);
        }
        if let Some(key) = get("LNBITS_ADMIN_KEY") {
            self.lnbits.admin_key = Some(key);
        }
        if let Some(domain) = get("LNBITS_DOMAIN") {
            self.lnbits.domain = Some(domain);
        }
    }

    /// Names of the credentials that are still missing
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = vec![];
        if self.lnbits.domain.is_none() {
            missing.push("LNBITS_DOMAIN");
        }
        if self.lnbits.admin_key.is_none() {
            missing.push("LNBITS_ADMIN_KEY");
        }
        if self.openai.api_key.is_none() {
            missing.push("OPENAI_API_KEY");
        }
        if self.telegram.token.is_none() {
            missing.push("TELEGRAM_TOKEN");
        }
        missing
    }

    /// Get the database path, expanding ~ to home directory
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database.path).to_string())
    }

    /// Get the dead-letter log path, expanding ~ to home directory
    pub fn dead_letter_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.ledger.dead_letter_path).to_string())
    }

    pub fn settlement_interval(&self) -> Duration {
        Duration::from_secs(self.settlement.interval_secs)
    }
}
