pub mod broker;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod deadletter;
pub mod gate;
pub mod provider;
pub mod purchase;
pub mod settlement;
pub mod store;

pub use broker::{AccountSummary, Broker};
pub use catalog::Tier;
pub use config::Config;
pub use gate::QueryOutcome;
pub use provider::{Collaborators, LanguageModel, Notifier, PaymentProvider, QrRenderer};
pub use store::{AccountId, Ledger, LedgerError};
