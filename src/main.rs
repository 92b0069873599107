use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use satsgate::catalog::Tier;
use satsgate::cli::{account, ask, buy, ledger, serve, settle};
use satsgate::config::Config;
use satsgate::store::AccountId;
use satsgate::Broker;

#[derive(Parser)]
#[command(name = "satsgate")]
#[command(about = "Pay-per-query language model access settled over Lightning")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "satsgate.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the settlement loop until interrupted
    Serve,

    /// Run a single settlement cycle
    Settle,

    /// Ask a question on behalf of an account
    Ask {
        /// Account (chat) id
        account: AccountId,

        /// Question text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,

        /// Write the top-up QR code here if one is issued
        #[arg(long)]
        qr_out: Option<PathBuf>,
    },

    /// Buy a bundle of queries (1, 10 or 100)
    Buy {
        /// Account (chat) id
        account: AccountId,

        /// Tier: 1 (50 sats), 10 (450 sats) or 100 (3200 sats)
        tier: Tier,

        /// Write the invoice QR code here
        #[arg(long)]
        qr_out: Option<PathBuf>,
    },

    /// Show the remaining query balance
    Balance {
        /// Account (chat) id
        account: AccountId,
    },

    /// Show balance, recent activity and payment history
    Summary {
        /// Account (chat) id
        account: AccountId,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Save the latest answer to favorites
    Save {
        /// Account (chat) id
        account: AccountId,
    },

    /// Share a topic
    Share {
        /// Account (chat) id
        account: AccountId,

        /// Topic text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// List pending transactions
    Pending,

    /// List balance adjustments waiting in the dead-letter queue
    DeadLetters,

    /// Replay the dead-letter queue now
    Replay,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("satsgate=info")),
        )
        .init();

    let cli = Cli::parse();

    // Load config
    let config = Config::load(&cli.config)?;

    // Initialize ledger and collaborators
    let broker = Broker::from_config(&config)?;

    match cli.command {
        Commands::Serve => {
            serve::run(&broker, &config).await?;
        }
        Commands::Settle => {
            settle::run(&broker).await?;
        }
        Commands::Ask {
            account,
            text,
            qr_out,
        } => {
            ask::run(&broker, account, &text.join(" "), qr_out.as_deref()).await?;
        }
        Commands::Buy {
            account,
            tier,
            qr_out,
        } => {
            buy::run(&broker, account, tier, qr_out.as_deref()).await?;
        }
        Commands::Balance { account } => {
            account::balance(&broker, account)?;
        }
        Commands::Summary { account, json } => {
            account::summary(&broker, account, json)?;
        }
        Commands::Save { account } => {
            account::save(&broker, account).await?;
        }
        Commands::Share { account, text } => {
            account::share(&broker, account, &text.join(" ")).await?;
        }
        Commands::Pending => {
            ledger::pending(&broker)?;
        }
        Commands::DeadLetters => {
            ledger::dead_letters(&broker).await?;
        }
        Commands::Replay => {
            ledger::replay(&broker).await?;
        }
    }

    Ok(())
}
