//! Serve command: recovery pass, then the settlement loop until Ctrl-C

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::broker::Broker;
use crate::Config;

pub async fn run(broker: &Broker, config: &Config) -> Result<()> {
    let missing = config.missing_credentials();
    if !missing.is_empty() {
        warn!("missing credentials: {}", missing.join(", "));
    }

    info!(
        database = %broker.ledger().path().display(),
        dead_letters = %broker.dead_letter_path().display(),
        "satsgate starting"
    );

    let settlement = tokio::spawn(broker.settlement().start());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    // Every settle step is a single SQLite transaction, so there is
    // nothing to flush mid-cycle
    settlement.abort();
    info!("satsgate stopped");
    Ok(())
}
