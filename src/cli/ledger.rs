//! Operator commands over the ledger and the dead-letter queue

use anyhow::Result;

use crate::broker::Broker;

pub fn pending(broker: &Broker) -> Result<()> {
    let pending = broker.ledger().list_pending_transactions()?;

    if pending.is_empty() {
        println!("No pending transactions.");
        return Ok(());
    }

    println!(
        "{:<8} {:<14} {:<17} {:>8} {:>8} {}",
        "ID", "Account", "Created", "Sats", "Queries", "Payment hash"
    );
    println!("{}", "-".repeat(100));
    for tx in pending {
        println!(
            "{:<8} {:<14} {:<17} {:>8} {:>8} {}",
            tx.id,
            tx.account,
            tx.created_at.format("%Y-%m-%d %H:%M"),
            tx.amount_sats,
            tx.queries,
            tx.payment_hash
        );
    }
    Ok(())
}

pub async fn dead_letters(broker: &Broker) -> Result<()> {
    let outstanding = broker.outstanding_dead_letters().await?;

    if outstanding.is_empty() {
        println!("No outstanding adjustments in {}.", broker.dead_letter_path().display());
        return Ok(());
    }

    println!("{:<38} {:<14} {:>6} {:<20} {}", "ID", "Account", "Delta", "Queued", "Reason");
    println!("{}", "-".repeat(100));
    for adjustment in outstanding {
        println!(
            "{:<38} {:<14} {:>6} {:<20} {}",
            adjustment.id.to_string(),
            adjustment.account,
            adjustment.delta,
            adjustment.queued_at.format("%Y-%m-%d %H:%M:%S"),
            adjustment.reason
        );
    }
    Ok(())
}

pub async fn replay(broker: &Broker) -> Result<()> {
    let replayed = broker.settlement().replay_dead_letters().await;
    let remaining = broker.outstanding_dead_letters().await?.len();
    println!("Replayed {} adjustment(s), {} still outstanding.", replayed, remaining);
    Ok(())
}
