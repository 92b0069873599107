//! Per-account commands: balance, summary, favorites and shared topics

use anyhow::Result;

use super::truncate;
use crate::broker::Broker;
use crate::store::AccountId;

pub fn balance(broker: &Broker, account: AccountId) -> Result<()> {
    let balance = broker.ledger().get_balance(account)?;
    println!("Your remaining query balance: {}", balance);
    Ok(())
}

pub fn summary(broker: &Broker, account: AccountId, json: bool) -> Result<()> {
    let summary = broker.account_summary(account)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("\n{}", "=".repeat(80));
    println!("Account: {} | Balance: {}", summary.account, summary.balance);
    println!(
        "Queries served: {} | Purchases: {} completed, {} pending | Sats settled: {}",
        summary.stats.queries_served,
        summary.stats.completed_purchases,
        summary.stats.pending_purchases,
        summary.stats.sats_settled
    );
    println!("{}", "=".repeat(80));

    println!("\nHistory");
    if summary.history.is_empty() {
        println!("  No history available.");
    }
    for entry in &summary.history {
        println!("  {}: Q: {}", entry.timestamp.format("%Y-%m-%d %H:%M"), truncate(&entry.query, 60));
        println!("  {:>16}  A: {}", "", truncate(&entry.response, 60));
    }

    println!("\nFavorites");
    if summary.favorites.is_empty() {
        println!("  No favorites saved.");
    }
    for entry in &summary.favorites {
        println!("  {}: {}", entry.timestamp.format("%Y-%m-%d %H:%M"), truncate(&entry.content, 60));
    }

    println!("\nShared topics");
    if summary.shared.is_empty() {
        println!("  No shared topics yet.");
    }
    for entry in &summary.shared {
        println!("  {}: {}", entry.timestamp.format("%Y-%m-%d %H:%M"), truncate(&entry.content, 60));
    }

    println!("\nPayments");
    if summary.payments.is_empty() {
        println!("  No payments yet.");
    } else {
        println!("  {:<8} {:<17} {:>8} {:>8} {:<10}", "ID", "Created", "Sats", "Queries", "Status");
        for tx in &summary.payments {
            println!(
                "  {:<8} {:<17} {:>8} {:>8} {:<10}",
                tx.id,
                tx.created_at.format("%Y-%m-%d %H:%M"),
                tx.amount_sats,
                tx.queries,
                tx.status
            );
        }
    }

    Ok(())
}

pub async fn save(broker: &Broker, account: AccountId) -> Result<()> {
    match broker.save_favorite(account).await? {
        Some(content) => println!("Saved to favorites: {}", truncate(&content, 60)),
        None => println!("Nothing to save yet. Ask a question first."),
    }
    Ok(())
}

pub async fn share(broker: &Broker, account: AccountId, content: &str) -> Result<()> {
    broker.share_topic(account, content).await?;
    println!("Topic shared.");
    Ok(())
}
