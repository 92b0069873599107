//! Subcommand implementations. Each prints to stdout; logs go to stderr.

pub mod account;
pub mod ask;
pub mod buy;
pub mod ledger;
pub mod serve;
pub mod settle;

use anyhow::{Context, Result};
use std::path::Path;

use crate::purchase::InvoiceOffer;

/// Print an invoice offer and optionally write its QR image to `qr_out`
fn print_offer(offer: &InvoiceOffer, qr_out: Option<&Path>) -> Result<()> {
    println!(
        "Please pay the following invoice to purchase {} {} ({} sats):",
        offer.tier.queries(),
        if offer.tier.queries() == 1 { "query" } else { "queries" },
        offer.tier.price_sats()
    );
    println!("{}", offer.payment_request);
    println!();
    println!("Note: After payment, it may take up to 2 minutes for credit to be granted.");

    match (qr_out, &offer.qr_png) {
        (Some(path), Some(png)) => {
            std::fs::write(path, png)
                .with_context(|| format!("writing QR code to {}", path.display()))?;
            println!("QR code written to {}", path.display());
        }
        (Some(_), None) => println!("QR code unavailable for this invoice."),
        (None, _) => {}
    }
    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() > max {
        let cut: String = line.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}
