//! Buy command implementation

use anyhow::Result;
use std::path::Path;
use tracing::error;

use crate::broker::Broker;
use crate::catalog::Tier;
use crate::purchase::PurchaseError;
use crate::store::AccountId;

pub async fn run(broker: &Broker, account: AccountId, tier: Tier, qr_out: Option<&Path>) -> Result<()> {
    match broker.handle_purchase_request(account, tier).await {
        Ok(offer) => super::print_offer(&offer, qr_out),
        Err(PurchaseError::Invoice(e)) => {
            error!(%account, "purchase aborted: {:#}", e);
            println!("Sorry, the purchase could not be started. Please try again later.");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
