//! Ask command implementation

use anyhow::Result;
use std::path::Path;

use crate::broker::Broker;
use crate::gate::{QueryOutcome, INSUFFICIENT_BALANCE};
use crate::store::AccountId;

pub async fn run(broker: &Broker, account: AccountId, text: &str, qr_out: Option<&Path>) -> Result<()> {
    match broker.handle_incoming_query(account, text).await? {
        QueryOutcome::Answered { answer } => {
            println!("{}", answer);
        }
        QueryOutcome::ModelUnavailable { apology } => {
            println!("{}", apology);
        }
        QueryOutcome::TopUpRequired { offer } => {
            println!("{}\n", INSUFFICIENT_BALANCE);
            super::print_offer(&offer, qr_out)?;
        }
        QueryOutcome::TopUpUnavailable => {
            println!("{}", INSUFFICIENT_BALANCE);
            println!("Sorry, we could not generate an invoice right now. Please try again later.");
        }
    }
    Ok(())
}
