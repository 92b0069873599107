//! Settle command implementation: one settlement cycle, then exit

use anyhow::Result;

use crate::broker::Broker;

pub async fn run(broker: &Broker) -> Result<()> {
    let report = broker.settlement().run_cycle().await?;

    println!("Scanned:          {}", report.scanned);
    println!("Settled:          {}", report.settled);
    println!("Unpaid:           {}", report.unpaid);
    println!("Check failures:   {}", report.check_failures);
    println!("Deferred:         {}", report.deferred);
    println!("Already settled:  {}", report.already_settled);
    println!("Notify failures:  {}", report.notify_failures);
    println!("Replayed:         {}", report.replayed);
    Ok(())
}
