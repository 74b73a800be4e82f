// Periodically polls skyd for confirmed transactions towards used addresses
// and records them as deposits. Re-observing a transaction on a later tick
// or on another replica is harmless since the insert dedupes on txn id.

use std::str::FromStr;
use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::Zero;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::promoter::Promoter;
use crate::skyd::{ProcessedTransaction, WalletClient};
use crate::store::{Deposit, Store};
use crate::types::UnlockHash;

/// Runs the deposit poller until the token is cancelled.
pub async fn run(promoter: Arc<Promoter>, cancel: CancellationToken) {
    let period = promoter.profile().txn_poll_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        poll_once(promoter.store(), promoter.skyd().as_ref()).await;
    }
}

/// A single poll pass over all used addresses. A skyd or database failure
/// aborts the rest of the pass; the next tick retries from scratch.
pub async fn poll_once(store: &Store, skyd: &dyn WalletClient) {
    info!("polling transactions from skyd");

    let used = match store.used_addresses().await {
        Ok(addrs) => addrs,
        Err(err) => {
            error!(error = %err, "failed to fetch used addresses");
            return;
        }
    };

    let mut addresses_polled = 0;
    let mut deposits_inserted = 0;
    for wa in used {
        let txns = match skyd.transactions_by_address(&wa.address).await {
            Ok(txns) => txns,
            Err(err) => {
                // skyd is offline, wait for the next interval.
                error!(error = %err, "failed to fetch txns from skyd");
                break;
            }
        };
        let deposits = deposits_from_transactions(&wa.address, &txns);
        match store.insert_deposits(&deposits).await {
            Ok(n) => deposits_inserted += n,
            Err(err) => {
                // The db is malfunctioning, wait for the next interval.
                error!(error = %err, "failed to insert deposits into db");
                break;
            }
        }
        addresses_polled += 1;
    }
    info!(
        deposits_inserted,
        addresses_polled, "finished polling transactions"
    );
}

/// Reduces skyd's transaction list for one address to deposits: per
/// transaction, the summed value of the outputs paying that address.
/// Transactions that don't pay the address are dropped.
pub fn deposits_from_transactions(
    address: &UnlockHash,
    txns: &[ProcessedTransaction],
) -> Vec<Deposit> {
    txns.iter()
        .filter_map(|txn| {
            let mut sum = BigUint::zero();
            for output in &txn.outputs {
                if &output.related_address != address {
                    continue;
                }
                match BigUint::from_str(&output.value) {
                    Ok(value) => sum += value,
                    Err(_) => {
                        warn!(
                            txn = %txn.id,
                            value = %output.value,
                            "skyd reported an unparseable output value"
                        );
                        return None;
                    }
                }
            }
            if sum.is_zero() {
                None
            } else {
                Some(Deposit::new(txn.id, *address, sum.to_string()))
            }
        })
        .collect()
}
