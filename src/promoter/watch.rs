// Keeps the local skyd's watched-address set equal to the watched-address
// collection. Every replica runs its own synchronizer: open a change stream,
// reconcile via a full diff, then tail the stream in bounded batches.
//
// Whether an addition carries `unused == true` decides if skyd can skip the
// blockchain rescan. Removals never need one, so they always pass `unused ==
// true` and are applied before additions; a batch therefore causes at most
// one rescan.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::promoter::Promoter;
use crate::skyd::{SkydError, WalletClient};
use crate::store::addresses::{address_event, AddressEvent};
use crate::store::WatchedAddress;
use crate::types::UnlockHash;

/// How long to back off after a failed cycle before reconnecting.
const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Db(#[from] mongodb::error::Error),

    #[error(transparent)]
    Skyd(#[from] SkydError),

    #[error("change stream ended")]
    StreamClosed,
}

/// Runs the synchronizer until the token is cancelled. Any failure restarts
/// the cycle from the top after a short backoff; a full diff on reconnect
/// makes up for whatever events were missed.
pub async fn run(promoter: Arc<Promoter>, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        match sync_cycle(&promoter, &cancel).await {
            Ok(()) => return, // cancelled
            Err(err) => {
                error!(error = %err, "address watcher failed, reconnecting");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep(RETRY_DELAY) => {}
                }
            }
        }
    }
}

async fn sync_cycle(promoter: &Promoter, cancel: &CancellationToken) -> Result<(), WatchError> {
    let store = promoter.store();
    let skyd = promoter.skyd();

    // Open the stream before diffing so no change can slip between the
    // snapshot and the tail.
    let mut stream = store.watch_address_changes().await?;

    // Full reconciliation of skyd against the database.
    let daemon_addrs = skyd.watched_addresses().await?;
    let db_addrs = store.all_addresses().await?;
    let diff = compute_diff(&db_addrs, &daemon_addrs);
    debug!(
        to_add = diff.adds().0.len(),
        to_remove = diff.removes().len(),
        "applying initial address diff"
    );
    apply_batch(skyd.as_ref(), &diff).await?;

    // Tail the stream. Block for one change, then drain without blocking up
    // to the batch limit so a burst of updates becomes few skyd requests.
    let max_batch = promoter.profile().update_max_batch_size();
    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = stream.next() => match next {
                Some(Ok(event)) => event,
                Some(Err(err)) => return Err(err.into()),
                None => return Err(WatchError::StreamClosed),
            },
        };

        let mut batch = Batch::default();
        batch.push(address_event(&first));
        while batch.events() < max_batch {
            match stream.next_if_any().await? {
                Some(event) => batch.push(address_event(&event)),
                None => break,
            }
        }
        apply_batch(skyd.as_ref(), &batch).await?;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NetOp {
    Add { unused: bool },
    Remove,
}

/// A window of change-stream events reduced to its net effect per address.
/// An address inserted and deleted within the same window cancels out to its
/// last operation, so replaying the batch against skyd is a single
/// remove-then-add pair.
#[derive(Debug, Default)]
pub(crate) struct Batch {
    net: HashMap<UnlockHash, NetOp>,
    events: usize,
}

impl Batch {
    pub(crate) fn push(&mut self, event: Option<AddressEvent>) {
        self.events += 1;
        match event {
            Some(AddressEvent::Insert { address, unused }) => {
                self.net.insert(address, NetOp::Add { unused });
            }
            Some(AddressEvent::Delete { address }) => {
                self.net.insert(address, NetOp::Remove);
            }
            // Events that don't change watch-set membership still count
            // towards the window size.
            None => {}
        }
    }

    /// Number of stream events consumed into this batch.
    pub(crate) fn events(&self) -> usize {
        self.events
    }

    /// The addresses to add, and whether all of them are unassigned. A
    /// single assigned address forces a rescan for the whole set since skyd
    /// may have missed historic transactions to it.
    pub(crate) fn adds(&self) -> (Vec<UnlockHash>, bool) {
        let mut addrs = Vec::new();
        let mut unused = true;
        for (addr, op) in &self.net {
            if let NetOp::Add { unused: u } = op {
                addrs.push(*addr);
                unused = unused && *u;
            }
        }
        (addrs, unused)
    }

    pub(crate) fn removes(&self) -> Vec<UnlockHash> {
        self.net
            .iter()
            .filter(|(_, op)| matches!(op, NetOp::Remove))
            .map(|(addr, _)| *addr)
            .collect()
    }
}

/// Diffs the database against the daemon's current watch-set.
pub(crate) fn compute_diff(db_addrs: &[WatchedAddress], daemon_addrs: &[UnlockHash]) -> Batch {
    let daemon: std::collections::HashSet<&UnlockHash> = daemon_addrs.iter().collect();
    let db: std::collections::HashSet<&UnlockHash> =
        db_addrs.iter().map(|wa| &wa.address).collect();

    let mut batch = Batch::default();
    for wa in db_addrs {
        if !daemon.contains(&wa.address) {
            batch.net.insert(
                wa.address,
                NetOp::Add {
                    unused: wa.is_unused(),
                },
            );
        }
    }
    for addr in daemon_addrs {
        if !db.contains(addr) {
            batch.net.insert(*addr, NetOp::Remove);
        }
    }
    batch
}

/// Pushes a batch to skyd: removals first (never a rescan), then additions
/// with the derived rescan flag. At most two requests per batch.
pub(crate) async fn apply_batch(skyd: &dyn WalletClient, batch: &Batch) -> Result<(), SkydError> {
    let removes = batch.removes();
    if !removes.is_empty() {
        skyd.remove_watch(&removes, true).await?;
    }
    let (adds, unused) = batch.adds();
    if !adds.is_empty() {
        skyd.add_watch(&adds, unused).await?;
    }
    Ok(())
}
