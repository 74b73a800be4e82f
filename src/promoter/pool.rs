// Keeps the pool of unused addresses between the profile's watermarks.
// Generation is serialized cluster-wide through the named lock, so at most
// one replica talks to its wallet at a time.

use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::Profile;
use crate::skyd::{SkydError, WalletClient};
use crate::store::lock::{LockError, LOCK_TTL};
use crate::store::{Store, WatchedAddress};

/// Name of the lock that serializes pool generation across the cluster.
const LOCK_RESOURCE: &str = "watched-addresses";

/// Owner string recorded in the lock document.
const LOCK_OWNER: &str = "siacoin-promoter";

#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Db(#[from] mongodb::error::Error),

    #[error(transparent)]
    Skyd(#[from] SkydError),
}

/// Checks whether new addresses need to be generated and, if so, tops the
/// pool of unused addresses back up to the max watermark. Errors are logged
/// rather than returned; the next cycle gets another chance, and whatever
/// was inserted before a failure is simply more unused addresses.
pub async fn maybe_regenerate(
    store: &Store,
    skyd: &dyn WalletClient,
    profile: Profile,
    server_domain: &str,
) {
    // Fast check without the lock. Not exact, but it avoids a db write in
    // the common case.
    match should_generate(store, profile).await {
        Ok(false) => return,
        Ok(true) => {}
        Err(err) => {
            error!(error = %err, "failed to check whether the address pool needs regenerating");
            return;
        }
    }

    match store
        .xlock(LOCK_RESOURCE, LOCK_OWNER, server_domain, LOCK_TTL)
        .await
    {
        Ok(()) => {}
        Err(LockError::AlreadyLocked) => {
            debug!("not generating new addresses because the collection is already locked");
            return;
        }
        Err(LockError::Db(err)) => {
            error!(error = %err, "failed to lock the watched-address collection");
            return;
        }
    }

    let res = regenerate_locked(store, skyd, profile, server_domain).await;
    if let Err(err) = store.unlock(LOCK_RESOURCE).await {
        error!(error = %err, "failed to unlock the watched-address collection");
    }
    if let Err(err) = res {
        error!(error = %err, "failed to regenerate the address pool");
    }
}

/// Quick estimate of whether generation is necessary. The capped count stops
/// scanning as soon as the min watermark is reached.
async fn should_generate(store: &Store, profile: Profile) -> Result<bool, mongodb::error::Error> {
    let min = profile.min_unused_addresses();
    let n = store.unused_address_count(Some(min)).await?;
    Ok((n as i64) < min)
}

async fn regenerate_locked(
    store: &Store,
    skyd: &dyn WalletClient,
    profile: Profile,
    server_domain: &str,
) -> Result<(), PoolError> {
    // Exact count now that the lock is held.
    let count = store.unused_address_count(None).await?;
    let to_generate = profile.max_unused_addresses() - count as i64;
    if to_generate <= 0 {
        debug!(to_generate, "not generating new addresses because the pool has enough");
        return Ok(());
    }

    info!(to_generate, "generating new addresses");

    // skyd has no batch endpoint for address creation, so mint one-by-one
    // and insert in bulk.
    let mut new_addresses = Vec::with_capacity(to_generate as usize);
    for _ in 0..to_generate {
        let address = skyd.new_address().await?;
        new_addresses.push(WatchedAddress::new_unused(address, server_domain));
    }
    store.insert_addresses(new_addresses).await?;
    Ok(())
}
