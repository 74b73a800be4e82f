// TTL-leased exclusive locks over the locks collection. The lock name is the
// document `_id`, so the unique index gives mutual exclusion for free. A
// periodic purger removes records whose lease ran out, and acquiring a lock
// takes over an expired record in the same atomic operation.

use std::time::Duration;

use bson::{doc, DateTime, Document};
use mongodb::error::Error;
use mongodb::options::FindOneAndReplaceOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::store::{is_duplicate_key, Store};

/// How long a lock lease lasts. Generous enough to cover the slowest
/// plausible pool generation.
pub const LOCK_TTL: Duration = Duration::from_secs(300);

/// How often expired lock records are purged from the collection.
pub const LOCK_PURGE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, ThisError)]
pub enum LockError {
    #[error("resource is already locked")]
    AlreadyLocked,

    #[error(transparent)]
    Db(#[from] Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    #[serde(rename = "_id")]
    pub resource: String,
    pub owner: String,
    pub host: String,
    pub acquired_at: DateTime,
    pub ttl_seconds: i64,
}

/// Filter matching lock records whose lease has run out.
fn expired_filter(now: DateTime) -> Document {
    doc! {
        "$expr": {
            "$lt": [
                { "$add": ["$acquired_at", { "$multiply": ["$ttl_seconds", 1000] }] },
                now,
            ],
        },
    }
}

impl Store {
    /// Acquires the exclusive lock on `resource`. Fails with
    /// [`LockError::AlreadyLocked`] while another holder's lease is alive; an
    /// expired record is taken over atomically.
    pub async fn xlock(
        &self,
        resource: &str,
        owner: &str,
        host: &str,
        ttl: Duration,
    ) -> Result<(), LockError> {
        let now = DateTime::now();
        let record = LockRecord {
            resource: resource.to_string(),
            owner: owner.to_string(),
            host: host.to_string(),
            acquired_at: now,
            ttl_seconds: ttl.as_secs() as i64,
        };

        // Either replace an expired record for this resource or upsert a new
        // one. A live record makes the upsert collide with the `_id` index,
        // which surfaces as a duplicate-key error.
        let mut filter = expired_filter(now);
        filter.insert("_id", resource);
        let opts = FindOneAndReplaceOptions::builder().upsert(true).build();
        match self.locks().find_one_and_replace(filter, &record, opts).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => Err(LockError::AlreadyLocked),
            Err(err) => Err(err.into()),
        }
    }

    /// Releases the lock on `resource`. Unlocking a lock that is not held is
    /// a no-op.
    pub async fn unlock(&self, resource: &str) -> Result<(), Error> {
        self.locks().delete_one(doc! { "_id": resource }, None).await?;
        Ok(())
    }

    /// Deletes all lock records whose lease has expired. Returns the number
    /// of purged records.
    pub async fn purge_locks(&self) -> Result<u64, Error> {
        let res = self
            .locks()
            .delete_many(expired_filter(DateTime::now()), None)
            .await?;
        Ok(res.deleted_count)
    }
}

/// Periodically scans the db for prunable locks until the token is
/// cancelled.
pub async fn run_lock_purger(store: Store, cancel: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + LOCK_PURGE_INTERVAL, LOCK_PURGE_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match store.purge_locks().await {
            Ok(purged) if purged > 0 => info!(purged, "purged expired locks"),
            Ok(_) => {}
            Err(err) => error!(error = %err, "purging locks failed"),
        }
    }
}
