// Deposits are receipts for confirmed incoming payments. They are keyed by
// transaction id, which is what makes recording them idempotent across poll
// ticks and replicas.

use std::time::Duration;

use bson::{doc, DateTime};
use mongodb::error::{Error, ErrorKind};
use mongodb::options::InsertManyOptions;
use serde::{Deserialize, Serialize};

use crate::store::{Store, DUPLICATE_KEY_ERROR_CODE};
use crate::types::{TransactionId, UnlockHash};

/// A single confirmed transaction towards one watched address. Serves as a
/// receipt for an incoming payment and as a reference for which transactions
/// the user has already been credited for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    #[serde(rename = "_id")]
    pub txn_id: TransactionId,

    #[serde(rename = "address_id")]
    pub address: UnlockHash,

    /// Stringified hastings amount. Siacoin values exceed 64-bit integers,
    /// so the exact decimal string is stored instead.
    pub value: String,

    pub credited: bool,

    #[serde(rename = "credited_at")]
    pub credited_at: DateTime,
}

impl Deposit {
    /// A fresh, uncredited deposit. `credited_at` starts at the epoch so the
    /// dispatcher's lease filter picks it up right away.
    pub fn new(txn_id: TransactionId, address: UnlockHash, value: String) -> Self {
        Self {
            txn_id,
            address,
            value,
            credited: false,
            credited_at: DateTime::from_millis(0),
        }
    }
}

impl Store {
    /// Inserts deposits while ignoring the ones that are in the collection
    /// already. Returns the number of documents actually inserted. Any write
    /// error other than a duplicate key is reported.
    pub async fn insert_deposits(&self, deposits: &[Deposit]) -> Result<usize, Error> {
        if deposits.is_empty() {
            return Ok(0);
        }
        let opts = InsertManyOptions::builder().ordered(false).build();
        match self.deposits().insert_many(deposits, opts).await {
            Ok(res) => Ok(res.inserted_ids.len()),
            Err(err) => match err.kind.as_ref() {
                ErrorKind::BulkWrite(failure) => {
                    let write_errors = failure.write_errors.clone().unwrap_or_default();
                    if write_errors
                        .iter()
                        .all(|e| e.code == DUPLICATE_KEY_ERROR_CODE)
                    {
                        Ok(deposits.len() - write_errors.len())
                    } else {
                        Err(err)
                    }
                }
                _ => Err(err),
            },
        }
    }

    /// Atomically claims one deposit that hasn't been credited yet. Bumping
    /// `credited_at` acts as a lease: a dispatcher on another replica that
    /// claimed the row within the last `lease` period won't hand it out
    /// again.
    pub async fn claim_uncredited_deposit(
        &self,
        lease: Duration,
    ) -> Result<Option<Deposit>, Error> {
        let now = DateTime::now();
        let cutoff = DateTime::from_millis(now.timestamp_millis() - lease.as_millis() as i64);
        self.deposits()
            .find_one_and_update(
                doc! {
                    "credited": false,
                    "credited_at": { "$lt": cutoff },
                },
                doc! { "$set": { "credited_at": now } },
                None,
            )
            .await
    }

    /// Marks a deposit as credited. Once set, the flag never reverts.
    pub async fn mark_deposit_credited(&self, txn_id: &TransactionId) -> Result<(), Error> {
        self.deposits()
            .update_one(
                doc! { "_id": txn_id },
                doc! { "$set": { "credited": true } },
                None,
            )
            .await?;
        Ok(())
    }
}
