// Queries over the watched-address collection: the cluster-wide address
// pool, per-user assignment and the change stream the watch synchronizer
// tails.

use bson::{doc, Document};
use futures::TryStreamExt;
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType};
use mongodb::change_stream::ChangeStream;
use mongodb::error::Error;
use mongodb::options::{ChangeStreamOptions, CountOptions, FullDocumentType};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::{is_duplicate_key, Store};
use crate::types::UnlockHash;

/// An entry in the watched-address collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedAddress {
    /// The actual address we track. It doubles as the `_id` of the document
    /// since addresses are unique anyway.
    #[serde(rename = "_id")]
    pub address: UnlockHash,

    /// The server that created this address. Used for tracking which
    /// addresses belong to which server and as a result to which seed.
    pub server: String,

    /// The user the address is assigned to. Empty if the address is unused.
    #[serde(rename = "user_id", default)]
    pub user_sub: String,

    /// Whether the address is the user's primary address. If no primary
    /// address can be found for a user, a new one is fetched from the pool
    /// and made primary.
    #[serde(default)]
    pub primary: bool,
}

impl WatchedAddress {
    /// Creates a pool entry that doesn't have a user assigned yet.
    pub fn new_unused(address: UnlockHash, server: &str) -> Self {
        Self {
            address,
            server: server.to_string(),
            user_sub: String::new(),
            primary: false,
        }
    }

    /// Returns whether the address is currently not assigned to a user.
    pub fn is_unused(&self) -> bool {
        self.user_sub.is_empty()
    }
}

/// A change to the watched-address collection, reduced to what the wallet
/// daemon needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressEvent {
    /// The address joined the collection. `unused` mirrors the document's
    /// assignment state and decides whether the daemon must rescan.
    Insert { address: UnlockHash, unused: bool },
    /// The address left the collection.
    Delete { address: UnlockHash },
}

/// Reduces a raw change-stream event to an [`AddressEvent`]. Updates to
/// existing documents (e.g. a pool entry being assigned to a user) don't
/// change watch-set membership and map to `None`, as do administrative
/// events like `drop` and `invalidate`.
pub fn address_event(event: &ChangeStreamEvent<WatchedAddress>) -> Option<AddressEvent> {
    match &event.operation_type {
        OperationType::Insert | OperationType::Replace => {
            let address = match &event.full_document {
                Some(doc) => doc.address,
                None => document_key_address(event)?,
            };
            let unused = event
                .full_document
                .as_ref()
                .map(WatchedAddress::is_unused)
                .unwrap_or(true);
            Some(AddressEvent::Insert { address, unused })
        }
        OperationType::Delete => {
            let address = document_key_address(event)?;
            Some(AddressEvent::Delete { address })
        }
        _ => None,
    }
}

fn document_key_address(event: &ChangeStreamEvent<WatchedAddress>) -> Option<UnlockHash> {
    let key = event.document_key.as_ref()?;
    match key.get_str("_id").map(str::parse) {
        Ok(Ok(address)) => Some(address),
        _ => {
            warn!(?key, "change stream event carries an unparseable document key");
            None
        }
    }
}

/// Filter matching pool entries not assigned to any user. The `$exists`
/// branch matches documents written before the field existed.
fn unused_address_filter() -> Document {
    doc! {
        "$or": [
            { "user_id": { "$exists": false } },
            { "user_id": "" },
        ],
    }
}

impl Store {
    /// Returns the user's current primary address, if any.
    pub async fn primary_address_for_user(
        &self,
        sub: &str,
    ) -> Result<Option<WatchedAddress>, Error> {
        self.watched_addresses()
            .find_one(doc! { "user_id": sub, "primary": true }, None)
            .await
    }

    /// Atomically grabs one unused pool entry and assigns it to the user as
    /// their primary address. Returns `None` when the pool is exhausted.
    pub async fn assign_address(&self, sub: &str) -> Result<Option<WatchedAddress>, Error> {
        self.watched_addresses()
            .find_one_and_update(
                unused_address_filter(),
                doc! { "$set": { "user_id": sub, "primary": true } },
                None,
            )
            .await
    }

    /// Counts unused pool entries. With a limit the count is capped, which
    /// lets the caller cheaply answer "are there at least N left".
    pub async fn unused_address_count(&self, limit: Option<i64>) -> Result<u64, Error> {
        let opts = limit.map(|l| CountOptions::builder().limit(l as u64).build());
        self.watched_addresses()
            .count_documents(unused_address_filter(), opts)
            .await
    }

    /// Inserts freshly minted pool entries.
    pub async fn insert_addresses(&self, addrs: Vec<WatchedAddress>) -> Result<(), Error> {
        self.watched_addresses().insert_many(addrs, None).await?;
        Ok(())
    }

    /// Returns every address in the collection, used and unused alike.
    pub async fn all_addresses(&self) -> Result<Vec<WatchedAddress>, Error> {
        let cursor = self.watched_addresses().find(None, None).await?;
        cursor.try_collect().await
    }

    /// Returns the addresses that are assigned to a user. Only those can
    /// have received deposits worth recording.
    pub async fn used_addresses(&self) -> Result<Vec<WatchedAddress>, Error> {
        let cursor = self
            .watched_addresses()
            .find(doc! { "user_id": { "$exists": true, "$ne": "" } }, None)
            .await?;
        cursor.try_collect().await
    }

    /// Looks up a single watched address.
    pub async fn watched_address(
        &self,
        address: &UnlockHash,
    ) -> Result<Option<WatchedAddress>, Error> {
        self.watched_addresses()
            .find_one(doc! { "_id": address }, None)
            .await
    }

    /// Adds a single address to the collection. Inserting an address that is
    /// already present is not an error.
    pub async fn watch_address(&self, addr: WatchedAddress) -> Result<(), Error> {
        match self.watched_addresses().insert_one(&addr, None).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Removes a single address from the collection. Returns whether an
    /// entry was actually deleted.
    pub async fn unwatch_address(&self, address: &UnlockHash) -> Result<bool, Error> {
        let res = self
            .watched_addresses()
            .delete_one(doc! { "_id": address }, None)
            .await?;
        Ok(res.deleted_count > 0)
    }

    /// Marks the primary address of a user as no longer primary. The next
    /// address request for the user allocates a fresh one from the pool.
    /// `update_many` compensates in case more than one primary slipped in.
    pub async fn set_primary_address_invalid(&self, sub: &str) -> Result<u64, Error> {
        let res = self
            .watched_addresses()
            .update_many(
                doc! { "user_id": sub, "primary": true },
                doc! { "$set": { "primary": false } },
                None,
            )
            .await?;
        Ok(res.matched_count)
    }

    /// Drops the unassigned pool entries minted by the given server and
    /// demotes its assigned ones, in one transaction so both effects commit
    /// together. Returns how many documents each clause touched.
    pub async fn mark_server_dead(&self, server: &str) -> Result<(u64, u64), Error> {
        let mut session = self.client().start_session(None).await?;
        session.start_transaction(None).await?;

        let mut unused_filter = unused_address_filter();
        unused_filter.insert("server", server);

        let res = async {
            let deleted = self
                .watched_addresses()
                .delete_many_with_session(unused_filter, None, &mut session)
                .await?;
            let demoted = self
                .watched_addresses()
                .update_many_with_session(
                    doc! { "server": server, "primary": true },
                    doc! { "$set": { "primary": false } },
                    None,
                    &mut session,
                )
                .await?;
            Ok::<(u64, u64), Error>((deleted.deleted_count, demoted.matched_count))
        }
        .await;

        match res {
            Ok(counts) => {
                session.commit_transaction().await?;
                Ok(counts)
            }
            Err(err) => {
                let _ = session.abort_transaction().await;
                Err(err)
            }
        }
    }

    /// Opens a change stream over the watched-address collection. Insert
    /// events carry the full post-image so consumers can derive the rescan
    /// flag.
    pub async fn watch_address_changes(
        &self,
    ) -> Result<ChangeStream<ChangeStreamEvent<WatchedAddress>>, Error> {
        let opts = ChangeStreamOptions::builder()
            .full_document(Some(FullDocumentType::UpdateLookup))
            .build();
        self.watched_addresses()
            .watch(Vec::<Document>::new(), opts)
            .await
    }
}
