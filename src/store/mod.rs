// Typed gateway to the shared MongoDB database. All persistent state of the
// service lives here; the other components only hold a `Store` handle.
//
// The connection uses majority read/write concern so that change-stream
// consumers on other replicas observe committed effects, and the nearest read
// preference for health checks.

use bson::{doc, Document};
use mongodb::error::{Error, ErrorKind, WriteFailure};
use mongodb::options::{
    Acknowledgment, ClientOptions, Credential, ReadConcern, ReadPreference, SelectionCriteria,
    WriteConcern,
};
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::debug;

pub mod addresses;
pub mod deposits;
pub mod lock;
pub mod rate;

pub use addresses::{AddressEvent, WatchedAddress};
pub use deposits::Deposit;
pub use lock::LockError;
pub use rate::RateError;

use crate::store::lock::LockRecord;
use crate::store::rate::ConversionRate;

/// Name of the database all collections live in.
pub const DB_NAME: &str = "siacoin-promoter";

const COL_CONFIG: &str = "config";
const COL_LOCKS: &str = "locks";
const COL_WATCHED_ADDRESSES: &str = "watched_addresses";
const COL_TRANSACTIONS: &str = "transactions";

/// The server-side error code for inserting a document whose `_id` already
/// exists. Both insert paths rely on it for idempotency.
const DUPLICATE_KEY_ERROR_CODE: i32 = 11000;

#[derive(Clone)]
pub struct Store {
    client: Client,
    db: Database,
}

impl Store {
    /// Connects to the database and prepares all indexes. The returned store
    /// is cheap to clone; clones share the underlying connection pool.
    pub async fn connect(
        uri: &str,
        username: &str,
        password: &str,
        db_name: &str,
    ) -> Result<Self, Error> {
        let mut opts = ClientOptions::parse(uri).await?;
        opts.credential = Some(
            Credential::builder()
                .username(username.to_string())
                .password(password.to_string())
                .build(),
        );
        opts.read_concern = Some(ReadConcern::majority());
        opts.selection_criteria = Some(SelectionCriteria::ReadPreference(ReadPreference::Nearest {
            options: Default::default(),
        }));
        opts.write_concern = Some(WriteConcern::builder().w(Acknowledgment::Majority).build());

        let client = Client::with_options(opts)?;
        let store = Self {
            db: client.database(db_name),
            client,
        };
        store.create_indexes().await?;
        debug!(db = db_name, "connected to database");
        Ok(store)
    }

    /// Uses the nearest read preference to determine whether the database
    /// connection is healthy at the moment.
    pub async fn ping(&self) -> Result<(), Error> {
        self.db
            .run_command(
                doc! { "ping": 1 },
                SelectionCriteria::ReadPreference(ReadPreference::Nearest {
                    options: Default::default(),
                }),
            )
            .await?;
        Ok(())
    }

    /// Drops the whole database. Only meant for wiping state between tests.
    pub async fn drop_database(&self) -> Result<(), Error> {
        self.db.drop(None).await
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn watched_addresses(&self) -> Collection<WatchedAddress> {
        self.db.collection(COL_WATCHED_ADDRESSES)
    }

    pub(crate) fn deposits(&self) -> Collection<Deposit> {
        self.db.collection(COL_TRANSACTIONS)
    }

    pub(crate) fn locks(&self) -> Collection<LockRecord> {
        self.db.collection(COL_LOCKS)
    }

    pub(crate) fn config(&self) -> Collection<ConversionRate> {
        self.db.collection(COL_CONFIG)
    }

    /// Creates the indexes both collections are queried through. Index
    /// creation is idempotent, so this runs on every startup.
    async fn create_indexes(&self) -> Result<(), Error> {
        let mut address_indexes = ["primary", "server", "user_id"]
            .into_iter()
            .map(index_on)
            .collect::<Vec<_>>();
        // At most one primary row per user. Racing assignments trip over
        // this index instead of leaving a second primary behind.
        address_indexes.push(
            IndexModel::builder()
                .keys(doc! { "user_id": 1, "primary": 1 })
                .options(
                    mongodb::options::IndexOptions::builder()
                        .name("user_id_primary_unique".to_string())
                        .unique(true)
                        .partial_filter_expression(doc! { "primary": true })
                        .build(),
                )
                .build(),
        );
        self.watched_addresses()
            .create_indexes(address_indexes, None)
            .await?;

        let deposit_indexes = ["address_id", "credited", "credited_at"]
            .into_iter()
            .map(index_on)
            .collect::<Vec<_>>();
        self.deposits().create_indexes(deposit_indexes, None).await?;
        Ok(())
    }
}

fn index_on(field: &str) -> IndexModel {
    let mut keys = Document::new();
    keys.insert(field, 1);
    IndexModel::builder()
        .keys(keys)
        .options(
            mongodb::options::IndexOptions::builder()
                .name(field.to_string())
                .build(),
        )
        .build()
}

/// Returns whether the error is a duplicate-key error. Inserting an already
/// known watched address or deposit is the idempotency mechanism, not a
/// failure.
pub(crate) fn is_duplicate_key(err: &Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_err)) => {
            write_err.code == DUPLICATE_KEY_ERROR_CODE
        }
        ErrorKind::Command(cmd_err) => cmd_err.code == DUPLICATE_KEY_ERROR_CODE,
        ErrorKind::BulkWrite(failure) => failure
            .write_errors
            .as_ref()
            .map_or(false, |errs| {
                !errs.is_empty() && errs.iter().all(|e| e.code == DUPLICATE_KEY_ERROR_CODE)
            }),
        _ => false,
    }
}
