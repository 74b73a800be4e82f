// The promoter is the coordination core of the service. It makes sure skyd
// watches all the siacoin addresses it is supposed to, hands out addresses
// to users, records incoming deposits and forwards them to the billing
// service. All persistent state is shared with the other replicas through
// the database.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::billing::BillingClient;
use crate::config::Profile;
use crate::skyd::WalletClient;
use crate::store::{lock, Store};

pub mod assign;
pub mod credit;
pub mod deposits;
pub mod pool;
pub mod watch;

pub use assign::AssignError;

/// Health information about the promoter's two dependencies.
#[derive(Debug, Clone, Copy)]
pub struct Health {
    pub db_alive: bool,
    pub skyd_alive: bool,
}

pub struct Promoter {
    store: Store,
    skyd: Arc<dyn WalletClient>,
    billing: Arc<dyn BillingClient>,
    server_domain: String,
    profile: Profile,
    cancel: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
}

impl Promoter {
    /// Creates the promoter and starts its background tasks: the address
    /// watcher, the lock purger, the deposit poller and the credit
    /// dispatcher. Outside of the testing profile an initial pool-fill cycle
    /// runs as well, so the first user ever doesn't hit an empty pool.
    pub fn new(
        store: Store,
        skyd: Arc<dyn WalletClient>,
        billing: Arc<dyn BillingClient>,
        server_domain: String,
        profile: Profile,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let promoter = Self::new_without_tasks(store, skyd, billing, server_domain, profile, cancel);
        promoter.start_background_tasks();
        if profile != Profile::Testing {
            promoter.spawn_regenerate_pool();
        }
        promoter
    }

    /// Creates the promoter without launching any background tasks. Tests
    /// drive the individual cycles by hand.
    pub fn new_without_tasks(
        store: Store,
        skyd: Arc<dyn WalletClient>,
        billing: Arc<dyn BillingClient>,
        server_domain: String,
        profile: Profile,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            skyd,
            billing,
            server_domain,
            profile,
            cancel,
            tasks: Mutex::new(JoinSet::new()),
        })
    }

    fn start_background_tasks(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.spawn(watch::run(self.clone(), self.cancel.clone()));
        tasks.spawn(lock::run_lock_purger(self.store.clone(), self.cancel.clone()));
        tasks.spawn(deposits::run(self.clone(), self.cancel.clone()));
        tasks.spawn(credit::run(self.clone(), self.cancel.clone()));
    }

    /// Kicks off an address pool regeneration cycle in the background.
    pub fn spawn_regenerate_pool(&self) {
        let store = self.store.clone();
        let skyd = self.skyd.clone();
        let profile = self.profile;
        let domain = self.server_domain.clone();
        self.tasks.lock().unwrap().spawn(async move {
            pool::maybe_regenerate(&store, skyd.as_ref(), profile, &domain).await;
        });
    }

    /// Returns health information about the promoter's database and skyd
    /// connections.
    pub async fn health(&self) -> Health {
        Health {
            db_alive: self.store.ping().await.is_ok(),
            skyd_alive: self.skyd.ready().await.is_ok(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn skyd(&self) -> &Arc<dyn WalletClient> {
        &self.skyd
    }

    pub(crate) fn billing(&self) -> &Arc<dyn BillingClient> {
        &self.billing
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn server_domain(&self) -> &str {
        &self.server_domain
    }

    /// Cancels the background tasks and waits for them to drain. Tasks still
    /// running after the timeout are aborted.
    pub async fn close(&self, drain_timeout: Duration) {
        self.cancel.cancel();
        let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        let drained = tokio::time::timeout(drain_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("background tasks didn't drain in time, aborting them");
            tasks.abort_all();
        }
        info!("promoter shut down");
    }
}
