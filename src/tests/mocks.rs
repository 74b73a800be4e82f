//! In-memory stand-ins for the wallet daemon and the billing service.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::billing::{BillingClient, BillingError};
use crate::skyd::{ProcessedTransaction, SkydError, WalletClient};
use crate::types::{TransactionId, UnlockHash};

pub fn random_address() -> UnlockHash {
    UnlockHash::from(rand::random::<[u8; 32]>())
}

pub fn random_txn_id() -> TransactionId {
    TransactionId::from(rand::random::<[u8; 32]>())
}

/// A call recorded by the mock wallet. Addresses are sorted so tests can
/// compare against expected sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletCall {
    Add {
        addrs: Vec<UnlockHash>,
        unused: bool,
    },
    Remove {
        addrs: Vec<UnlockHash>,
        unused: bool,
    },
}

#[derive(Default)]
struct MockWalletInner {
    watched: BTreeSet<UnlockHash>,
    calls: Vec<WalletCall>,
    txns: HashMap<UnlockHash, Vec<ProcessedTransaction>>,
}

/// An in-memory wallet daemon.
#[derive(Default)]
pub struct MockWallet {
    inner: Mutex<MockWalletInner>,
}

impl MockWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watched(&self) -> Vec<UnlockHash> {
        self.inner.lock().unwrap().watched.iter().copied().collect()
    }

    pub fn calls(&self) -> Vec<WalletCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn set_transactions(&self, addr: UnlockHash, txns: Vec<ProcessedTransaction>) {
        self.inner.lock().unwrap().txns.insert(addr, txns);
    }
}

#[async_trait]
impl WalletClient for MockWallet {
    async fn ready(&self) -> Result<(), SkydError> {
        Ok(())
    }

    async fn new_address(&self) -> Result<UnlockHash, SkydError> {
        Ok(random_address())
    }

    async fn watched_addresses(&self) -> Result<Vec<UnlockHash>, SkydError> {
        Ok(self.watched())
    }

    async fn add_watch(&self, addrs: &[UnlockHash], unused: bool) -> Result<(), SkydError> {
        let mut inner = self.inner.lock().unwrap();
        inner.watched.extend(addrs.iter().copied());
        let mut addrs = addrs.to_vec();
        addrs.sort();
        inner.calls.push(WalletCall::Add { addrs, unused });
        Ok(())
    }

    async fn remove_watch(&self, addrs: &[UnlockHash], unused: bool) -> Result<(), SkydError> {
        let mut inner = self.inner.lock().unwrap();
        for addr in addrs {
            inner.watched.remove(addr);
        }
        let mut addrs = addrs.to_vec();
        addrs.sort();
        inner.calls.push(WalletCall::Remove { addrs, unused });
        Ok(())
    }

    async fn transactions_by_address(
        &self,
        addr: &UnlockHash,
    ) -> Result<Vec<ProcessedTransaction>, SkydError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .txns
            .get(addr)
            .cloned()
            .unwrap_or_default())
    }
}

/// An in-memory billing service that records credit calls and can be told
/// to fail.
#[derive(Default)]
pub struct MockBilling {
    calls: Mutex<Vec<(String, TransactionId, String)>>,
    fail: AtomicBool,
}

impl MockBilling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credits(&self) -> Vec<(String, TransactionId, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BillingClient for MockBilling {
    async fn credit(
        &self,
        sub: &str,
        txn_id: &TransactionId,
        amount: &str,
    ) -> Result<(), BillingError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BillingError::Api("mock billing failure".to_string()));
        }
        self.calls
            .lock()
            .unwrap()
            .push((sub.to_string(), *txn_id, amount.to_string()));
        Ok(())
    }
}
