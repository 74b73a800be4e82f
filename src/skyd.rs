// Client for the local skyd wallet daemon. The daemon owns the wallet keys
// and the watch-set; this service only asks it for new addresses, keeps its
// watch-set in sync and reads confirmed transactions for watched addresses.
//
// The capability surface is a trait so the coordination code can run against
// an in-memory wallet in tests.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::types::{TransactionId, UnlockHash};

#[derive(Debug, Error)]
pub enum SkydError {
    #[error("request to skyd failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("skyd returned an error: {0}")]
    Api(String),

    #[error("skyd is not ready")]
    NotReady,
}

impl SkydError {
    /// Transient transport failures are worth retrying; API-level errors are
    /// not.
    fn is_transient(&self) -> bool {
        match self {
            SkydError::Http(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}

/// One output of a processed transaction as reported by skyd.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessedOutput {
    #[serde(rename = "relatedaddress")]
    pub related_address: UnlockHash,

    /// Hastings amount as a decimal string.
    pub value: String,
}

/// A confirmed transaction as reported by skyd, trimmed to the fields the
/// deposit poller consumes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessedTransaction {
    #[serde(rename = "transactionid")]
    pub id: TransactionId,

    #[serde(default)]
    pub outputs: Vec<ProcessedOutput>,
}

/// The wallet-daemon operations the service depends on.
#[async_trait]
pub trait WalletClient: Send + Sync {
    /// Checks that the daemon finished loading its modules.
    async fn ready(&self) -> Result<(), SkydError>;

    /// Asks the wallet for a fresh address.
    async fn new_address(&self) -> Result<UnlockHash, SkydError>;

    /// Returns the addresses the daemon currently watches.
    async fn watched_addresses(&self) -> Result<Vec<UnlockHash>, SkydError>;

    /// Adds addresses to the daemon's watch-set. With `unused == false` the
    /// daemon rescans the blockchain for historic transactions to them,
    /// which is expensive.
    async fn add_watch(&self, addrs: &[UnlockHash], unused: bool) -> Result<(), SkydError>;

    /// Removes addresses from the daemon's watch-set.
    async fn remove_watch(&self, addrs: &[UnlockHash], unused: bool) -> Result<(), SkydError>;

    /// Returns the confirmed transactions related to a watched address.
    async fn transactions_by_address(
        &self,
        addr: &UnlockHash,
    ) -> Result<Vec<ProcessedTransaction>, SkydError>;
}

#[derive(Deserialize)]
struct DaemonReadyGet {
    ready: bool,
}

#[derive(Deserialize)]
struct WalletAddressGet {
    address: UnlockHash,
}

#[derive(Deserialize)]
struct WalletWatchGet {
    #[serde(default)]
    addresses: Vec<UnlockHash>,
}

#[derive(Serialize)]
struct WalletWatchPost<'a> {
    addresses: &'a [UnlockHash],
    remove: bool,
    unused: bool,
}

#[derive(Deserialize)]
struct WalletTransactionsGet {
    #[serde(default, rename = "confirmedtransactions")]
    confirmed_transactions: Vec<ProcessedTransaction>,
}

#[derive(Deserialize)]
struct SkydApiError {
    message: String,
}

/// HTTP client for a skyd instance.
pub struct SkydClient {
    http: reqwest::Client,
    addr: String,
    password: String,
}

impl SkydClient {
    pub fn new(addr: &str, user_agent: &str, password: &str) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to build http client");
        Self {
            http,
            addr: addr.trim_end_matches('/').to_string(),
            password: password.to_string(),
        }
    }

    fn retry_policy() -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(3)
            .with_jitter()
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, SkydError> {
        let resp = self
            .http
            .get(format!("{}{}", self.addr, path))
            .basic_auth("", Some(&self.password))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(read_api_error(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<(), SkydError> {
        let resp = self
            .http
            .post(format!("{}{}", self.addr, path))
            .basic_auth("", Some(&self.password))
            .json(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(read_api_error(resp).await);
        }
        Ok(())
    }
}

async fn read_api_error(resp: reqwest::Response) -> SkydError {
    let status = resp.status();
    match resp.json::<SkydApiError>().await {
        Ok(err) => SkydError::Api(err.message),
        Err(_) => SkydError::Api(format!("unexpected status {status}")),
    }
}

#[async_trait]
impl WalletClient for SkydClient {
    async fn ready(&self) -> Result<(), SkydError> {
        let ready: DaemonReadyGet = (|| self.get_json("/daemon/ready"))
            .retry(&Self::retry_policy())
            .when(SkydError::is_transient)
            .await?;
        if !ready.ready {
            return Err(SkydError::NotReady);
        }
        Ok(())
    }

    async fn new_address(&self) -> Result<UnlockHash, SkydError> {
        let resp: WalletAddressGet = self.get_json("/wallet/address").await?;
        Ok(resp.address)
    }

    async fn watched_addresses(&self) -> Result<Vec<UnlockHash>, SkydError> {
        let resp: WalletWatchGet = (|| self.get_json("/wallet/watch"))
            .retry(&Self::retry_policy())
            .when(SkydError::is_transient)
            .await?;
        Ok(resp.addresses)
    }

    async fn add_watch(&self, addrs: &[UnlockHash], unused: bool) -> Result<(), SkydError> {
        debug!(count = addrs.len(), unused, "adding watched addresses");
        self.post_json(
            "/wallet/watch",
            &WalletWatchPost {
                addresses: addrs,
                remove: false,
                unused,
            },
        )
        .await
    }

    async fn remove_watch(&self, addrs: &[UnlockHash], unused: bool) -> Result<(), SkydError> {
        debug!(count = addrs.len(), unused, "removing watched addresses");
        self.post_json(
            "/wallet/watch",
            &WalletWatchPost {
                addresses: addrs,
                remove: true,
                unused,
            },
        )
        .await
    }

    async fn transactions_by_address(
        &self,
        addr: &UnlockHash,
    ) -> Result<Vec<ProcessedTransaction>, SkydError> {
        let path = format!("/wallet/transactions/{addr}");
        let resp: WalletTransactionsGet = (|| self.get_json(&path))
            .retry(&Self::retry_policy())
            .when(SkydError::is_transient)
            .await?;
        Ok(resp.confirmed_transactions)
    }
}
