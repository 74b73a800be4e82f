// Client for the billing service that turns settled deposits into account
// credits. The service contract requires deduplication by transaction id, so
// posting the same credit twice is safe.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::TransactionId;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("request to billing service failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("billing service returned an error: {0}")]
    Api(String),
}

/// The billing operation the credit dispatcher depends on.
#[async_trait]
pub trait BillingClient: Send + Sync {
    /// Credits `amount` (a fixed-point decimal string) to the user for the
    /// given transaction. Implementations must dedupe on `txn_id`.
    async fn credit(
        &self,
        sub: &str,
        txn_id: &TransactionId,
        amount: &str,
    ) -> Result<(), BillingError>;
}

#[derive(Serialize)]
struct CreditPost<'a> {
    sub: &'a str,
    #[serde(rename = "txnID")]
    txn_id: String,
    amount: &'a str,
}

#[derive(Deserialize)]
struct BillingApiError {
    message: String,
}

pub struct HttpBillingClient {
    http: reqwest::Client,
    addr: String,
}

impl HttpBillingClient {
    pub fn new(addr: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            addr: addr.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BillingClient for HttpBillingClient {
    async fn credit(
        &self,
        sub: &str,
        txn_id: &TransactionId,
        amount: &str,
    ) -> Result<(), BillingError> {
        let resp = self
            .http
            .post(format!("{}/credits", self.addr))
            .json(&CreditPost {
                sub,
                txn_id: txn_id.to_string(),
                amount,
            })
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let message = match resp.json::<BillingApiError>().await {
                Ok(err) => err.message,
                Err(_) => format!("unexpected status {status}"),
            };
            return Err(BillingError::Api(message));
        }
        Ok(())
    }
}
