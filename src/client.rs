// A small typed client for the promoter's own API. Mostly used by the
// integration tests and operational tooling.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::api::{ErrorMessage, HealthGet, UserAddressPost};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api returned status {status}: {message}")]
    Api { status: StatusCode, message: String },
}

pub struct PromoterClient {
    http: reqwest::Client,
    addr: String,
}

impl PromoterClient {
    pub fn new(addr: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            addr: addr.trim_end_matches('/').to_string(),
        }
    }

    /// Calls the /health endpoint.
    pub async fn health(&self) -> Result<HealthGet, ClientError> {
        let resp = self
            .http
            .get(format!("{}/health", self.addr))
            .send()
            .await?;
        decode(resp).await
    }

    /// Calls the /address endpoint with the given credentials.
    pub async fn address(
        &self,
        authorization: Option<&str>,
        cookie: Option<&str>,
    ) -> Result<UserAddressPost, ClientError> {
        let mut req = self.http.post(format!("{}/address", self.addr));
        if let Some(value) = authorization {
            req = req.header(reqwest::header::AUTHORIZATION, value);
        }
        if let Some(value) = cookie {
            req = req.header(reqwest::header::COOKIE, value);
        }
        decode(req.send().await?).await
    }

    /// Calls the /dead/:servername endpoint.
    pub async fn mark_server_dead(&self, server: &str) -> Result<(), ClientError> {
        let resp = self
            .http
            .post(format!("{}/dead/{}", self.addr, server))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(read_api_error(resp).await);
        }
        Ok(())
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    if !resp.status().is_success() {
        return Err(read_api_error(resp).await);
    }
    Ok(resp.json().await?)
}

async fn read_api_error(resp: reqwest::Response) -> ClientError {
    let status = resp.status();
    let message = match resp.json::<ErrorMessage>().await {
        Ok(err) => err.message,
        Err(_) => "could not read error response".to_string(),
    };
    ClientError::Api { status, message }
}
