// Client for the accounts service. It maps the credentials forwarded by the
// caller to the opaque user identifier everything else is keyed on.

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccountsError {
    #[error("request to accounts service failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Unauthorized(String),
}

#[derive(Debug, Deserialize)]
struct UserGet {
    sub: String,
}

#[derive(Debug, Deserialize)]
pub struct AccountsHealthGet {
    #[serde(rename = "dbAlive")]
    pub db_alive: bool,
}

#[derive(Debug, Deserialize)]
struct AccountsApiError {
    message: String,
}

pub struct AccountsClient {
    http: reqwest::Client,
    addr: String,
}

impl AccountsClient {
    pub fn new(addr: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            addr: addr.trim_end_matches('/').to_string(),
        }
    }

    /// Resolves the user behind the forwarded `Authorization` and `Cookie`
    /// headers. A rejection by the accounts service carries the upstream
    /// message.
    pub async fn user_sub(
        &self,
        authorization: Option<&str>,
        cookie: Option<&str>,
    ) -> Result<String, AccountsError> {
        let mut req = self.http.get(format!("{}/user", self.addr));
        if let Some(value) = authorization {
            req = req.header(reqwest::header::AUTHORIZATION, value);
        }
        if let Some(value) = cookie {
            req = req.header(reqwest::header::COOKIE, value);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let message = match resp.json::<AccountsApiError>().await {
                Ok(err) => err.message,
                Err(_) => format!("accounts service returned status {status}"),
            };
            return Err(AccountsError::Unauthorized(message));
        }
        let user: UserGet = resp.json().await?;
        Ok(user.sub)
    }

    /// Probes the accounts service's own health endpoint.
    pub async fn health(&self) -> Result<AccountsHealthGet, AccountsError> {
        let resp = self
            .http
            .get(format!("{}/health", self.addr))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}
