// Configuration is read once at startup from the environment. Required
// variables produce a hard error naming the variable, the way operators
// expect from the deployment manifests.

use std::env;
use std::time::Duration;

use thiserror::Error;

pub const ENV_MONGODB_URI: &str = "MONGODB_URI";
pub const ENV_MONGODB_USER: &str = "MONGODB_USER";
pub const ENV_MONGODB_PASSWORD: &str = "MONGODB_PASSWORD";
pub const ENV_ACCOUNTS_HOST: &str = "ACCOUNTS_HOST";
pub const ENV_ACCOUNTS_PORT: &str = "ACCOUNTS_PORT";
pub const ENV_BILLING_API_ADDRESS: &str = "BILLING_API_ADDRESS";
pub const ENV_SKYD_API_ADDRESS: &str = "SKYD_API_ADDRESS";
pub const ENV_SKYD_API_USER_AGENT: &str = "SKYD_API_USER_AGENT";
pub const ENV_SIA_API_PASSWORD: &str = "SIA_API_PASSWORD";
pub const ENV_SERVER_DOMAIN: &str = "SERVER_DOMAIN";
pub const ENV_LOG_LEVEL: &str = "SIACOIN_PROMOTER_LOG_LEVEL";
pub const ENV_PORT: &str = "SIACOIN_PROMOTER_PORT";
pub const ENV_PROFILE: &str = "SIACOIN_PROMOTER_ENV";

/// Default agent used when no other value is specified by the user. skyd
/// rejects requests that don't carry it.
const DEFAULT_SKYD_USER_AGENT: &str = "Sia-Agent";

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} wasn't specified")]
    Missing(&'static str),

    #[error("failed to parse {0}: {1}")]
    Invalid(&'static str, String),
}

/// The deployment profile of the service. It selects the address pool
/// watermarks and the transaction poll interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Testing,
    Dev,
    Production,
}

impl Profile {
    /// Min number of addresses we want to keep in the db which are not yet
    /// assigned to users. If the count drops below this, we generate more.
    pub fn min_unused_addresses(self) -> i64 {
        match self {
            Profile::Testing => 5,
            Profile::Dev => 50,
            Profile::Production => 5000,
        }
    }

    /// Max number of addresses we want to keep in the db which are not yet
    /// assigned to users.
    pub fn max_unused_addresses(self) -> i64 {
        match self {
            Profile::Testing => 10,
            Profile::Dev => 100,
            Profile::Production => 10000,
        }
    }

    /// The interval for polling skyd for transactions and the db for
    /// uncredited deposits.
    pub fn txn_poll_interval(self) -> Duration {
        match self {
            Profile::Testing => Duration::from_secs(5),
            Profile::Dev => Duration::from_secs(60),
            Profile::Production => Duration::from_secs(600),
        }
    }

    /// Max number of address updates sent to skyd within a single API
    /// request.
    pub fn update_max_batch_size(self) -> usize {
        self.min_unused_addresses() as usize
    }

    fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "testing" => Ok(Profile::Testing),
            "dev" => Ok(Profile::Dev),
            "production" => Ok(Profile::Production),
            other => Err(ConfigError::Invalid(ENV_PROFILE, other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub port: u16,
    pub db_uri: String,
    pub db_user: String,
    pub db_password: String,
    pub accounts_addr: String,
    pub billing_addr: String,
    pub skyd_addr: String,
    pub skyd_user_agent: String,
    pub skyd_password: String,
    pub server_domain: String,
    pub profile: Profile,
}

impl Config {
    /// Parses the configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let accounts_host = required(ENV_ACCOUNTS_HOST)?;
        let accounts_port = required(ENV_ACCOUNTS_PORT)?;

        let port = match env::var(ENV_PORT) {
            Ok(v) => v
                .parse()
                .map_err(|_| ConfigError::Invalid(ENV_PORT, v.clone()))?,
            Err(_) => DEFAULT_PORT,
        };

        let profile = match env::var(ENV_PROFILE) {
            Ok(v) => Profile::parse(&v)?,
            Err(_) => Profile::Production,
        };

        Ok(Self {
            log_level: env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string()),
            port,
            db_uri: required(ENV_MONGODB_URI)?,
            db_user: required(ENV_MONGODB_USER)?,
            db_password: required(ENV_MONGODB_PASSWORD)?,
            accounts_addr: format!("http://{}:{}", accounts_host, accounts_port),
            billing_addr: required(ENV_BILLING_API_ADDRESS)?,
            skyd_addr: required(ENV_SKYD_API_ADDRESS)?,
            skyd_user_agent: env::var(ENV_SKYD_API_USER_AGENT)
                .unwrap_or_else(|_| DEFAULT_SKYD_USER_AGENT.to_string()),
            skyd_password: required(ENV_SIA_API_PASSWORD)?,
            server_domain: required(ENV_SERVER_DOMAIN)?,
            profile,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_watermarks() {
        assert_eq!(Profile::Testing.min_unused_addresses(), 5);
        assert_eq!(Profile::Testing.max_unused_addresses(), 10);
        assert_eq!(Profile::Dev.min_unused_addresses(), 50);
        assert_eq!(Profile::Dev.max_unused_addresses(), 100);
        assert_eq!(Profile::Production.min_unused_addresses(), 5000);
        assert_eq!(Profile::Production.max_unused_addresses(), 10000);
    }

    #[test]
    fn test_profile_intervals() {
        assert_eq!(Profile::Testing.txn_poll_interval(), Duration::from_secs(5));
        assert_eq!(Profile::Dev.txn_poll_interval(), Duration::from_secs(60));
        assert_eq!(
            Profile::Production.txn_poll_interval(),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!(Profile::parse("testing").unwrap(), Profile::Testing);
        assert_eq!(Profile::parse("dev").unwrap(), Profile::Dev);
        assert_eq!(Profile::parse("production").unwrap(), Profile::Production);
        assert!(Profile::parse("staging").is_err());
    }

    #[test]
    fn test_batch_size_follows_min_watermark() {
        assert_eq!(Profile::Testing.update_max_batch_size(), 5);
        assert_eq!(Profile::Production.update_max_batch_size(), 5000);
    }
}
