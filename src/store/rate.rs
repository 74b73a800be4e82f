// The siacoin-to-credit conversion rate lives in the config collection as a
// numerator/denominator pair of decimal strings. Keeping it rational
// preserves precision up until the point of actually converting.

use bson::doc;
use num_bigint::BigInt;
use num_rational::BigRational;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{is_duplicate_key, Store};
use crate::types::SIACOIN_PRECISION_DECIMALS;

/// The `_id` of the conversion rate document in the config collection.
pub const CONFIG_ID_CONVERSION_RATE: &str = "conversion_rate";

#[derive(Debug, Error)]
pub enum RateError {
    #[error(transparent)]
    Db(#[from] mongodb::error::Error),

    #[error("failed to parse conversion rate component {0:?}")]
    Parse(String),
}

/// The database representation of the conversion rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRate {
    #[serde(rename = "_id")]
    pub id: String,
    pub numerator: String,
    pub denominator: String,
}

impl ConversionRate {
    /// Parses both components into an exact rational.
    pub fn to_ratio(&self) -> Result<BigRational, RateError> {
        let num = parse_component(&self.numerator)?;
        let denom = parse_component(&self.denominator)?;
        if denom == BigInt::from(0) {
            return Err(RateError::Parse(self.denominator.clone()));
        }
        Ok(BigRational::new(num, denom))
    }

    fn from_ratio(rate: &BigRational) -> Self {
        Self {
            id: CONFIG_ID_CONVERSION_RATE.to_string(),
            numerator: rate.numer().to_string(),
            denominator: rate.denom().to_string(),
        }
    }
}

fn parse_component(s: &str) -> Result<BigInt, RateError> {
    s.parse().map_err(|_| RateError::Parse(s.to_string()))
}

/// The default rate converts 1 SC into 1 credit: one credit per 10^24
/// hastings.
pub fn default_conversion_rate() -> BigRational {
    BigRational::new(
        BigInt::from(1),
        num_traits::pow(BigInt::from(10), SIACOIN_PRECISION_DECIMALS),
    )
}

impl Store {
    /// Returns the conversion rate as configured in the database. On first
    /// use the default rate is seeded and returned; a concurrent seed by
    /// another replica is fine since both write the same value.
    pub async fn conversion_rate(&self) -> Result<BigRational, RateError> {
        let found = self
            .config()
            .find_one(doc! { "_id": CONFIG_ID_CONVERSION_RATE }, None)
            .await?;
        if let Some(rate) = found {
            return rate.to_ratio();
        }

        let default = default_conversion_rate();
        match self
            .config()
            .insert_one(ConversionRate::from_ratio(&default), None)
            .await
        {
            Ok(_) => {}
            Err(err) if is_duplicate_key(&err) => {}
            Err(err) => return Err(err.into()),
        }
        Ok(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rate() {
        let rate = default_conversion_rate();
        assert_eq!(rate.numer().to_string(), "1");
        assert_eq!(rate.denom().to_string(), format!("1{}", "0".repeat(24)));
    }

    #[test]
    fn test_to_ratio() {
        let rate = ConversionRate {
            id: CONFIG_ID_CONVERSION_RATE.to_string(),
            numerator: "3".to_string(),
            denominator: "7".to_string(),
        };
        let ratio = rate.to_ratio().unwrap();
        assert_eq!(ratio, BigRational::new(BigInt::from(3), BigInt::from(7)));
    }

    #[test]
    fn test_to_ratio_rejects_garbage() {
        let rate = ConversionRate {
            id: CONFIG_ID_CONVERSION_RATE.to_string(),
            numerator: "one".to_string(),
            denominator: "10".to_string(),
        };
        assert!(matches!(rate.to_ratio(), Err(RateError::Parse(_))));

        let rate = ConversionRate {
            id: CONFIG_ID_CONVERSION_RATE.to_string(),
            numerator: "1".to_string(),
            denominator: "0".to_string(),
        };
        assert!(matches!(rate.to_ratio(), Err(RateError::Parse(_))));
    }

    #[test]
    fn test_roundtrip_through_db_representation() {
        let rate = BigRational::new(BigInt::from(5), BigInt::from(2));
        let stored = ConversionRate::from_ratio(&rate);
        assert_eq!(stored.numerator, "5");
        assert_eq!(stored.denominator, "2");
        assert_eq!(stored.to_ratio().unwrap(), rate);
    }
}
