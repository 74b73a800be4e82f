// Drains uncredited deposits, converts them at the configured rate and
// notifies the billing service. Claims are leased through `credited_at` so
// concurrent dispatchers on other replicas don't double-post, and the
// billing service dedupes on txn id in case a claim is ever resurfaced after
// a partial failure.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use num_bigint::{BigInt, BigUint};
use num_rational::BigRational;
use num_traits::Signed;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::billing::BillingClient;
use crate::promoter::Promoter;
use crate::store::Store;

/// Number of fractional digits of the credit amounts sent to the billing
/// service. Generous so as to not lose precision.
pub const CREDIT_PRECISION: usize = 20;

/// Runs the credit dispatcher until the token is cancelled.
pub async fn run(promoter: Arc<Promoter>, cancel: CancellationToken) {
    let period = promoter.profile().txn_poll_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        dispatch_once(promoter.store(), promoter.billing().as_ref(), period).await;
    }
}

/// A single dispatch pass: claim deposits one-by-one until none are left. A
/// billing or database failure ends the pass; the lease guard resurfaces
/// claimed-but-unsettled deposits after `lease`.
pub async fn dispatch_once(store: &Store, billing: &dyn BillingClient, lease: Duration) {
    // Fetch the conversion rate once per pass.
    let rate = match store.conversion_rate().await {
        Ok(rate) => rate,
        Err(err) => {
            error!(error = %err, "failed to fetch siacoin conversion rate");
            return;
        }
    };

    loop {
        let deposit = match store.claim_uncredited_deposit(lease).await {
            Ok(Some(deposit)) => deposit,
            Ok(None) => return, // no more deposits this pass
            Err(err) => {
                error!(error = %err, "failed to fetch another uncredited deposit");
                return;
            }
        };

        // Resolve the user that owns the deposit address.
        let watched = match store.watched_address(&deposit.address).await {
            Ok(Some(wa)) => wa,
            Ok(None) => {
                error!(
                    address = %deposit.address,
                    txn = %deposit.txn_id,
                    "address for deposit doesn't exist - this should never happen"
                );
                continue; // try the next deposit
            }
            Err(err) => {
                error!(error = %err, "failed to fetch address for deposit");
                return;
            }
        };

        let amount = match BigUint::from_str(&deposit.value) {
            Ok(amount) => amount,
            Err(_) => {
                error!(txn = %deposit.txn_id, "failed to parse deposit amount");
                continue;
            }
        };

        let credits = convert_to_credits(&amount, &rate);
        let credits_str = rational_to_decimal_string(&credits, CREDIT_PRECISION);
        if let Err(err) = billing
            .credit(&watched.user_sub, &deposit.txn_id, &credits_str)
            .await
        {
            // Something is wrong with the billing service, end the pass
            // without marking the deposit. The lease expires and a later
            // pass retries; the billing side dedupes on txn id.
            error!(error = %err, "failed to submit deposit to billing service");
            return;
        }

        if let Err(err) = store.mark_deposit_credited(&deposit.txn_id).await {
            error!(error = %err, "failed to mark deposit credited");
            continue;
        }
    }
}

/// Converts an amount of hastings to credits using the provided conversion
/// rate, as an exact rational.
pub fn convert_to_credits(hastings: &BigUint, rate: &BigRational) -> BigRational {
    BigRational::from_integer(BigInt::from(hastings.clone())) * rate
}

/// Formats a rational as a fixed-point decimal string with the given number
/// of fractional digits, rounding the last digit to nearest with ties away
/// from zero.
pub fn rational_to_decimal_string(value: &BigRational, precision: usize) -> String {
    let scale = num_traits::pow(BigInt::from(10), precision);
    let numerator = value.numer() * &scale;
    let denominator = value.denom(); // canonical form keeps this positive

    // Truncated division plus a half-away-from-zero correction.
    let mut quotient = &numerator / denominator;
    let remainder = &numerator % denominator;
    if remainder.abs() * BigInt::from(2) >= *denominator {
        if numerator.is_negative() {
            quotient -= BigInt::from(1);
        } else {
            quotient += BigInt::from(1);
        }
    }

    let sign = if quotient.is_negative() { "-" } else { "" };
    let magnitude = quotient.abs();
    if precision == 0 {
        return format!("{sign}{magnitude}");
    }
    let integer = &magnitude / &scale;
    let fraction = &magnitude % &scale;
    format!(
        "{sign}{integer}.{fraction:0>width$}",
        fraction = fraction.to_string(),
        width = precision
    )
}
