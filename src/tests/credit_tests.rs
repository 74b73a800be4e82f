//! Tests for the siacoin-to-credit conversion arithmetic.

use num_bigint::{BigInt, BigUint};
use num_rational::BigRational;

use crate::promoter::credit::{
    convert_to_credits, rational_to_decimal_string, CREDIT_PRECISION,
};
use crate::store::rate::default_conversion_rate;
use crate::types::siacoin_precision;

fn ratio(num: i64, denom: i64) -> BigRational {
    BigRational::new(BigInt::from(num), BigInt::from(denom))
}

#[test]
fn test_convert_with_default_rate() {
    let one_sc = siacoin_precision();
    let rate = default_conversion_rate();

    let tests: &[(BigUint, &str)] = &[
        (one_sc.clone(), "1.00"),
        (&one_sc / 2u32, "0.50"),
        (&one_sc * 2u32, "2.00"),
    ];
    for (hastings, expected) in tests {
        let credits = convert_to_credits(hastings, &rate);
        assert_eq!(&rational_to_decimal_string(&credits, 2), expected);
    }
}

#[test]
fn test_convert_full_precision() {
    let credits = convert_to_credits(&siacoin_precision(), &default_conversion_rate());
    assert_eq!(
        rational_to_decimal_string(&credits, CREDIT_PRECISION),
        "1.00000000000000000000"
    );
}

#[test]
fn test_convert_with_custom_rate() {
    // 7/9 credits per hasting over an amount where the division is exact.
    let credits = convert_to_credits(&BigUint::from(123456789u64), &ratio(7, 9));
    assert_eq!(
        rational_to_decimal_string(&credits, CREDIT_PRECISION),
        "96021947.00000000000000000000"
    );
}

#[test]
fn test_repeating_fraction_rounds_to_nearest() {
    let one_third = convert_to_credits(&BigUint::from(1u32), &ratio(1, 3));
    assert_eq!(
        rational_to_decimal_string(&one_third, CREDIT_PRECISION),
        "0.33333333333333333333"
    );

    let two_thirds = convert_to_credits(&BigUint::from(2u32), &ratio(1, 3));
    assert_eq!(
        rational_to_decimal_string(&two_thirds, CREDIT_PRECISION),
        "0.66666666666666666667"
    );
}

#[test]
fn test_ties_round_away_from_zero() {
    // 0.005 at two digits.
    assert_eq!(rational_to_decimal_string(&ratio(1, 200), 2), "0.01");
    assert_eq!(rational_to_decimal_string(&ratio(-1, 200), 2), "-0.01");
}

#[test]
fn test_zero_and_precision_zero() {
    assert_eq!(rational_to_decimal_string(&ratio(0, 1), 2), "0.00");
    assert_eq!(rational_to_decimal_string(&ratio(3, 2), 0), "2");
    assert_eq!(rational_to_decimal_string(&ratio(5, 1), 0), "5");
}

#[test]
fn test_fraction_is_zero_padded() {
    assert_eq!(rational_to_decimal_string(&ratio(1, 100), 4), "0.0100");
    assert_eq!(rational_to_decimal_string(&ratio(10001, 10000), 4), "1.0001");
}
