//! Tests for reducing skyd transaction listings to deposit records.

use crate::promoter::deposits::deposits_from_transactions;
use crate::skyd::{ProcessedOutput, ProcessedTransaction};
use crate::tests::mocks::{random_address, random_txn_id};
use crate::types::siacoin_precision;

fn output(addr: crate::types::UnlockHash, value: &str) -> ProcessedOutput {
    ProcessedOutput {
        related_address: addr,
        value: value.to_string(),
    }
}

#[test]
fn test_outputs_are_summed_per_transaction() {
    let addr = random_address();
    let other = random_address();
    let one_sc = siacoin_precision().to_string();

    // Two outputs pay the address, one pays someone else.
    let txn = ProcessedTransaction {
        id: random_txn_id(),
        outputs: vec![
            output(addr, &one_sc),
            output(other, "5"),
            output(addr, &one_sc),
        ],
    };

    let deposits = deposits_from_transactions(&addr, &[txn.clone()]);
    assert_eq!(deposits.len(), 1);
    assert_eq!(deposits[0].txn_id, txn.id);
    assert_eq!(deposits[0].address, addr);
    assert_eq!(deposits[0].value, (siacoin_precision() * 2u32).to_string());
    assert!(!deposits[0].credited);
    assert_eq!(deposits[0].credited_at.timestamp_millis(), 0);
}

#[test]
fn test_unrelated_transactions_are_dropped() {
    let addr = random_address();
    let other = random_address();

    let txns = vec![
        ProcessedTransaction {
            id: random_txn_id(),
            outputs: vec![output(other, "100")],
        },
        ProcessedTransaction {
            id: random_txn_id(),
            outputs: vec![],
        },
    ];
    assert!(deposits_from_transactions(&addr, &txns).is_empty());
}

#[test]
fn test_zero_sum_is_dropped() {
    let addr = random_address();
    let txn = ProcessedTransaction {
        id: random_txn_id(),
        outputs: vec![output(addr, "0")],
    };
    assert!(deposits_from_transactions(&addr, &[txn]).is_empty());
}

#[test]
fn test_unparseable_value_drops_the_transaction() {
    let addr = random_address();
    let good = ProcessedTransaction {
        id: random_txn_id(),
        outputs: vec![output(addr, "42")],
    };
    let bad = ProcessedTransaction {
        id: random_txn_id(),
        outputs: vec![output(addr, "not-a-number")],
    };

    let deposits = deposits_from_transactions(&addr, &[bad, good.clone()]);
    assert_eq!(deposits.len(), 1);
    assert_eq!(deposits[0].txn_id, good.id);
    assert_eq!(deposits[0].value, "42");
}
