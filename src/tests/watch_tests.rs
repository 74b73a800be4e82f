//! Tests for the watch synchronizer's diff, batching and rescan-flag logic.

use crate::promoter::watch::{apply_batch, compute_diff, Batch};
use crate::skyd::WalletClient;
use crate::store::addresses::AddressEvent;
use crate::store::WatchedAddress;
use crate::tests::mocks::{random_address, MockWallet, WalletCall};

fn unused_entry(addr: crate::types::UnlockHash) -> WatchedAddress {
    WatchedAddress::new_unused(addr, "test-server")
}

fn assigned_entry(addr: crate::types::UnlockHash, sub: &str) -> WatchedAddress {
    let mut wa = WatchedAddress::new_unused(addr, "test-server");
    wa.user_sub = sub.to_string();
    wa.primary = true;
    wa
}

#[test]
fn test_compute_diff() {
    let addr1 = random_address();
    let addr2 = random_address();
    let addr3 = random_address();

    // addr1 and addr2 in the db, addr2 and addr3 watched by the daemon.
    let db = vec![unused_entry(addr1), unused_entry(addr2)];
    let daemon = vec![addr2, addr3];

    let diff = compute_diff(&db, &daemon);
    let (adds, unused) = diff.adds();
    assert_eq!(adds, vec![addr1], "addr1 should be the one to add");
    assert!(unused, "addr1 should be unused");
    assert_eq!(diff.removes(), vec![addr3], "addr3 should be the one to remove");
}

#[test]
fn test_compute_diff_empty_when_in_sync() {
    let addr1 = random_address();
    let addr2 = random_address();
    let db = vec![unused_entry(addr1), assigned_entry(addr2, "user")];
    let daemon = vec![addr1, addr2];

    let diff = compute_diff(&db, &daemon);
    assert!(diff.adds().0.is_empty());
    assert!(diff.removes().is_empty());
}

#[test]
fn test_compute_diff_assigned_address_forces_rescan() {
    let addr1 = random_address();
    let addr2 = random_address();
    let db = vec![unused_entry(addr1), assigned_entry(addr2, "user")];

    let (adds, unused) = compute_diff(&db, &[]).adds();
    assert_eq!(adds.len(), 2);
    assert!(!unused, "an assigned address must trigger a rescan");
}

#[test]
fn test_batch_nets_duplicate_events() {
    let addr1 = random_address();
    let addr2 = random_address();

    // Insert addr1 twice and delete addr2 even though it was never added.
    // The net result is addr1 being watched.
    let mut batch = Batch::default();
    batch.push(Some(AddressEvent::Insert {
        address: addr1,
        unused: true,
    }));
    batch.push(Some(AddressEvent::Delete { address: addr2 }));
    batch.push(Some(AddressEvent::Insert {
        address: addr1,
        unused: true,
    }));

    assert_eq!(batch.events(), 3);
    let (adds, unused) = batch.adds();
    assert_eq!(adds, vec![addr1]);
    assert!(unused);
    assert_eq!(batch.removes(), vec![addr2]);
}

#[test]
fn test_batch_insert_then_delete_cancels() {
    let addr = random_address();
    let mut batch = Batch::default();
    batch.push(Some(AddressEvent::Insert {
        address: addr,
        unused: true,
    }));
    batch.push(Some(AddressEvent::Delete { address: addr }));

    assert!(batch.adds().0.is_empty(), "delete supersedes the insert");
    assert_eq!(batch.removes(), vec![addr]);
}

#[test]
fn test_batch_counts_membership_neutral_events() {
    // Update events don't touch the watch set but still consume window
    // space.
    let mut batch = Batch::default();
    batch.push(None);
    batch.push(None);
    assert_eq!(batch.events(), 2);
    assert!(batch.adds().0.is_empty());
    assert!(batch.removes().is_empty());
}

#[tokio::test]
async fn test_apply_batch_removes_before_adds() {
    let added = random_address();
    let removed = random_address();

    let wallet = MockWallet::new();
    wallet.add_watch(&[removed], true).await.unwrap();

    let mut batch = Batch::default();
    batch.push(Some(AddressEvent::Insert {
        address: added,
        unused: true,
    }));
    batch.push(Some(AddressEvent::Delete { address: removed }));
    apply_batch(&wallet, &batch).await.unwrap();

    // Skip the setup call, then expect exactly remove-then-add.
    let calls = wallet.calls();
    assert_eq!(
        &calls[1..],
        &[
            WalletCall::Remove {
                addrs: vec![removed],
                unused: true,
            },
            WalletCall::Add {
                addrs: vec![added],
                unused: true,
            },
        ]
    );
    assert_eq!(wallet.watched(), vec![added]);
}

#[tokio::test]
async fn test_apply_batch_rescan_flag() {
    // Two unassigned additions keep the cheap path.
    let wallet = MockWallet::new();
    let mut batch = Batch::default();
    batch.push(Some(AddressEvent::Insert {
        address: random_address(),
        unused: true,
    }));
    batch.push(Some(AddressEvent::Insert {
        address: random_address(),
        unused: true,
    }));
    apply_batch(&wallet, &batch).await.unwrap();
    assert!(matches!(
        wallet.calls().as_slice(),
        [WalletCall::Add { unused: true, .. }]
    ));

    // One assigned addition in the set forces the rescan.
    let wallet = MockWallet::new();
    let mut batch = Batch::default();
    batch.push(Some(AddressEvent::Insert {
        address: random_address(),
        unused: true,
    }));
    batch.push(Some(AddressEvent::Insert {
        address: random_address(),
        unused: false,
    }));
    apply_batch(&wallet, &batch).await.unwrap();
    assert!(matches!(
        wallet.calls().as_slice(),
        [WalletCall::Add { unused: false, .. }]
    ));
}

#[tokio::test]
async fn test_apply_batch_issues_at_most_two_calls() {
    let wallet = MockWallet::new();
    let mut batch = Batch::default();
    for _ in 0..10 {
        batch.push(Some(AddressEvent::Insert {
            address: random_address(),
            unused: true,
        }));
        batch.push(Some(AddressEvent::Delete {
            address: random_address(),
        }));
    }
    apply_batch(&wallet, &batch).await.unwrap();
    assert_eq!(wallet.calls().len(), 2);
}

#[tokio::test]
async fn test_empty_batch_is_a_noop() {
    let wallet = MockWallet::new();
    apply_batch(&wallet, &Batch::default()).await.unwrap();
    assert!(wallet.calls().is_empty());
}

#[tokio::test]
async fn test_reinsert_emits_in_order() {
    // Insert, delete and re-insert arriving in separate windows reach the
    // daemon in that order.
    let addr = random_address();
    let wallet = MockWallet::new();

    for event in [
        AddressEvent::Insert {
            address: addr,
            unused: true,
        },
        AddressEvent::Delete { address: addr },
        AddressEvent::Insert {
            address: addr,
            unused: false,
        },
    ] {
        let mut batch = Batch::default();
        batch.push(Some(event));
        apply_batch(&wallet, &batch).await.unwrap();
    }

    assert_eq!(
        wallet.calls(),
        vec![
            WalletCall::Add {
                addrs: vec![addr],
                unused: true,
            },
            WalletCall::Remove {
                addrs: vec![addr],
                unused: true,
            },
            WalletCall::Add {
                addrs: vec![addr],
                unused: false,
            },
        ]
    );
    assert_eq!(wallet.watched(), vec![addr]);
}
