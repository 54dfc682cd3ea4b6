use std::collections::BTreeMap;
use std::sync::Arc;

use firestore_query_core::firestore::api::{
    DocumentSnapshot, Firestore, FirestoreSettings, SetOptions, TransactionOptions,
};
use firestore_query_core::firestore::remote::datastore::InMemoryDatastore;
use firestore_query_core::firestore::value::FirestoreValue;
use firestore_query_core::util::BackoffConfig;

fn setup(project: &str) -> (Firestore, Arc<InMemoryDatastore>) {
    let datastore = Arc::new(InMemoryDatastore::new());
    let settings =
        FirestoreSettings::new(project).with_transaction_backoff(BackoffConfig::immediate());
    let firestore = Firestore::new(settings, datastore.clone()).unwrap();
    (firestore, datastore)
}

fn fields(name: &str, value: impl Into<FirestoreValue>) -> BTreeMap<String, FirestoreValue> {
    BTreeMap::from([(name.to_string(), value.into())])
}

fn integer(snapshot: &DocumentSnapshot, name: &str) -> Option<i64> {
    snapshot
        .get(name)
        .unwrap()
        .and_then(|value| value.as_integer())
}

#[tokio::test]
async fn batch_applies_writes_in_order() {
    let (firestore, _) = setup("batch-order");
    let a = firestore.doc("items/A").unwrap();
    let b = firestore.doc("items/B").unwrap();
    b.set(fields("x", 7), None).await.unwrap();

    firestore
        .run_batch(|batch| {
            batch
                .set(&a, fields("x", 1), None)?
                .update(&a, fields("x", 2))?
                .delete(&b)?;
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(integer(&a.get().await.unwrap(), "x"), Some(2));
    assert!(!b.get().await.unwrap().exists());
}

#[tokio::test]
async fn failing_batch_modifies_nothing() {
    let (firestore, datastore) = setup("batch-failure");
    let a = firestore.doc("items/A").unwrap();
    let b = firestore.doc("items/B").unwrap();
    b.set(fields("x", 7), None).await.unwrap();
    datastore.fail_commit_after(2);

    let mut batch = firestore.batch();
    batch
        .set(&a, fields("x", 1), None)
        .unwrap()
        .update(&a, fields("x", 2))
        .unwrap()
        .delete(&b)
        .unwrap();
    let err = batch.commit().await.unwrap_err();
    assert_eq!(err.code_str(), "firestore/internal");

    assert!(!a.get().await.unwrap().exists());
    assert_eq!(integer(&b.get().await.unwrap(), "x"), Some(7));
}

#[tokio::test]
async fn transfer_is_atomic() {
    let (firestore, _) = setup("tx-transfer");
    let alice = firestore.doc("accounts/alice").unwrap();
    let bob = firestore.doc("accounts/bob").unwrap();
    alice.set(fields("balance", 100), None).await.unwrap();
    bob.set(fields("balance", 0), None).await.unwrap();

    firestore
        .run_transaction(|tx| {
            let from = integer(&tx.get(&alice)?, "balance").unwrap_or(0);
            let to = integer(&tx.get(&bob)?, "balance").unwrap_or(0);
            tx.update(&alice, fields("balance", from - 40))?;
            tx.update(&bob, fields("balance", to + 40))?;
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(integer(&alice.get().await.unwrap(), "balance"), Some(60));
    assert_eq!(integer(&bob.get().await.unwrap(), "balance"), Some(40));
}

#[tokio::test]
async fn exhausted_transaction_leaves_documents_untouched() {
    let (firestore, datastore) = setup("tx-exhausted");
    let alice = firestore.doc("accounts/alice").unwrap();
    alice.set(fields("balance", 100), None).await.unwrap();
    datastore.inject_transaction_conflicts(usize::MAX);

    let err = firestore
        .run_transaction_with_options(TransactionOptions::default().with_max_attempts(2), |tx| {
            let balance = integer(&tx.get(&alice)?, "balance").unwrap_or(0);
            tx.set(&alice, fields("balance", balance * 2), None)?;
            Ok(())
        })
        .await
        .unwrap_err();

    assert_eq!(err.code_str(), "firestore/aborted");
    assert!(err.message().contains("2 attempts"));
    assert_eq!(integer(&alice.get().await.unwrap(), "balance"), Some(100));
}

#[tokio::test]
async fn sentinels_resolve_on_write() {
    let (firestore, _) = setup("sentinels");
    let doc = firestore.doc("stats/page").unwrap();
    doc.set(fields("views", 1), None).await.unwrap();
    doc.update(fields("views", FirestoreValue::numeric_increment(4)))
        .await
        .unwrap();
    doc.set(
        fields("seen", FirestoreValue::server_timestamp()),
        Some(SetOptions::merge_all()),
    )
    .await
    .unwrap();

    let snapshot = doc.get().await.unwrap();
    assert_eq!(integer(&snapshot, "views"), Some(5));
    assert!(snapshot.get("seen").unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_transactions_do_not_lose_updates() {
    let (firestore, _) = setup("tx-contention");
    let counter = firestore.doc("counters/c").unwrap();
    counter.set(fields("value", 0), None).await.unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let firestore = firestore.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    firestore
                        .run_transaction_with_options(
                            TransactionOptions::default().with_max_attempts(10_000),
                            |tx| {
                                let current = integer(&tx.get(&counter)?, "value").unwrap_or(0);
                                tx.set(&counter, fields("value", current + 1), None)?;
                                Ok(())
                            },
                        )
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(integer(&counter.get().await.unwrap(), "value"), Some(400));
}
