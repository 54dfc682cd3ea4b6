use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use firestore_query_core::firestore::api::{
    DocumentChangeType, DocumentSnapshot, Firestore, FirestoreFutureExt, FirestoreSettings,
    QuerySnapshot, SubscriptionState,
};
use firestore_query_core::firestore::remote::datastore::InMemoryDatastore;
use firestore_query_core::firestore::value::FirestoreValue;
use firestore_query_core::firestore::FirestoreError;
use firestore_query_core::util::PartialObserver;
use tokio_util::sync::CancellationToken;

fn setup() -> (Firestore, Arc<InMemoryDatastore>) {
    let datastore = Arc::new(InMemoryDatastore::new());
    let firestore = Firestore::new(FirestoreSettings::new("listeners"), datastore.clone()).unwrap();
    (firestore, datastore)
}

fn score(value: i64) -> BTreeMap<String, FirestoreValue> {
    BTreeMap::from([("score".to_string(), FirestoreValue::from(value))])
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn unsubscribing_twice_releases_the_watch_once() {
    let (firestore, datastore) = setup();
    let doc = firestore.doc("games/one").unwrap();
    let registration = doc.on_snapshot(PartialObserver::new());
    registration.ready().await.unwrap();
    assert_eq!(registration.state(), SubscriptionState::Active);

    registration.unsubscribe();
    registration.unsubscribe();
    drop(registration);
    settle().await;

    assert_eq!(datastore.unregister_calls(), 1);
    assert_eq!(datastore.active_watches(), 0);
}

#[tokio::test]
async fn dropping_the_registration_unsubscribes() {
    let (firestore, datastore) = setup();
    let doc = firestore.doc("games/one").unwrap();
    {
        let registration = doc.on_snapshot(PartialObserver::new());
        registration.ready().await.unwrap();
        assert_eq!(datastore.active_watches(), 1);
    }
    settle().await;
    assert_eq!(datastore.active_watches(), 0);
}

#[tokio::test]
async fn document_listener_sees_every_write() {
    let (firestore, _) = setup();
    let doc = firestore.doc("games/one").unwrap();
    let seen: Arc<Mutex<Vec<Option<i64>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let registration = doc.on_snapshot(PartialObserver::new().with_next(
        move |snapshot: &DocumentSnapshot| {
            let value = snapshot
                .get("score")
                .ok()
                .flatten()
                .and_then(|value| value.as_integer());
            sink.lock().unwrap().push(value);
        },
    ));
    registration.ready().await.unwrap();

    doc.set(score(1), None).await.unwrap();
    doc.delete().await.unwrap();

    assert_eq!(*seen.lock().unwrap(), [None, Some(1), None]);
}

#[tokio::test]
async fn query_stream_reports_document_changes() {
    let (firestore, _) = setup();
    let games = firestore.collection("games").unwrap();
    let mut stream = games.order_by("score").unwrap().snapshots().unwrap();

    let initial: QuerySnapshot = stream.next().await.unwrap().unwrap();
    assert!(initial.is_empty());

    games.doc(Some("a")).unwrap().set(score(3), None).await.unwrap();
    let added = stream.next().await.unwrap().unwrap();
    assert_eq!(added.doc_changes()[0].change_type(), DocumentChangeType::Added);

    games.doc(Some("a")).unwrap().set(score(4), None).await.unwrap();
    let modified = stream.next().await.unwrap().unwrap();
    assert_eq!(modified.doc_changes()[0].change_type(), DocumentChangeType::Modified);

    games.doc(Some("a")).unwrap().delete().await.unwrap();
    let removed = stream.next().await.unwrap().unwrap();
    assert_eq!(removed.doc_changes()[0].change_type(), DocumentChangeType::Removed);
    assert!(removed.is_empty());
}

#[tokio::test]
async fn slow_registration_can_be_abandoned() {
    let (firestore, datastore) = setup();
    datastore.set_registration_delay(Duration::from_secs(60));
    let doc = firestore.doc("games/one").unwrap();
    let errors = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&errors);
    let registration = doc.on_snapshot(PartialObserver::new().with_error(move |_: &FirestoreError| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let token = CancellationToken::new();
    token.cancel();
    let err = registration.ready().with_cancellation(&token).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(registration.state(), SubscriptionState::Requested);

    registration.unsubscribe();
    assert_eq!(registration.state(), SubscriptionState::Unsubscribed);
    assert_eq!(errors.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn writes_after_unsubscribe_are_not_delivered() {
    let (firestore, _) = setup();
    let doc = firestore.doc("games/two").unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let registration = doc.on_snapshot(PartialObserver::new().with_next(
        move |_: &DocumentSnapshot| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    ));
    registration.ready().await.unwrap();
    doc.set(score(1), None).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    registration.unsubscribe();
    doc.set(score(2), None).await.unwrap();
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
