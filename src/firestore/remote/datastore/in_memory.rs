use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::firestore::api::aggregate::AggregateDefinition;
use crate::firestore::api::operations::{
    delete_value_at_field_path, set_value_at_field_path, value_for_field_path,
};
use crate::firestore::api::query::QueryDefinition;
use crate::firestore::api::{DocumentSnapshot, SnapshotMetadata};
use crate::firestore::error::{aborted, internal_error, not_found, FirestoreError, FirestoreResult};
use crate::firestore::model::{DocumentKey, FieldPath, Timestamp};
use crate::firestore::query_evaluator::{apply_query_to_documents, evaluate_aggregates};
use crate::firestore::value::{FirestoreValue, MapValue, SentinelValue, ValueKind};
use crate::platform::runtime::sleep;

use super::{
    Datastore, TransactionId, TransactionReads, TransactionResult, WatchEvent, WatchHandle,
    WatchSink, WatchTarget, WriteOperation,
};

#[derive(Clone, Debug)]
struct StoredDocument {
    data: MapValue,
    version: u64,
}

type DocumentMap = BTreeMap<DocumentKey, StoredDocument>;

#[derive(Default)]
struct Faults {
    transaction_conflicts: usize,
    fail_commit_after: Option<usize>,
    registration_delay: Option<Duration>,
}

#[derive(Default)]
struct State {
    documents: Mutex<DocumentMap>,
    transactions: Mutex<HashMap<TransactionId, Vec<(DocumentKey, u64)>>>,
    watches: Mutex<HashMap<u64, (WatchTarget, WatchSink)>>,
    faults: Mutex<Faults>,
    next_version: AtomicU64,
    next_transaction: AtomicU64,
    next_watch: AtomicU64,
    commit_calls: AtomicUsize,
    run_query_calls: AtomicUsize,
    begin_transaction_calls: AtomicUsize,
    unregister_calls: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-local backend that keeps documents in memory.
///
/// Writes are applied atomically and bump a per-document version that
/// transactions use for conflict detection. Watches are notified synchronously
/// after every successful commit. A handful of fault-injection hooks let tests
/// exercise retries, aborts and listener teardown.
#[derive(Clone, Default)]
pub struct InMemoryDatastore {
    state: Arc<State>,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` transaction commits fail with `firestore/aborted`.
    pub fn inject_transaction_conflicts(&self, count: usize) {
        lock(&self.state.faults).transaction_conflicts = count;
    }

    /// Makes every later commit fail after applying `writes` of its writes.
    /// Nothing from the failing commit is persisted.
    pub fn fail_commit_after(&self, writes: usize) {
        lock(&self.state.faults).fail_commit_after = Some(writes);
    }

    /// Delays every watch registration by `delay`.
    pub fn set_registration_delay(&self, delay: Duration) {
        lock(&self.state.faults).registration_delay = Some(delay);
    }

    /// Fails every registered watch with `err` and drops them.
    pub fn emit_watch_error(&self, err: FirestoreError) {
        let sinks: Vec<WatchSink> = lock(&self.state.watches)
            .drain()
            .map(|(_, (_, sink))| sink)
            .collect();
        for sink in sinks {
            sink(WatchEvent::Error(err.clone()));
        }
    }

    pub fn active_watches(&self) -> usize {
        lock(&self.state.watches).len()
    }

    pub fn unregister_calls(&self) -> usize {
        self.state.unregister_calls.load(Ordering::SeqCst)
    }

    pub fn commit_calls(&self) -> usize {
        self.state.commit_calls.load(Ordering::SeqCst)
    }

    pub fn run_query_calls(&self) -> usize {
        self.state.run_query_calls.load(Ordering::SeqCst)
    }

    pub fn begin_transaction_calls(&self) -> usize {
        self.state.begin_transaction_calls.load(Ordering::SeqCst)
    }

    fn snapshot(key: &DocumentKey, stored: Option<&StoredDocument>) -> DocumentSnapshot {
        match stored {
            Some(stored) => DocumentSnapshot::new(
                key.clone(),
                Some(stored.data.clone()),
                SnapshotMetadata::default(),
            ),
            None => DocumentSnapshot::missing(key.clone()),
        }
    }

    fn query_documents(documents: &DocumentMap, query: &QueryDefinition) -> Vec<DocumentSnapshot> {
        let candidates = documents
            .iter()
            .filter(|(key, _)| query.matches_collection(key))
            .map(|(key, stored)| Self::snapshot(key, Some(stored)))
            .collect();
        apply_query_to_documents(candidates, query)
    }

    /// Applies `writes` to a copy of `documents` and swaps it in only when all
    /// of them succeed. The caller holds the documents lock for the whole call.
    fn apply_writes(
        &self,
        documents: &mut DocumentMap,
        writes: &[WriteOperation],
    ) -> FirestoreResult<Vec<DocumentKey>> {
        let fail_after = lock(&self.state.faults).fail_commit_after;
        let mut working = documents.clone();
        let now = Timestamp::now();
        let mut touched = Vec::with_capacity(writes.len());

        for (index, write) in writes.iter().enumerate() {
            if fail_after == Some(index) {
                return Err(internal_error(format!(
                    "Commit failed after {index} of {} writes",
                    writes.len()
                )));
            }
            let version = self.state.next_version.fetch_add(1, Ordering::SeqCst) + 1;
            apply_write(&mut working, write, version, &now)?;
            touched.push(write.key().clone());
        }

        *documents = working;
        Ok(touched)
    }

    fn notify_watches(&self, touched: &[DocumentKey]) {
        let targets: Vec<(WatchTarget, WatchSink)> = lock(&self.state.watches)
            .values()
            .filter(|(target, _)| match target {
                WatchTarget::Document(key) => touched.contains(key),
                WatchTarget::Query(query) => touched.iter().any(|key| query.matches_collection(key)),
            })
            .cloned()
            .collect();
        if targets.is_empty() {
            return;
        }

        let events: Vec<(WatchEvent, WatchSink)> = {
            let documents = lock(&self.state.documents);
            targets
                .into_iter()
                .map(|(target, sink)| (Self::current_event(&documents, &target), sink))
                .collect()
        };
        for (event, sink) in events {
            sink(event);
        }
    }

    fn current_event(documents: &DocumentMap, target: &WatchTarget) -> WatchEvent {
        match target {
            WatchTarget::Document(key) => WatchEvent::Document(Self::snapshot(key, documents.get(key))),
            WatchTarget::Query(query) => WatchEvent::Documents(Self::query_documents(documents, query)),
        }
    }
}

fn apply_write(
    documents: &mut DocumentMap,
    write: &WriteOperation,
    version: u64,
    now: &Timestamp,
) -> FirestoreResult<()> {
    match write {
        WriteOperation::Set { key, data, mask } => {
            let fields = match mask {
                None => {
                    let mut fields = BTreeMap::new();
                    for (name, value) in data.fields() {
                        let path = FieldPath::new([name.as_str()])?;
                        apply_field(&mut fields, &path, value, now);
                    }
                    fields
                }
                Some(mask) => {
                    let mut fields = documents
                        .get(key)
                        .map(|stored| stored.data.fields().clone())
                        .unwrap_or_default();
                    for path in mask {
                        match value_for_field_path(data, path) {
                            Some(value) => apply_field(&mut fields, path, &value, now),
                            None => delete_value_at_field_path(&mut fields, path),
                        }
                    }
                    fields
                }
            };
            documents.insert(
                key.clone(),
                StoredDocument {
                    data: MapValue::new(fields),
                    version,
                },
            );
        }
        WriteOperation::Update { key, fields: updates } => {
            let stored = documents.get(key).ok_or_else(|| {
                not_found(format!("No document to update: {}", key.path().canonical_string()))
            })?;
            let mut fields = stored.data.fields().clone();
            for (path, value) in updates {
                apply_field(&mut fields, path, value, now);
            }
            documents.insert(
                key.clone(),
                StoredDocument {
                    data: MapValue::new(fields),
                    version,
                },
            );
        }
        WriteOperation::Delete { key } => {
            documents.remove(key);
        }
    }
    Ok(())
}

fn apply_field(
    fields: &mut BTreeMap<String, FirestoreValue>,
    path: &FieldPath,
    value: &FirestoreValue,
    now: &Timestamp,
) {
    let existing = value_for_field_path(&MapValue::new(fields.clone()), path);
    match resolve_value(value, existing.as_ref(), now) {
        Some(resolved) => set_value_at_field_path(fields, path, resolved),
        None => delete_value_at_field_path(fields, path),
    }
}

/// Resolves write sentinels against the stored value. `None` deletes the field.
fn resolve_value(
    value: &FirestoreValue,
    existing: Option<&FirestoreValue>,
    now: &Timestamp,
) -> Option<FirestoreValue> {
    match value.kind() {
        ValueKind::Sentinel(sentinel) => resolve_sentinel(sentinel, existing, now),
        ValueKind::Map(map) if value.contains_sentinel() => {
            let existing_map = existing.and_then(FirestoreValue::as_map);
            let mut resolved = BTreeMap::new();
            for (name, child) in map.fields() {
                let previous = existing_map.and_then(|map| map.get(name));
                if let Some(child) = resolve_value(child, previous, now) {
                    resolved.insert(name.clone(), child);
                }
            }
            Some(FirestoreValue::from_map(resolved))
        }
        _ => Some(value.clone()),
    }
}

fn resolve_sentinel(
    sentinel: &SentinelValue,
    existing: Option<&FirestoreValue>,
    now: &Timestamp,
) -> Option<FirestoreValue> {
    match sentinel {
        SentinelValue::Delete => None,
        SentinelValue::ServerTimestamp => Some(FirestoreValue::from_timestamp(*now)),
        SentinelValue::NumericIncrement(operand) => {
            let current = existing.filter(|value| {
                matches!(value.kind(), ValueKind::Integer(_) | ValueKind::Double(_))
            });
            let Some(current) = current else {
                return Some(operand.as_ref().clone());
            };
            Some(match (current.kind(), operand.kind()) {
                (ValueKind::Integer(a), ValueKind::Integer(b)) => {
                    FirestoreValue::from_integer(a.saturating_add(*b))
                }
                _ => FirestoreValue::from_double(
                    current.as_f64().unwrap_or_default() + operand.as_f64().unwrap_or_default(),
                ),
            })
        }
        SentinelValue::ArrayUnion(elements) => {
            let mut values = existing
                .and_then(FirestoreValue::as_array)
                .map(|array| array.values().to_vec())
                .unwrap_or_default();
            for element in elements {
                if !values.contains(element) {
                    values.push(element.clone());
                }
            }
            Some(FirestoreValue::from_array(values))
        }
        SentinelValue::ArrayRemove(elements) => {
            let values = existing
                .and_then(FirestoreValue::as_array)
                .map(|array| {
                    array
                        .values()
                        .iter()
                        .filter(|value| !elements.contains(value))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            Some(FirestoreValue::from_array(values))
        }
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn get_document(&self, key: &DocumentKey) -> FirestoreResult<DocumentSnapshot> {
        let documents = lock(&self.state.documents);
        Ok(Self::snapshot(key, documents.get(key)))
    }

    async fn run_query(&self, query: &QueryDefinition) -> FirestoreResult<Vec<DocumentSnapshot>> {
        self.state.run_query_calls.fetch_add(1, Ordering::SeqCst);
        let documents = lock(&self.state.documents);
        Ok(Self::query_documents(&documents, query))
    }

    async fn commit(&self, writes: Vec<WriteOperation>) -> FirestoreResult<()> {
        self.state.commit_calls.fetch_add(1, Ordering::SeqCst);
        let touched = {
            let mut documents = lock(&self.state.documents);
            self.apply_writes(&mut documents, &writes)?
        };
        self.notify_watches(&touched);
        Ok(())
    }

    async fn begin_transaction(&self, keys: &[DocumentKey]) -> FirestoreResult<TransactionReads> {
        self.state
            .begin_transaction_calls
            .fetch_add(1, Ordering::SeqCst);
        let id = TransactionId::new(format!(
            "tx-{}",
            self.state.next_transaction.fetch_add(1, Ordering::SeqCst) + 1
        ));

        let results: Vec<TransactionResult> = {
            let documents = lock(&self.state.documents);
            keys.iter()
                .map(|key| match documents.get(key) {
                    Some(stored) => {
                        TransactionResult::new(key.clone(), Some(stored.data.clone()), stored.version)
                    }
                    None => TransactionResult::new(key.clone(), None, 0),
                })
                .collect()
        };

        let versions = results
            .iter()
            .map(|result| (result.key().clone(), result.version()))
            .collect();
        lock(&self.state.transactions).insert(id.clone(), versions);

        Ok(TransactionReads {
            id,
            documents: results,
        })
    }

    async fn commit_transaction(
        &self,
        transaction: &TransactionId,
        writes: Vec<WriteOperation>,
    ) -> FirestoreResult<()> {
        let reads = lock(&self.state.transactions)
            .remove(transaction)
            .ok_or_else(|| not_found(format!("Unknown transaction {transaction}")))?;

        {
            let mut faults = lock(&self.state.faults);
            if faults.transaction_conflicts > 0 {
                faults.transaction_conflicts -= 1;
                return Err(aborted(format!(
                    "Transaction {transaction} lost a race with a concurrent write"
                )));
            }
        }

        // Version check and apply share one guard so two transactions that read
        // the same version cannot both commit.
        let touched = {
            let mut documents = lock(&self.state.documents);
            let stale = reads.iter().find(|(key, version)| {
                documents.get(key).map(|stored| stored.version).unwrap_or(0) != *version
            });
            if let Some((key, _)) = stale {
                return Err(aborted(format!(
                    "Document {} changed since transaction {transaction} read it",
                    key.path().canonical_string()
                )));
            }
            self.state.commit_calls.fetch_add(1, Ordering::SeqCst);
            self.apply_writes(&mut documents, &writes)?
        };
        self.notify_watches(&touched);
        Ok(())
    }

    async fn rollback_transaction(&self, transaction: &TransactionId) -> FirestoreResult<()> {
        lock(&self.state.transactions).remove(transaction);
        Ok(())
    }

    async fn run_aggregate(
        &self,
        query: &QueryDefinition,
        aggregations: &[AggregateDefinition],
    ) -> FirestoreResult<BTreeMap<String, FirestoreValue>> {
        let documents = lock(&self.state.documents);
        let matched = Self::query_documents(&documents, query);
        Ok(evaluate_aggregates(&matched, aggregations))
    }

    async fn register_watch(&self, target: WatchTarget, sink: WatchSink) -> FirestoreResult<WatchHandle> {
        let delay = lock(&self.state.faults).registration_delay;
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        let handle = WatchHandle::new(self.state.next_watch.fetch_add(1, Ordering::SeqCst) + 1);
        let event = {
            let documents = lock(&self.state.documents);
            Self::current_event(&documents, &target)
        };
        lock(&self.state.watches).insert(handle.id(), (target, Arc::clone(&sink)));
        sink(event);
        Ok(handle)
    }

    async fn unregister_watch(&self, handle: WatchHandle) -> FirestoreResult<()> {
        self.state.unregister_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.watches).remove(&handle.id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::error::unavailable;
    use std::sync::atomic::AtomicUsize;

    fn key(path: &str) -> DocumentKey {
        DocumentKey::from_string(path).unwrap()
    }

    fn map(entries: &[(&str, FirestoreValue)]) -> MapValue {
        MapValue::new(
            entries
                .iter()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect(),
        )
    }

    fn field(path: &str) -> FieldPath {
        FieldPath::from_dot_separated(path).unwrap()
    }

    async fn read(store: &InMemoryDatastore, path: &str, name: &str) -> Option<FirestoreValue> {
        store
            .get_document(&key(path))
            .await
            .unwrap()
            .get(name)
            .unwrap()
    }

    #[tokio::test]
    async fn set_update_delete_roundtrip() {
        let store = InMemoryDatastore::new();
        store
            .commit(vec![
                WriteOperation::Set {
                    key: key("items/a"),
                    data: map(&[("x", FirestoreValue::from(1))]),
                    mask: None,
                },
                WriteOperation::Update {
                    key: key("items/a"),
                    fields: vec![(field("x"), FirestoreValue::from(2))],
                },
                WriteOperation::Delete { key: key("items/b") },
            ])
            .await
            .unwrap();
        assert_eq!(read(&store, "items/a", "x").await, Some(FirestoreValue::from(2)));
        assert!(!store.get_document(&key("items/b")).await.unwrap().exists());
    }

    #[tokio::test]
    async fn update_of_missing_document_is_not_found() {
        let store = InMemoryDatastore::new();
        let err = store
            .write(WriteOperation::Update {
                key: key("items/missing"),
                fields: vec![(field("x"), FirestoreValue::from(1))],
            })
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/not-found");
    }

    #[tokio::test]
    async fn failing_commit_leaves_store_untouched() {
        let store = InMemoryDatastore::new();
        store
            .write(WriteOperation::Set {
                key: key("items/b"),
                data: map(&[("x", FirestoreValue::from(9))]),
                mask: None,
            })
            .await
            .unwrap();
        store.fail_commit_after(1);
        let err = store
            .commit(vec![
                WriteOperation::Set {
                    key: key("items/a"),
                    data: map(&[("x", FirestoreValue::from(1))]),
                    mask: None,
                },
                WriteOperation::Delete { key: key("items/b") },
            ])
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/internal");
        assert!(!store.get_document(&key("items/a")).await.unwrap().exists());
        assert_eq!(read(&store, "items/b", "x").await, Some(FirestoreValue::from(9)));
    }

    #[tokio::test]
    async fn resolves_sentinels() {
        let store = InMemoryDatastore::new();
        store
            .write(WriteOperation::Set {
                key: key("items/a"),
                data: map(&[
                    ("count", FirestoreValue::from(1)),
                    ("tags", FirestoreValue::from_array(vec!["a".into()])),
                    ("stale", FirestoreValue::from(true)),
                ]),
                mask: None,
            })
            .await
            .unwrap();
        store
            .write(WriteOperation::Update {
                key: key("items/a"),
                fields: vec![
                    (field("count"), FirestoreValue::numeric_increment(2)),
                    (field("tags"), FirestoreValue::array_union(vec!["a".into(), "b".into()])),
                    (field("stale"), FirestoreValue::delete_field()),
                    (field("updated"), FirestoreValue::server_timestamp()),
                    (field("ratio"), FirestoreValue::numeric_increment(0.5)),
                ],
            })
            .await
            .unwrap();

        assert_eq!(read(&store, "items/a", "count").await, Some(FirestoreValue::from(3)));
        assert_eq!(
            read(&store, "items/a", "tags").await,
            Some(FirestoreValue::from_array(vec!["a".into(), "b".into()]))
        );
        assert_eq!(read(&store, "items/a", "stale").await, None);
        assert_eq!(read(&store, "items/a", "ratio").await, Some(FirestoreValue::from(0.5)));
        assert!(matches!(
            read(&store, "items/a", "updated").await.map(|value| value.kind().clone()),
            Some(ValueKind::Timestamp(_))
        ));
    }

    #[tokio::test]
    async fn merge_set_keeps_unmasked_fields() {
        let store = InMemoryDatastore::new();
        store
            .write(WriteOperation::Set {
                key: key("items/a"),
                data: map(&[("x", FirestoreValue::from(1)), ("y", FirestoreValue::from(1))]),
                mask: None,
            })
            .await
            .unwrap();
        store
            .write(WriteOperation::Set {
                key: key("items/a"),
                data: map(&[("y", FirestoreValue::from(5))]),
                mask: Some(vec![field("y")]),
            })
            .await
            .unwrap();
        assert_eq!(read(&store, "items/a", "x").await, Some(FirestoreValue::from(1)));
        assert_eq!(read(&store, "items/a", "y").await, Some(FirestoreValue::from(5)));
    }

    #[tokio::test]
    async fn transaction_detects_concurrent_write() {
        let store = InMemoryDatastore::new();
        let reads = store.begin_transaction(&[key("items/a")]).await.unwrap();
        assert!(!reads.documents[0].exists());

        store
            .write(WriteOperation::Set {
                key: key("items/a"),
                data: map(&[("x", FirestoreValue::from(1))]),
                mask: None,
            })
            .await
            .unwrap();

        let err = store
            .commit_transaction(&reads.id, vec![WriteOperation::Delete { key: key("items/a") }])
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/aborted");
        assert!(store.get_document(&key("items/a")).await.unwrap().exists());
    }

    #[tokio::test]
    async fn watches_receive_initial_and_follow_up_events() {
        let store = InMemoryDatastore::new();
        let events = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&events);
        let sink: WatchSink = Arc::new(move |event| {
            if let WatchEvent::Document(_) = event {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        let handle = store
            .register_watch(WatchTarget::Document(key("items/a")), sink)
            .await
            .unwrap();
        assert_eq!(events.load(Ordering::SeqCst), 1);

        store.write(WriteOperation::Delete { key: key("items/a") }).await.unwrap();
        store.write(WriteOperation::Delete { key: key("items/other") }).await.unwrap();
        assert_eq!(events.load(Ordering::SeqCst), 2);

        store.unregister_watch(handle).await.unwrap();
        store.unregister_watch(handle).await.unwrap();
        assert_eq!(store.unregister_calls(), 2);
        assert_eq!(store.active_watches(), 0);
    }

    #[tokio::test]
    async fn emitted_errors_drop_watches() {
        let store = InMemoryDatastore::new();
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        let sink: WatchSink = Arc::new(move |event| {
            if let WatchEvent::Error(_) = event {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        store
            .register_watch(WatchTarget::Document(key("items/a")), sink)
            .await
            .unwrap();
        store.emit_watch_error(unavailable("reset"));
        store.emit_watch_error(unavailable("reset"));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(store.active_watches(), 0);
    }
}
