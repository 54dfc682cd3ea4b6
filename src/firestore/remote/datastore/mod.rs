use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use async_trait::async_trait;

use crate::firestore::api::aggregate::AggregateDefinition;
use crate::firestore::api::query::QueryDefinition;
use crate::firestore::api::{DocumentSnapshot, SnapshotMetadata};
use crate::firestore::error::{FirestoreError, FirestoreResult};
use crate::firestore::model::{DocumentKey, FieldPath};
use crate::firestore::value::{FirestoreValue, MapValue};

pub mod in_memory;

/// A single mutation submitted to the backend on its own, inside a batch or
/// inside a transaction commit.
///
/// Field values may still carry write sentinels; the backend resolves them
/// when the operation is applied.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOperation {
    Set {
        key: DocumentKey,
        data: MapValue,
        /// Leaf paths to merge into the existing document. `None` replaces it.
        mask: Option<Vec<FieldPath>>,
    },
    Update {
        key: DocumentKey,
        fields: Vec<(FieldPath, FirestoreValue)>,
    },
    Delete {
        key: DocumentKey,
    },
}

/// Discriminant of a [`WriteOperation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WriteKind {
    Set,
    Update,
    Delete,
}

impl WriteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteKind::Set => "set",
            WriteKind::Update => "update",
            WriteKind::Delete => "delete",
        }
    }
}

impl WriteOperation {
    pub fn key(&self) -> &DocumentKey {
        match self {
            WriteOperation::Set { key, .. }
            | WriteOperation::Update { key, .. }
            | WriteOperation::Delete { key } => key,
        }
    }

    pub fn kind(&self) -> WriteKind {
        match self {
            WriteOperation::Set { .. } => WriteKind::Set,
            WriteOperation::Update { .. } => WriteKind::Update,
            WriteOperation::Delete { .. } => WriteKind::Delete,
        }
    }

    /// Returns `true` for a set that merges into the existing document.
    pub fn merge(&self) -> bool {
        matches!(self, WriteOperation::Set { mask: Some(_), .. })
    }
}

/// Backend identifier of an open transaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// State of one document as read when a transaction was opened.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionResult {
    key: DocumentKey,
    data: Option<MapValue>,
    version: u64,
}

impl TransactionResult {
    pub fn new(key: DocumentKey, data: Option<MapValue>, version: u64) -> Self {
        Self { key, data, version }
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn data(&self) -> Option<&MapValue> {
        self.data.as_ref()
    }

    /// Backend version of the document at read time, `0` when it did not exist.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn into_snapshot(self) -> DocumentSnapshot {
        DocumentSnapshot::new(self.key, self.data, SnapshotMetadata::default())
    }
}

/// Outcome of [`Datastore::begin_transaction`]: the transaction id and every
/// requested document, in request order.
#[derive(Clone, Debug)]
pub struct TransactionReads {
    pub id: TransactionId,
    pub documents: Vec<TransactionResult>,
}

/// What a real-time watch observes.
#[derive(Clone, Debug)]
pub enum WatchTarget {
    Document(DocumentKey),
    Query(QueryDefinition),
}

/// Notification pushed by the backend for a registered watch.
#[derive(Clone, Debug)]
pub enum WatchEvent {
    /// Current state of a watched document (possibly missing).
    Document(DocumentSnapshot),
    /// Full current result set of a watched query.
    Documents(Vec<DocumentSnapshot>),
    /// The watch failed; no further events follow.
    Error(FirestoreError),
}

/// Callback the backend invokes for every watch notification, on whatever
/// thread produced it.
pub type WatchSink = Arc<dyn Fn(WatchEvent) + Send + Sync + 'static>;

/// Backend handle identifying a registered watch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchHandle(u64);

impl WatchHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Transport contract consumed by the client core.
///
/// Implementations own the network (or simulation); every method suspends
/// the caller until the backend answers and reports backend failures as
/// [`FirestoreError`] values.
#[async_trait]
pub trait Datastore: Send + Sync + 'static {
    async fn get_document(&self, key: &DocumentKey) -> FirestoreResult<DocumentSnapshot>;

    async fn run_query(&self, query: &QueryDefinition) -> FirestoreResult<Vec<DocumentSnapshot>>;

    /// Applies a single write.
    async fn write(&self, write: WriteOperation) -> FirestoreResult<()> {
        self.commit(vec![write]).await
    }

    /// Applies every write atomically, in order.
    async fn commit(&self, writes: Vec<WriteOperation>) -> FirestoreResult<()>;

    /// Opens a transaction and reads `keys` in one round-trip.
    async fn begin_transaction(&self, keys: &[DocumentKey]) -> FirestoreResult<TransactionReads>;

    /// Commits the writes of an open transaction. A conflict with a
    /// concurrent writer is reported as `firestore/aborted`.
    async fn commit_transaction(
        &self,
        transaction: &TransactionId,
        writes: Vec<WriteOperation>,
    ) -> FirestoreResult<()>;

    async fn rollback_transaction(&self, transaction: &TransactionId) -> FirestoreResult<()>;

    /// Evaluates aggregations server-side, keyed by alias.
    async fn run_aggregate(
        &self,
        query: &QueryDefinition,
        aggregations: &[AggregateDefinition],
    ) -> FirestoreResult<BTreeMap<String, FirestoreValue>>;

    async fn register_watch(&self, target: WatchTarget, sink: WatchSink) -> FirestoreResult<WatchHandle>;

    async fn unregister_watch(&self, handle: WatchHandle) -> FirestoreResult<()>;
}

pub use in_memory::InMemoryDatastore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_operation_accessors() {
        let key = DocumentKey::from_string("cities/sf").unwrap();
        let merge = WriteOperation::Set {
            key: key.clone(),
            data: MapValue::default(),
            mask: Some(Vec::new()),
        };
        assert!(merge.merge());
        assert_eq!(merge.kind().as_str(), "set");

        let delete = WriteOperation::Delete { key: key.clone() };
        assert!(!delete.merge());
        assert_eq!(delete.key(), &key);
    }

    #[test]
    fn transaction_result_reports_existence() {
        let key = DocumentKey::from_string("cities/sf").unwrap();
        let missing = TransactionResult::new(key.clone(), None, 0);
        assert!(!missing.exists());
        assert!(!missing.into_snapshot().exists());
    }
}
