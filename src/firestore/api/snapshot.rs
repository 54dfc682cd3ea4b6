use std::collections::BTreeMap;
use std::sync::Arc;

use crate::firestore::error::FirestoreResult;
use crate::firestore::model::{DocumentKey, IntoFieldPath};
use crate::firestore::value::{FirestoreValue, MapValue};

use super::operations::value_for_field_path;
use super::reference::DocumentReference;
use super::{Firestore, FirestoreDataConverter};

/// Metadata about the state of a document snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnapshotMetadata {
    from_cache: bool,
    has_pending_writes: bool,
}

impl SnapshotMetadata {
    /// Creates metadata with the provided cache/pending-write flags.
    pub fn new(from_cache: bool, has_pending_writes: bool) -> Self {
        Self {
            from_cache,
            has_pending_writes,
        }
    }

    /// Indicates whether the snapshot was served from a local cache.
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    /// Indicates whether the snapshot contains uncommitted local mutations.
    pub fn has_pending_writes(&self) -> bool {
        self.has_pending_writes
    }
}

/// The state of one document at read time. A snapshot of a missing document
/// has no data.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSnapshot {
    key: DocumentKey,
    data: Option<MapValue>,
    metadata: SnapshotMetadata,
}

impl DocumentSnapshot {
    pub fn new(key: DocumentKey, data: Option<MapValue>, metadata: SnapshotMetadata) -> Self {
        Self {
            key,
            data,
            metadata,
        }
    }

    /// Snapshot of a document that does not exist.
    pub fn missing(key: DocumentKey) -> Self {
        Self::new(key, None, SnapshotMetadata::default())
    }

    /// Returns whether the document exists on the backend.
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    /// Returns the decoded document fields if the snapshot contains data.
    pub fn data(&self) -> Option<&BTreeMap<String, FirestoreValue>> {
        self.data.as_ref().map(|map| map.fields())
    }

    pub fn map_value(&self) -> Option<&MapValue> {
        self.data.as_ref()
    }

    /// Reads a single (possibly nested) field.
    ///
    /// `__name__` resolves to the document path. Returns `Ok(None)` when the
    /// document is missing or the field is absent.
    pub fn get(&self, field: impl IntoFieldPath) -> FirestoreResult<Option<FirestoreValue>> {
        let path = field.into_field_path()?;
        if path.is_document_id() {
            return Ok(Some(FirestoreValue::from_string(
                self.key.path().canonical_string(),
            )));
        }
        Ok(self
            .data
            .as_ref()
            .and_then(|map| value_for_field_path(map, &path)))
    }

    /// Returns snapshot metadata describing cache and mutation state.
    pub fn metadata(&self) -> &SnapshotMetadata {
        &self.metadata
    }

    pub fn id(&self) -> &str {
        self.key.id()
    }

    pub fn document_key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn reference(&self, firestore: Firestore) -> FirestoreResult<DocumentReference> {
        DocumentReference::new(firestore, self.key.path().clone())
    }

    pub fn into_typed<C>(self, converter: Arc<C>) -> TypedDocumentSnapshot<C>
    where
        C: FirestoreDataConverter,
    {
        TypedDocumentSnapshot::new(self, converter)
    }
}

/// A document snapshot decoded through a data converter on access.
#[derive(Clone)]
pub struct TypedDocumentSnapshot<C>
where
    C: FirestoreDataConverter,
{
    base: DocumentSnapshot,
    converter: Arc<C>,
}

impl<C> TypedDocumentSnapshot<C>
where
    C: FirestoreDataConverter,
{
    pub(crate) fn new(base: DocumentSnapshot, converter: Arc<C>) -> Self {
        Self { base, converter }
    }

    /// Decodes the document; `Ok(None)` when it does not exist.
    pub fn data(&self) -> FirestoreResult<Option<C::Model>> {
        match self.base.map_value() {
            Some(map) => self.converter.from_map(map).map(Some),
            None => Ok(None),
        }
    }

    pub fn exists(&self) -> bool {
        self.base.exists()
    }

    pub fn id(&self) -> &str {
        self.base.id()
    }

    /// Returns the underlying untyped snapshot.
    pub fn raw(&self) -> &DocumentSnapshot {
        &self.base
    }

    pub fn into_raw(self) -> DocumentSnapshot {
        self.base
    }
}
