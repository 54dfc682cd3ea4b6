use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::firestore::constants::AUTO_ID_LENGTH;
use crate::firestore::error::{internal_error, invalid_argument, FirestoreResult};
use crate::firestore::model::{DocumentKey, IntoFieldPath, ResourcePath};
use crate::firestore::remote::datastore::{WatchEvent, WatchTarget, WriteOperation};
use crate::firestore::value::FirestoreValue;
use crate::util::PartialObserver;

use super::converter::FirestoreDataConverter;
use super::database::Firestore;
use super::listener::{ListenerRegistration, SnapshotStream};
use super::operations::{self, SetOptions};
use super::predicate::Expr;
use super::query::{ConvertedQuery, Query, QuerySnapshot};
use super::snapshot::{DocumentSnapshot, TypedDocumentSnapshot};

#[derive(Clone, Debug)]
pub struct CollectionReference {
    firestore: Firestore,
    path: ResourcePath,
}

impl CollectionReference {
    pub(crate) fn new(firestore: Firestore, path: ResourcePath) -> FirestoreResult<Self> {
        if path.len() % 2 == 0 {
            return Err(invalid_argument(
                "Collection references must point to a collection (odd number of segments)",
            ));
        }
        Ok(Self { firestore, path })
    }

    /// Returns the Firestore instance that created this collection reference.
    pub fn firestore(&self) -> &Firestore {
        &self.firestore
    }

    /// The full resource path of the collection (e.g. `rooms/eros/messages`).
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// The last segment of the collection path.
    pub fn id(&self) -> &str {
        self.path.last_segment().unwrap_or_default()
    }

    /// Returns the document that logically contains this collection, if any.
    pub fn parent(&self) -> Option<DocumentReference> {
        let parent_path = self.path.without_last();
        if parent_path.is_empty() {
            return None;
        }
        DocumentReference::new(self.firestore.clone(), parent_path).ok()
    }

    /// Returns a reference to the document identified by `document_id`.
    ///
    /// When `document_id` is `None`, an auto-ID is generated.
    pub fn doc(&self, document_id: Option<&str>) -> FirestoreResult<DocumentReference> {
        let id = document_id
            .map(|id| id.to_string())
            .unwrap_or_else(generate_auto_id);
        if id.is_empty() || id.contains('/') {
            return Err(invalid_argument(
                "Document ID must be non-empty and cannot contain '/'",
            ));
        }
        let path = self.path.child([id]);
        DocumentReference::new(self.firestore.clone(), path)
    }

    /// Writes `data` to a new document with an auto-generated ID.
    pub async fn add(
        &self,
        data: BTreeMap<String, FirestoreValue>,
    ) -> FirestoreResult<DocumentReference> {
        let reference = self.doc(None)?;
        reference.set(data, None).await?;
        Ok(reference)
    }

    pub fn with_converter<C>(&self, converter: C) -> ConvertedCollectionReference<C>
    where
        C: FirestoreDataConverter,
    {
        ConvertedCollectionReference {
            inner: self.clone(),
            converter: Arc::new(converter),
        }
    }

    /// Creates a query that targets this collection.
    pub fn query(&self) -> Query {
        Query::new(self.firestore.clone(), self.path.clone())
    }

    pub fn filter(&self, predicate: Expr) -> FirestoreResult<Query> {
        self.query().filter(predicate)
    }

    pub fn order_by(&self, field: impl IntoFieldPath) -> FirestoreResult<Query> {
        self.query().order_by(field)
    }

    pub fn order_by_descending(&self, field: impl IntoFieldPath) -> FirestoreResult<Query> {
        self.query().order_by_descending(field)
    }

    pub fn take(&self, limit: u32) -> FirestoreResult<Query> {
        self.query().take(limit)
    }

    /// Reads every document in the collection.
    pub async fn get(&self) -> FirestoreResult<QuerySnapshot> {
        self.query().get().await
    }
}

impl Display for CollectionReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CollectionReference({})", self.path.canonical_string())
    }
}

#[derive(Clone, Debug)]
pub struct DocumentReference {
    firestore: Firestore,
    key: DocumentKey,
}

impl DocumentReference {
    pub(crate) fn new(firestore: Firestore, path: ResourcePath) -> FirestoreResult<Self> {
        let key = DocumentKey::from_path(path)?;
        Ok(Self { firestore, key })
    }

    /// Returns the Firestore instance that created this document reference.
    pub fn firestore(&self) -> &Firestore {
        &self.firestore
    }

    /// The document identifier (the last segment of its path).
    pub fn id(&self) -> &str {
        self.key.id()
    }

    /// The full resource path to the document.
    pub fn path(&self) -> &ResourcePath {
        self.key.path()
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// The parent collection containing this document.
    pub fn parent(&self) -> CollectionReference {
        CollectionReference {
            firestore: self.firestore.clone(),
            path: self.key.collection_path(),
        }
    }

    /// Returns a reference to a subcollection rooted at this document.
    pub fn collection(&self, path: &str) -> FirestoreResult<CollectionReference> {
        let sub_path = ResourcePath::from_string(path)?;
        let full_path = self.key.path().child(sub_path.segments().iter().cloned());
        CollectionReference::new(self.firestore.clone(), full_path)
    }

    /// Reads the document. A missing document yields a snapshot without data.
    pub async fn get(&self) -> FirestoreResult<DocumentSnapshot> {
        self.firestore.datastore().get_document(&self.key).await
    }

    /// Writes the document, replacing it unless `options` request a merge.
    pub async fn set(
        &self,
        data: BTreeMap<String, FirestoreValue>,
        options: Option<SetOptions>,
    ) -> FirestoreResult<()> {
        let options = options.unwrap_or_default();
        let write = operations::set_operation(self.key.clone(), data, &options)?;
        self.firestore.datastore().write(write).await
    }

    /// Updates fields of an existing document. Keys are dot-separated paths.
    pub async fn update(&self, data: BTreeMap<String, FirestoreValue>) -> FirestoreResult<()> {
        let write = operations::update_operation(self.key.clone(), data)?;
        self.firestore.datastore().write(write).await
    }

    pub async fn delete(&self) -> FirestoreResult<()> {
        let write = WriteOperation::Delete {
            key: self.key.clone(),
        };
        self.firestore.datastore().write(write).await
    }

    /// Listens to the document; every change produces a new snapshot.
    pub fn on_snapshot(&self, observer: PartialObserver<DocumentSnapshot>) -> ListenerRegistration {
        self.firestore.listeners().listen(
            WatchTarget::Document(self.key.clone()),
            document_decoder(self.key.clone()),
            observer,
        )
    }

    /// Same feed as [`DocumentReference::on_snapshot`] exposed as an async stream.
    pub fn snapshots(&self) -> SnapshotStream<DocumentSnapshot> {
        self.firestore.listeners().stream(
            WatchTarget::Document(self.key.clone()),
            document_decoder(self.key.clone()),
        )
    }

    /// Returns a typed document reference using the provided converter.
    pub fn with_converter<C>(&self, converter: C) -> ConvertedDocumentReference<C>
    where
        C: FirestoreDataConverter,
    {
        ConvertedDocumentReference::new(self.clone(), Arc::new(converter))
    }
}

impl Display for DocumentReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DocumentReference({})",
            self.key.path().canonical_string()
        )
    }
}

fn document_decoder(
    key: DocumentKey,
) -> impl FnMut(WatchEvent) -> FirestoreResult<DocumentSnapshot> + Send + 'static {
    move |event| match event {
        WatchEvent::Document(snapshot) => Ok(snapshot),
        WatchEvent::Documents(_) => Err(internal_error(format!(
            "Document watch on '{key}' received a query result event"
        ))),
        WatchEvent::Error(err) => Err(err),
    }
}

fn generate_auto_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(AUTO_ID_LENGTH)
        .collect()
}

#[derive(Clone)]
pub struct ConvertedCollectionReference<C>
where
    C: FirestoreDataConverter,
{
    inner: CollectionReference,
    converter: Arc<C>,
}

impl<C> ConvertedCollectionReference<C>
where
    C: FirestoreDataConverter,
{
    /// Accesses the underlying Firestore instance.
    pub fn firestore(&self) -> &Firestore {
        self.inner.firestore()
    }

    /// Full resource path for the collection.
    pub fn path(&self) -> &ResourcePath {
        self.inner.path()
    }

    /// The collection identifier (last path segment).
    pub fn id(&self) -> &str {
        self.inner.id()
    }

    /// Returns a typed document reference within this collection.
    pub fn doc(&self, document_id: Option<&str>) -> FirestoreResult<ConvertedDocumentReference<C>> {
        let document = self.inner.doc(document_id)?;
        Ok(ConvertedDocumentReference::new(
            document,
            Arc::clone(&self.converter),
        ))
    }

    /// Encodes `model` and writes it under an auto-generated ID.
    pub async fn add(&self, model: C::Model) -> FirestoreResult<ConvertedDocumentReference<C>> {
        let reference = self.doc(None)?;
        reference.set(model, None).await?;
        Ok(reference)
    }

    /// Provides access to the untyped collection reference.
    pub fn raw(&self) -> &CollectionReference {
        &self.inner
    }

    /// Creates a query for the underlying collection using this converter.
    pub fn query(&self) -> ConvertedQuery<C> {
        ConvertedQuery::new(self.inner.query(), Arc::clone(&self.converter))
    }
}

#[derive(Clone)]
pub struct ConvertedDocumentReference<C>
where
    C: FirestoreDataConverter,
{
    reference: DocumentReference,
    converter: Arc<C>,
}

impl<C> ConvertedDocumentReference<C>
where
    C: FirestoreDataConverter,
{
    fn new(reference: DocumentReference, converter: Arc<C>) -> Self {
        Self {
            reference,
            converter,
        }
    }

    /// Accesses the underlying Firestore instance.
    pub fn firestore(&self) -> &Firestore {
        self.reference.firestore()
    }

    /// The document identifier assigned to this reference.
    pub fn id(&self) -> &str {
        self.reference.id()
    }

    /// Full resource path for the document.
    pub fn path(&self) -> &ResourcePath {
        self.reference.path()
    }

    /// Returns the parent collection.
    pub fn parent(&self) -> CollectionReference {
        self.reference.parent()
    }

    /// Provides access to the untyped document reference.
    pub fn raw(&self) -> &DocumentReference {
        &self.reference
    }

    /// Clones the converter used to map data for this reference.
    pub fn converter(&self) -> Arc<C> {
        Arc::clone(&self.converter)
    }

    pub async fn get(&self) -> FirestoreResult<TypedDocumentSnapshot<C>> {
        let snapshot = self.reference.get().await?;
        Ok(snapshot.into_typed(self.converter()))
    }

    pub async fn set(&self, model: C::Model, options: Option<SetOptions>) -> FirestoreResult<()> {
        let map = self.converter.to_map(&model)?;
        self.reference.set(map, options).await
    }

    pub async fn update(&self, data: BTreeMap<String, FirestoreValue>) -> FirestoreResult<()> {
        self.reference.update(data).await
    }

    pub async fn delete(&self) -> FirestoreResult<()> {
        self.reference.delete().await
    }

    pub fn on_snapshot(
        &self,
        observer: PartialObserver<TypedDocumentSnapshot<C>>,
    ) -> ListenerRegistration {
        let mut decode = document_decoder(self.reference.key.clone());
        let converter = self.converter();
        self.reference.firestore.listeners().listen(
            WatchTarget::Document(self.reference.key.clone()),
            move |event| decode(event).map(|snapshot| snapshot.into_typed(Arc::clone(&converter))),
            observer,
        )
    }

    pub fn with_converter<D>(&self, converter: D) -> ConvertedDocumentReference<D>
    where
        D: FirestoreDataConverter,
    {
        ConvertedDocumentReference::new(self.reference.clone(), Arc::new(converter))
    }
}
