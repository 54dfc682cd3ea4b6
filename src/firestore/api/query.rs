use std::sync::{Arc, Mutex};

use crate::firestore::error::{
    failed_precondition, internal_error, invalid_argument, unimplemented, FirestoreResult,
};
use crate::firestore::model::{DocumentKey, FieldPath, IntoFieldPath, ResourcePath};
use crate::firestore::remote::datastore::{WatchEvent, WatchTarget};
use crate::firestore::value::{FirestoreValue, ValueKind};
use crate::util::PartialObserver;

use super::cursor::{CursorBound, CursorKind};
use super::listener::{ListenerRegistration, SnapshotStream};
use super::predicate::{compile_predicate, Expr};
use super::snapshot::{DocumentSnapshot, SnapshotMetadata};
use super::{Firestore, FirestoreDataConverter, TypedDocumentSnapshot};

/// Comparison applied by a single query clause.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    ArrayContains,
    ArrayContainsAny,
    In,
    NotIn,
}

impl FilterOperator {
    /// Operator symbol as written in predicates (`>=`, `array-contains`, ...).
    pub fn symbol(&self) -> &'static str {
        match self {
            FilterOperator::Equal => "==",
            FilterOperator::NotEqual => "!=",
            FilterOperator::LessThan => "<",
            FilterOperator::LessThanOrEqual => "<=",
            FilterOperator::GreaterThan => ">",
            FilterOperator::GreaterThanOrEqual => ">=",
            FilterOperator::ArrayContains => "array-contains",
            FilterOperator::ArrayContainsAny => "array-contains-any",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not-in",
        }
    }

    /// Operator name used by the wire format.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Equal => "EQUAL",
            FilterOperator::NotEqual => "NOT_EQUAL",
            FilterOperator::LessThan => "LESS_THAN",
            FilterOperator::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            FilterOperator::GreaterThan => "GREATER_THAN",
            FilterOperator::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            FilterOperator::ArrayContains => "ARRAY_CONTAINS",
            FilterOperator::ArrayContainsAny => "ARRAY_CONTAINS_ANY",
            FilterOperator::In => "IN",
            FilterOperator::NotIn => "NOT_IN",
        }
    }

    fn requires_list(&self) -> bool {
        matches!(
            self,
            FilterOperator::In | FilterOperator::NotIn | FilterOperator::ArrayContainsAny
        )
    }
}

/// One compiled query clause: `field operator value`.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldFilter {
    field: FieldPath,
    operator: FilterOperator,
    value: FirestoreValue,
}

impl FieldFilter {
    pub fn new(
        field: FieldPath,
        operator: FilterOperator,
        value: FirestoreValue,
    ) -> FirestoreResult<Self> {
        if value.contains_sentinel() {
            return Err(invalid_argument(format!(
                "Sentinel values cannot be used in a '{}' filter on '{}'",
                operator.symbol(),
                field
            )));
        }
        if operator.requires_list() {
            match value.kind() {
                ValueKind::Array(values) if !values.values().is_empty() => {}
                _ => {
                    return Err(invalid_argument(format!(
                        "A non-empty list is required for '{}' filters on '{}'",
                        operator.symbol(),
                        field
                    )))
                }
            }
        }
        Ok(Self {
            field,
            operator,
            value,
        })
    }

    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    pub fn value(&self) -> &FirestoreValue {
        &self.value
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OrderDirection {
    Ascending,
    Descending,
}

impl OrderDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderDirection::Ascending => "ASCENDING",
            OrderDirection::Descending => "DESCENDING",
        }
    }

    fn reversed(&self) -> Self {
        match self {
            OrderDirection::Ascending => OrderDirection::Descending,
            OrderDirection::Descending => OrderDirection::Ascending,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    field: FieldPath,
    direction: OrderDirection,
}

impl OrderBy {
    pub fn new(field: FieldPath, direction: OrderDirection) -> Self {
        Self { field, direction }
    }

    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn direction(&self) -> OrderDirection {
        self.direction
    }
}

/// Which end of the ordered result set a limit keeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LimitType {
    #[default]
    First,
    Last,
}

/// An encoded cursor: one value per ordering plus inclusivity.
#[derive(Clone, Debug, PartialEq)]
pub struct Bound {
    values: Vec<FirestoreValue>,
    inclusive: bool,
}

impl Bound {
    pub fn new(values: Vec<FirestoreValue>, inclusive: bool) -> Self {
        Self { values, inclusive }
    }

    pub fn values(&self) -> &[FirestoreValue] {
        &self.values
    }

    pub fn inclusive(&self) -> bool {
        self.inclusive
    }
}

/// An immutable query descriptor over one collection.
///
/// Every chain method returns a new `Query`; nothing is sent to the backend
/// until a terminal operation (`get`, `on_snapshot`, `snapshots`, `count`,
/// `sum`, `average`, `aggregate`) runs.
#[derive(Clone, Debug)]
pub struct Query {
    firestore: Firestore,
    collection_path: ResourcePath,
    filters: Vec<FieldFilter>,
    order_by: Vec<OrderBy>,
    limit: Option<u32>,
    limit_type: LimitType,
    start: Option<CursorBound>,
    end: Option<CursorBound>,
}

impl Query {
    /// `collection_path` must already be validated as a collection path.
    pub(crate) fn new(firestore: Firestore, collection_path: ResourcePath) -> Self {
        Self {
            firestore,
            collection_path,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            limit_type: LimitType::First,
            start: None,
            end: None,
        }
    }

    /// Returns the Firestore instance that created this query.
    pub fn firestore(&self) -> &Firestore {
        &self.firestore
    }

    /// Returns the full resource path to the targeted collection.
    pub fn collection_path(&self) -> &ResourcePath {
        &self.collection_path
    }

    /// The identifier (last segment) of the targeted collection.
    pub fn collection_id(&self) -> &str {
        self.collection_path.last_segment().unwrap_or_default()
    }

    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    pub fn orderings(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn limit_type(&self) -> LimitType {
        self.limit_type
    }

    pub fn start_bound(&self) -> Option<&CursorBound> {
        self.start.as_ref()
    }

    pub fn end_bound(&self) -> Option<&CursorBound> {
        self.end.as_ref()
    }

    /// Compiles `predicate` and appends its clauses to this query.
    ///
    /// Fails with `firestore/unsupported-predicate` when the predicate uses
    /// a construct the backend cannot express.
    pub fn filter(&self, predicate: Expr) -> FirestoreResult<Query> {
        let clauses = compile_predicate(&predicate)?;
        let mut next = self.clone();
        next.filters.extend(clauses);
        Ok(next)
    }

    /// Adds one clause without going through the predicate builder.
    pub fn where_field(
        &self,
        field: impl IntoFieldPath,
        operator: FilterOperator,
        value: impl Into<FirestoreValue>,
    ) -> FirestoreResult<Query> {
        let filter = FieldFilter::new(field.into_field_path()?, operator, value.into())?;
        let mut next = self.clone();
        next.filters.push(filter);
        Ok(next)
    }

    pub fn order_by(&self, field: impl IntoFieldPath) -> FirestoreResult<Query> {
        self.order_by_direction(field, OrderDirection::Ascending)
    }

    pub fn order_by_descending(&self, field: impl IntoFieldPath) -> FirestoreResult<Query> {
        self.order_by_direction(field, OrderDirection::Descending)
    }

    pub fn order_by_direction(
        &self,
        field: impl IntoFieldPath,
        direction: OrderDirection,
    ) -> FirestoreResult<Query> {
        let mut next = self.clone();
        next.order_by
            .push(OrderBy::new(field.into_field_path()?, direction));
        Ok(next)
    }

    /// Keeps at most `limit` documents from the start of the ordered results.
    pub fn take(&self, limit: u32) -> FirestoreResult<Query> {
        self.with_limit(limit, LimitType::First)
    }

    /// Keeps at most `limit` documents from the end of the ordered results.
    pub fn limit_to_last(&self, limit: u32) -> FirestoreResult<Query> {
        self.with_limit(limit, LimitType::Last)
    }

    fn with_limit(&self, limit: u32, limit_type: LimitType) -> FirestoreResult<Query> {
        if limit == 0 {
            return Err(invalid_argument("Query limit must be greater than zero"));
        }
        let mut next = self.clone();
        next.limit = Some(limit);
        next.limit_type = limit_type;
        Ok(next)
    }

    /// Offset pagination is not available on a cursor-based store; this
    /// always fails without contacting the backend.
    pub fn skip(&self, count: u32) -> FirestoreResult<Query> {
        Err(unimplemented(format!(
            "skip({count}) is not supported: paginate with order_by() plus start_after() \
             (or start_at/end_at/end_before) using the last value of the previous page"
        )))
    }

    pub fn start_at<I, V>(&self, values: I) -> Query
    where
        I: IntoIterator<Item = V>,
        V: Into<FirestoreValue>,
    {
        self.with_cursor(CursorBound::from_values(CursorKind::StartAt, values))
    }

    pub fn start_after<I, V>(&self, values: I) -> Query
    where
        I: IntoIterator<Item = V>,
        V: Into<FirestoreValue>,
    {
        self.with_cursor(CursorBound::from_values(CursorKind::StartAfter, values))
    }

    pub fn end_at<I, V>(&self, values: I) -> Query
    where
        I: IntoIterator<Item = V>,
        V: Into<FirestoreValue>,
    {
        self.with_cursor(CursorBound::from_values(CursorKind::EndAt, values))
    }

    pub fn end_before<I, V>(&self, values: I) -> Query
    where
        I: IntoIterator<Item = V>,
        V: Into<FirestoreValue>,
    {
        self.with_cursor(CursorBound::from_values(CursorKind::EndBefore, values))
    }

    pub fn start_at_snapshot(&self, snapshot: &DocumentSnapshot) -> Query {
        self.with_cursor(CursorBound::from_snapshot(CursorKind::StartAt, snapshot))
    }

    pub fn start_after_snapshot(&self, snapshot: &DocumentSnapshot) -> Query {
        self.with_cursor(CursorBound::from_snapshot(CursorKind::StartAfter, snapshot))
    }

    pub fn end_at_snapshot(&self, snapshot: &DocumentSnapshot) -> Query {
        self.with_cursor(CursorBound::from_snapshot(CursorKind::EndAt, snapshot))
    }

    pub fn end_before_snapshot(&self, snapshot: &DocumentSnapshot) -> Query {
        self.with_cursor(CursorBound::from_snapshot(CursorKind::EndBefore, snapshot))
    }

    fn with_cursor(&self, cursor: CursorBound) -> Query {
        let mut next = self.clone();
        if cursor.kind().is_start() {
            next.start = Some(cursor);
        } else {
            next.end = Some(cursor);
        }
        next
    }

    /// Validates the descriptor and encodes its cursors.
    ///
    /// Runs before every backend call so malformed queries never leave the
    /// client.
    pub(crate) fn definition(&self) -> FirestoreResult<QueryDefinition> {
        if self.limit_type == LimitType::Last && self.order_by.is_empty() {
            return Err(failed_precondition(
                "limit_to_last() queries require at least one order_by() clause",
            ));
        }
        let start_at = self
            .start
            .as_ref()
            .map(|cursor| cursor.encode(&self.order_by))
            .transpose()?;
        let end_at = self
            .end
            .as_ref()
            .map(|cursor| cursor.encode(&self.order_by))
            .transpose()?;

        Ok(QueryDefinition {
            collection_path: self.collection_path.clone(),
            filters: self.filters.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            limit_type: self.limit_type,
            start_at,
            end_at,
        })
    }

    /// Executes the query once.
    pub async fn get(&self) -> FirestoreResult<QuerySnapshot> {
        let definition = self.definition()?;
        let documents = self.firestore.datastore().run_query(&definition).await?;
        Ok(QuerySnapshot::new(self.clone(), documents))
    }

    /// Listens to the query results.
    ///
    /// The registration is returned immediately; the backend watch is set up
    /// in the background. Validation errors are reported synchronously.
    pub fn on_snapshot(
        &self,
        observer: PartialObserver<QuerySnapshot>,
    ) -> FirestoreResult<ListenerRegistration> {
        let definition = self.definition()?;
        let decoder = self.snapshot_decoder();
        Ok(self
            .firestore
            .listeners()
            .listen(WatchTarget::Query(definition), decoder, observer))
    }

    /// Same feed as [`Query::on_snapshot`] exposed as an async stream.
    pub fn snapshots(&self) -> FirestoreResult<SnapshotStream<QuerySnapshot>> {
        let definition = self.definition()?;
        let decoder = self.snapshot_decoder();
        Ok(self
            .firestore
            .listeners()
            .stream(WatchTarget::Query(definition), decoder))
    }

    fn snapshot_decoder(
        &self,
    ) -> impl FnMut(WatchEvent) -> FirestoreResult<QuerySnapshot> + Send + 'static {
        let query = self.clone();
        let previous: Mutex<Vec<DocumentSnapshot>> = Mutex::new(Vec::new());
        move |event| match event {
            WatchEvent::Documents(documents) => {
                let mut previous = previous
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                let snapshot = QuerySnapshot::with_changes(query.clone(), documents, &previous);
                *previous = snapshot.documents().to_vec();
                Ok(snapshot)
            }
            WatchEvent::Document(snapshot) => Err(internal_error(format!(
                "Query watch on '{}' received a single-document event for '{}'",
                query.collection_path,
                snapshot.id()
            ))),
            WatchEvent::Error(err) => Err(err),
        }
    }

    /// Attaches a converter to this query.
    pub fn with_converter<C>(&self, converter: C) -> ConvertedQuery<C>
    where
        C: FirestoreDataConverter,
    {
        ConvertedQuery::new(self.clone(), Arc::new(converter))
    }
}

/// Validated, transport-ready form of a [`Query`].
#[derive(Clone, Debug, PartialEq)]
pub struct QueryDefinition {
    pub(crate) collection_path: ResourcePath,
    pub(crate) filters: Vec<FieldFilter>,
    pub(crate) order_by: Vec<OrderBy>,
    pub(crate) limit: Option<u32>,
    pub(crate) limit_type: LimitType,
    pub(crate) start_at: Option<Bound>,
    pub(crate) end_at: Option<Bound>,
}

impl QueryDefinition {
    pub fn collection_path(&self) -> &ResourcePath {
        &self.collection_path
    }

    pub fn collection_id(&self) -> &str {
        self.collection_path.last_segment().unwrap_or_default()
    }

    /// Path of the document that owns the collection (root for top-level
    /// collections).
    pub fn parent_path(&self) -> ResourcePath {
        self.collection_path.without_last()
    }

    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    /// Orderings as written by the caller; results are returned in this order.
    pub fn order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn limit_type(&self) -> LimitType {
        self.limit_type
    }

    pub fn start_at(&self) -> Option<&Bound> {
        self.start_at.as_ref()
    }

    pub fn end_at(&self) -> Option<&Bound> {
        self.end_at.as_ref()
    }

    /// Orderings sent to the backend. `limit_to_last` queries are executed
    /// in reverse and flipped back by the client.
    pub fn request_order_by(&self) -> Vec<OrderBy> {
        match self.limit_type {
            LimitType::First => self.order_by.clone(),
            LimitType::Last => self
                .order_by
                .iter()
                .map(|order| OrderBy::new(order.field.clone(), order.direction.reversed()))
                .collect(),
        }
    }

    pub fn request_start_at(&self) -> Option<&Bound> {
        match self.limit_type {
            LimitType::First => self.start_at.as_ref(),
            LimitType::Last => self.end_at.as_ref(),
        }
    }

    pub fn request_end_at(&self) -> Option<&Bound> {
        match self.limit_type {
            LimitType::First => self.end_at.as_ref(),
            LimitType::Last => self.start_at.as_ref(),
        }
    }

    pub fn matches_collection(&self, key: &DocumentKey) -> bool {
        key.collection_path() == self.collection_path
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentChangeType {
    Added,
    Modified,
    Removed,
}

/// A change of one document between two snapshots of the same listener.
#[derive(Clone, Debug)]
pub struct DocumentChange {
    change_type: DocumentChangeType,
    document: DocumentSnapshot,
    old_index: Option<usize>,
    new_index: Option<usize>,
}

impl DocumentChange {
    pub fn change_type(&self) -> DocumentChangeType {
        self.change_type
    }

    pub fn document(&self) -> &DocumentSnapshot {
        &self.document
    }

    /// Position in the previous snapshot, `None` for additions.
    pub fn old_index(&self) -> Option<usize> {
        self.old_index
    }

    /// Position in the current snapshot, `None` for removals.
    pub fn new_index(&self) -> Option<usize> {
        self.new_index
    }
}

/// A snapshot containing the results of executing a query.
#[derive(Clone, Debug)]
pub struct QuerySnapshot {
    query: Query,
    documents: Vec<DocumentSnapshot>,
    metadata: SnapshotMetadata,
    changes: Vec<DocumentChange>,
}

impl QuerySnapshot {
    pub fn new(query: Query, documents: Vec<DocumentSnapshot>) -> Self {
        Self::with_changes(query, documents, &[])
    }

    pub(crate) fn with_changes(
        query: Query,
        documents: Vec<DocumentSnapshot>,
        previous: &[DocumentSnapshot],
    ) -> Self {
        let changes = diff_documents(previous, &documents);
        Self {
            query,
            documents,
            metadata: SnapshotMetadata::default(),
            changes,
        }
    }

    /// Returns the query used to obtain this snapshot.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Returns all document snapshots returned by the query.
    pub fn documents(&self) -> &[DocumentSnapshot] {
        &self.documents
    }

    pub fn metadata(&self) -> &SnapshotMetadata {
        &self.metadata
    }

    /// Changes relative to the previous snapshot delivered to the same
    /// listener; every document is `Added` for the first snapshot.
    pub fn doc_changes(&self) -> &[DocumentChange] {
        &self.changes
    }

    /// Returns whether the snapshot contains no documents.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Returns the number of documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Consumes the snapshot, returning the underlying document snapshots.
    pub fn into_documents(self) -> Vec<DocumentSnapshot> {
        self.documents
    }
}

impl IntoIterator for QuerySnapshot {
    type Item = DocumentSnapshot;
    type IntoIter = std::vec::IntoIter<DocumentSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.into_iter()
    }
}

fn diff_documents(previous: &[DocumentSnapshot], current: &[DocumentSnapshot]) -> Vec<DocumentChange> {
    let mut changes = Vec::new();

    for (old_index, old) in previous.iter().enumerate() {
        if !current.iter().any(|doc| doc.document_key() == old.document_key()) {
            changes.push(DocumentChange {
                change_type: DocumentChangeType::Removed,
                document: old.clone(),
                old_index: Some(old_index),
                new_index: None,
            });
        }
    }

    for (new_index, doc) in current.iter().enumerate() {
        let existing = previous
            .iter()
            .position(|old| old.document_key() == doc.document_key());
        match existing {
            None => changes.push(DocumentChange {
                change_type: DocumentChangeType::Added,
                document: doc.clone(),
                old_index: None,
                new_index: Some(new_index),
            }),
            Some(old_index) if previous[old_index].data() != doc.data() => {
                changes.push(DocumentChange {
                    change_type: DocumentChangeType::Modified,
                    document: doc.clone(),
                    old_index: Some(old_index),
                    new_index: Some(new_index),
                })
            }
            Some(_) => {}
        }
    }

    changes
}

/// A query with an attached data converter for typed access.
#[derive(Clone)]
pub struct ConvertedQuery<C>
where
    C: FirestoreDataConverter,
{
    inner: Query,
    converter: Arc<C>,
}

impl<C> ConvertedQuery<C>
where
    C: FirestoreDataConverter,
{
    pub(crate) fn new(inner: Query, converter: Arc<C>) -> Self {
        Self { inner, converter }
    }

    /// Returns the untyped query backing this converted query.
    pub fn raw(&self) -> &Query {
        &self.inner
    }

    pub(crate) fn converter(&self) -> Arc<C> {
        Arc::clone(&self.converter)
    }

    fn map(&self, query: Query) -> Self {
        Self::new(query, self.converter())
    }

    pub fn filter(&self, predicate: Expr) -> FirestoreResult<Self> {
        Ok(self.map(self.inner.filter(predicate)?))
    }

    pub fn order_by(&self, field: impl IntoFieldPath) -> FirestoreResult<Self> {
        Ok(self.map(self.inner.order_by(field)?))
    }

    pub fn order_by_descending(&self, field: impl IntoFieldPath) -> FirestoreResult<Self> {
        Ok(self.map(self.inner.order_by_descending(field)?))
    }

    pub fn take(&self, limit: u32) -> FirestoreResult<Self> {
        Ok(self.map(self.inner.take(limit)?))
    }

    pub fn start_after<I, V>(&self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FirestoreValue>,
    {
        self.map(self.inner.start_after(values))
    }

    pub async fn get(&self) -> FirestoreResult<TypedQuerySnapshot<C>> {
        let snapshot = self.inner.get().await?;
        Ok(TypedQuerySnapshot::new(snapshot, self.converter()))
    }

    pub fn on_snapshot(
        &self,
        observer: PartialObserver<TypedQuerySnapshot<C>>,
    ) -> FirestoreResult<ListenerRegistration> {
        let definition = self.inner.definition()?;
        let mut decode = self.inner.snapshot_decoder();
        let converter = self.converter();
        let decoder = move |event| {
            decode(event).map(|snapshot| TypedQuerySnapshot::new(snapshot, Arc::clone(&converter)))
        };
        Ok(self
            .inner
            .firestore
            .listeners()
            .listen(WatchTarget::Query(definition), decoder, observer))
    }
}

/// Typed wrapper around a `QuerySnapshot` using a data converter.
#[derive(Clone)]
pub struct TypedQuerySnapshot<C>
where
    C: FirestoreDataConverter,
{
    base: QuerySnapshot,
    converter: Arc<C>,
}

impl<C> TypedQuerySnapshot<C>
where
    C: FirestoreDataConverter,
{
    pub(crate) fn new(base: QuerySnapshot, converter: Arc<C>) -> Self {
        Self { base, converter }
    }

    /// Returns the underlying untyped snapshot.
    pub fn raw(&self) -> &QuerySnapshot {
        &self.base
    }

    /// Returns typed document snapshots for every document in the query result.
    pub fn documents(&self) -> Vec<TypedDocumentSnapshot<C>> {
        self.base
            .documents
            .iter()
            .cloned()
            .map(|snapshot| snapshot.into_typed(Arc::clone(&self.converter)))
            .collect()
    }

    /// Decodes every document into the converter's model.
    pub fn models(&self) -> FirestoreResult<Vec<C::Model>> {
        self.documents()
            .into_iter()
            .filter_map(|snapshot| snapshot.data().transpose())
            .collect()
    }
}

impl<C> IntoIterator for TypedQuerySnapshot<C>
where
    C: FirestoreDataConverter,
{
    type Item = TypedDocumentSnapshot<C>;
    type IntoIter = std::vec::IntoIter<TypedDocumentSnapshot<C>>;

    fn into_iter(self) -> Self::IntoIter {
        let converter = Arc::clone(&self.converter);
        self.base
            .into_documents()
            .into_iter()
            .map(|snapshot| snapshot.into_typed(Arc::clone(&converter)))
            .collect::<Vec<_>>()
            .into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::api::predicate::field;
    use crate::firestore::api::FirestoreSettings;
    use crate::firestore::remote::datastore::InMemoryDatastore;
    use crate::firestore::value::MapValue;
    use std::collections::BTreeMap;

    fn build_query() -> Query {
        let firestore = Firestore::new(
            FirestoreSettings::new("query-tests"),
            Arc::new(InMemoryDatastore::new()),
        )
        .unwrap();
        firestore.collection("products").unwrap().query()
    }

    fn snapshot(id: &str, price: i64) -> DocumentSnapshot {
        let key = DocumentKey::from_string(&format!("products/{id}")).unwrap();
        let data = MapValue::new(BTreeMap::from([(
            "price".to_string(),
            FirestoreValue::from(price),
        )]));
        DocumentSnapshot::new(key, Some(data), SnapshotMetadata::default())
    }

    #[test]
    fn chain_methods_return_new_descriptors() {
        let base = build_query();
        let filtered = base.filter(field("price").gt(10)).unwrap();
        let ordered = filtered.order_by("price").unwrap().take(2).unwrap();
        assert!(base.filters().is_empty());
        assert_eq!(filtered.filters().len(), 1);
        assert_eq!(ordered.orderings().len(), 1);
        assert_eq!(ordered.limit(), Some(2));
        assert_eq!(filtered.limit(), None);
    }

    #[test]
    fn skip_always_fails() {
        let err = build_query().skip(10).unwrap_err();
        assert_eq!(err.code_str(), "firestore/unimplemented");
        assert!(err.message().contains("start_after"));
    }

    #[test]
    fn cursor_without_ordering_is_rejected() {
        let err = build_query().start_at([1]).definition().unwrap_err();
        assert_eq!(err.code_str(), "firestore/failed-precondition");
    }

    #[test]
    fn cursor_arity_must_match_ordering() {
        let query = build_query().order_by("price").unwrap();
        assert!(query.start_at([10]).definition().is_ok());
        let err = query
            .start_at(vec![FirestoreValue::from(10), FirestoreValue::from("x")])
            .definition()
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn latest_cursor_per_side_wins() {
        let query = build_query()
            .order_by("price")
            .unwrap()
            .start_at([1])
            .start_after([5])
            .end_before([50]);
        let definition = query.definition().unwrap();
        let start = definition.start_at().unwrap();
        assert_eq!(start.values(), [FirestoreValue::from(5)]);
        assert!(!start.inclusive());
        assert!(!definition.end_at().unwrap().inclusive());
    }

    #[test]
    fn limit_to_last_reverses_request() {
        let definition = build_query()
            .order_by("price")
            .unwrap()
            .start_at([1])
            .limit_to_last(2)
            .unwrap()
            .definition()
            .unwrap();
        assert_eq!(
            definition.request_order_by()[0].direction(),
            OrderDirection::Descending
        );
        assert!(definition.request_start_at().is_none());
        assert!(definition.request_end_at().is_some());

        let err = build_query().limit_to_last(1).unwrap().definition().unwrap_err();
        assert_eq!(err.code_str(), "firestore/failed-precondition");
    }

    #[test]
    fn list_operators_require_values() {
        let err = build_query()
            .where_field("tags", FilterOperator::ArrayContainsAny, Vec::<FirestoreValue>::new())
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
        assert!(build_query()
            .where_field("tags", FilterOperator::ArrayContainsAny, vec!["a", "b"])
            .is_ok());
    }

    #[test]
    fn doc_changes_track_previous_results() {
        let query = build_query();
        let first = QuerySnapshot::new(query.clone(), vec![snapshot("a", 1), snapshot("b", 2)]);
        assert!(first
            .doc_changes()
            .iter()
            .all(|change| change.change_type() == DocumentChangeType::Added));

        let second = QuerySnapshot::with_changes(
            query,
            vec![snapshot("b", 3), snapshot("c", 4)],
            first.documents(),
        );
        let kinds: Vec<_> = second
            .doc_changes()
            .iter()
            .map(|change| (change.change_type(), change.document().id().to_string()))
            .collect();
        assert_eq!(
            kinds,
            [
                (DocumentChangeType::Removed, "a".to_string()),
                (DocumentChangeType::Modified, "b".to_string()),
                (DocumentChangeType::Added, "c".to_string()),
            ]
        );
    }
}
