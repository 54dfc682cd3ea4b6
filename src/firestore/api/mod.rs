pub(crate) mod aggregate;
mod cancellation;
mod converter;
pub(crate) mod cursor;
mod database;
pub(crate) mod listener;
pub(crate) mod operations;
pub mod predicate;
pub(crate) mod query;
mod reference;
mod settings;
mod snapshot;
mod transaction;
mod write_batch;

pub use aggregate::{
    AggregateDefinition, AggregateField, AggregateOperation, AggregateQuerySnapshot, AggregateSpec,
};
pub use cancellation::FirestoreFutureExt;
pub use converter::{FirestoreDataConverter, FirestoreRecord, PassthroughConverter, SerdeConverter};
pub use cursor::{CursorBound, CursorKind};
pub use database::Firestore;
pub use listener::{ListenerRegistration, SnapshotStream, SubscriptionState};
pub use operations::SetOptions;
pub use predicate::{
    call, captured, compile_predicate, field, list, lit, CapturedValue, CompareOp, Expr, Operand,
};
pub use query::{
    Bound, ConvertedQuery, DocumentChange, DocumentChangeType, FieldFilter, FilterOperator,
    LimitType, OrderBy, OrderDirection, Query, QueryDefinition, QuerySnapshot, TypedQuerySnapshot,
};
pub use reference::{
    CollectionReference, ConvertedCollectionReference, ConvertedDocumentReference,
    DocumentReference,
};
pub use settings::FirestoreSettings;
pub use snapshot::{DocumentSnapshot, SnapshotMetadata, TypedDocumentSnapshot};
pub use transaction::{Transaction, TransactionOptions};
pub use write_batch::WriteBatch;
