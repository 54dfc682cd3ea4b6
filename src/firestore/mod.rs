pub mod api;
mod constants;
pub mod error;
pub mod model;
pub(crate) mod query_evaluator;
pub mod remote;
pub mod value;

pub use api::{CollectionReference, DocumentReference, Firestore, FirestoreSettings};
pub use error::{ErrorOrigin, FirestoreError, FirestoreErrorCode, FirestoreResult};
