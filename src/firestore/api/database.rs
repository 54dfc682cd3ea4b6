use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::firestore::error::{missing_project_id, FirestoreResult};
use crate::firestore::model::{DatabaseId, ResourcePath};
use crate::firestore::remote::datastore::Datastore;

use super::converter::{FirestoreRecord, SerdeConverter};
use super::listener::SubscriptionManager;
use super::reference::{CollectionReference, ConvertedCollectionReference, DocumentReference};
use super::settings::FirestoreSettings;

/// Entry point of the client: a database handle bound to one transport.
///
/// Cloning is cheap; clones share the transport and the listener registry.
#[derive(Clone)]
pub struct Firestore {
    inner: Arc<FirestoreInner>,
}

struct FirestoreInner {
    settings: FirestoreSettings,
    database_id: DatabaseId,
    datastore: Arc<dyn Datastore>,
    listeners: SubscriptionManager,
}

impl Firestore {
    /// Creates a client for the database named in `settings`.
    ///
    /// Fails with `firestore/missing-project-id` when no project is configured.
    pub fn new(settings: FirestoreSettings, datastore: Arc<dyn Datastore>) -> FirestoreResult<Self> {
        if settings.project_id.trim().is_empty() {
            return Err(missing_project_id());
        }
        let database_id = DatabaseId::parse(&settings.project_id, &settings.database)?;
        let listeners = SubscriptionManager::new(Arc::clone(&datastore));
        log::debug!("created firestore client for {}", database_id.canonical_name());
        let inner = FirestoreInner {
            settings,
            database_id,
            datastore,
            listeners,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn settings(&self) -> &FirestoreSettings {
        &self.inner.settings
    }

    /// The fully qualified database identifier (project + database name).
    pub fn database_id(&self) -> &DatabaseId {
        &self.inner.database_id
    }

    /// Returns the project identifier backing this database.
    pub fn project_id(&self) -> &str {
        self.inner.database_id.project_id()
    }

    /// Returns the logical database name (usually `"(default)"`).
    pub fn database(&self) -> &str {
        self.inner.database_id.database()
    }

    pub(crate) fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.inner.datastore
    }

    pub(crate) fn listeners(&self) -> &SubscriptionManager {
        &self.inner.listeners
    }

    /// Creates a `CollectionReference` pointing at `path`.
    ///
    /// The path is interpreted relative to the Firestore root using forward
    /// slashes to separate segments (e.g. `"users/alovelace/repos"`).
    pub fn collection(&self, path: &str) -> FirestoreResult<CollectionReference> {
        let resource = ResourcePath::from_string(path)?;
        CollectionReference::new(self.clone(), resource)
    }

    /// Creates a `DocumentReference` pointing at `path`.
    ///
    /// The path must contain an even number of segments (collection/doc pairs).
    pub fn doc(&self, path: &str) -> FirestoreResult<DocumentReference> {
        let resource = ResourcePath::from_string(path)?;
        DocumentReference::new(self.clone(), resource)
    }

    /// Typed handle on the collection a record type is stored in.
    pub fn collection_for<R>(&self) -> FirestoreResult<ConvertedCollectionReference<SerdeConverter<R>>>
    where
        R: FirestoreRecord,
    {
        Ok(self
            .collection(R::COLLECTION)?
            .with_converter(SerdeConverter::new()))
    }
}

impl Debug for Firestore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Firestore")
            .field("database_id", &self.inner.database_id)
            .finish_non_exhaustive()
    }
}
