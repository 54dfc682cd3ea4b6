use std::collections::BTreeMap;

use crate::firestore::api::operations::{self, SetOptions};
use crate::firestore::api::{
    converter::FirestoreDataConverter, database::Firestore, reference::ConvertedDocumentReference,
};
use crate::firestore::error::{invalid_argument, resource_exhausted, FirestoreResult};
use crate::firestore::remote::datastore::WriteOperation;
use crate::firestore::value::FirestoreValue;

use super::reference::DocumentReference;

/// Aggregates write operations and commits them atomically.
///
/// Each staging call validates its input immediately; nothing reaches the
/// backend until [`WriteBatch::commit`], which applies every write or none.
#[derive(Clone, Debug)]
pub struct WriteBatch {
    firestore: Firestore,
    writes: Vec<WriteOperation>,
}

impl WriteBatch {
    pub(crate) fn new(firestore: Firestore) -> Self {
        Self {
            firestore,
            writes: Vec::new(),
        }
    }

    /// Adds a set operation to the batch.
    pub fn set(
        &mut self,
        reference: &DocumentReference,
        data: BTreeMap<String, FirestoreValue>,
        options: Option<SetOptions>,
    ) -> FirestoreResult<&mut Self> {
        self.ensure_capacity()?;
        self.ensure_same_firestore(reference.firestore())?;
        let options = options.unwrap_or_default();
        let write = operations::set_operation(reference.key().clone(), data, &options)?;
        self.writes.push(write);
        Ok(self)
    }

    /// Adds a typed set operation using the reference's converter.
    pub fn set_with_converter<C>(
        &mut self,
        reference: &ConvertedDocumentReference<C>,
        model: C::Model,
        options: Option<SetOptions>,
    ) -> FirestoreResult<&mut Self>
    where
        C: FirestoreDataConverter,
    {
        let converter = reference.converter();
        let map = converter.to_map(&model)?;
        self.set(reference.raw(), map, options)
    }

    /// Adds an update operation to the batch.
    pub fn update(
        &mut self,
        reference: &DocumentReference,
        data: BTreeMap<String, FirestoreValue>,
    ) -> FirestoreResult<&mut Self> {
        self.ensure_capacity()?;
        self.ensure_same_firestore(reference.firestore())?;
        let write = operations::update_operation(reference.key().clone(), data)?;
        self.writes.push(write);
        Ok(self)
    }

    /// Adds an update operation for a converted reference.
    pub fn update_with_converter<C>(
        &mut self,
        reference: &ConvertedDocumentReference<C>,
        data: BTreeMap<String, FirestoreValue>,
    ) -> FirestoreResult<&mut Self>
    where
        C: FirestoreDataConverter,
    {
        self.update(reference.raw(), data)
    }

    /// Adds a delete operation to the batch.
    pub fn delete(&mut self, reference: &DocumentReference) -> FirestoreResult<&mut Self> {
        self.ensure_capacity()?;
        self.ensure_same_firestore(reference.firestore())?;
        self.writes.push(WriteOperation::Delete {
            key: reference.key().clone(),
        });
        Ok(self)
    }

    /// Adds a delete operation for a converted reference.
    pub fn delete_with_converter<C>(
        &mut self,
        reference: &ConvertedDocumentReference<C>,
    ) -> FirestoreResult<&mut Self>
    where
        C: FirestoreDataConverter,
    {
        self.delete(reference.raw())
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Queued writes in staging order.
    pub fn writes(&self) -> &[WriteOperation] {
        &self.writes
    }

    /// Commits all queued writes atomically. An empty batch is a no-op.
    pub async fn commit(self) -> FirestoreResult<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        log::debug!("committing write batch with {} operation(s)", self.writes.len());
        self.firestore.datastore().commit(self.writes).await
    }

    fn ensure_same_firestore(&self, other: &Firestore) -> FirestoreResult<()> {
        if self.firestore.database_id() != other.database_id() {
            return Err(invalid_argument(
                "All WriteBatch operations must target the same Firestore instance",
            ));
        }
        Ok(())
    }

    fn ensure_capacity(&self) -> FirestoreResult<()> {
        let limit = self.firestore.settings().max_batch_writes;
        if self.writes.len() >= limit {
            return Err(resource_exhausted(format!(
                "WriteBatch cannot contain more than {limit} operations"
            )));
        }
        Ok(())
    }
}

impl Firestore {
    /// Creates an empty write batch bound to this database.
    pub fn batch(&self) -> WriteBatch {
        WriteBatch::new(self.clone())
    }

    /// Stages writes with `stage` and commits them atomically.
    ///
    /// Nothing is committed when `stage` returns an error.
    pub async fn run_batch<F>(&self, stage: F) -> FirestoreResult<()>
    where
        F: FnOnce(&mut WriteBatch) -> FirestoreResult<()>,
    {
        let mut batch = self.batch();
        stage(&mut batch)?;
        batch.commit().await
    }
}
