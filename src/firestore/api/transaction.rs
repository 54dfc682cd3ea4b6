//! Optimistic read-modify-write transactions.
//!
//! The body runs twice per attempt. The first run only discovers which
//! documents it reads (every read answers with a placeholder and writes are
//! validated then dropped). The discovered documents are then fetched in a
//! single round-trip when the backend transaction is opened, and the second
//! run executes against those snapshots while staging writes. A commit that
//! loses a race is reported as `aborted` and the whole attempt is retried.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::firestore::error::{
    aborted, failed_precondition, invalid_argument, FirestoreError, FirestoreErrorCode,
    FirestoreResult,
};
use crate::firestore::model::DocumentKey;
use crate::firestore::remote::datastore::{TransactionResult, WriteOperation};
use crate::firestore::value::FirestoreValue;
use crate::platform::runtime::sleep;

use super::converter::FirestoreDataConverter;
use super::database::Firestore;
use super::operations::{self, SetOptions};
use super::reference::{ConvertedDocumentReference, DocumentReference};
use super::snapshot::{DocumentSnapshot, TypedDocumentSnapshot};

/// Per-call overrides for [`Firestore::run_transaction_with_options`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Overrides `FirestoreSettings::max_transaction_attempts`.
    pub max_attempts: Option<u32>,
}

impl TransactionOptions {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Collecting,
    Executing,
    Finished,
}

struct TransactionState {
    phase: Phase,
    discovered: Vec<DocumentKey>,
    snapshots: BTreeMap<DocumentKey, DocumentSnapshot>,
    writes: Vec<WriteOperation>,
    has_written: bool,
}

/// Handle passed to a transaction body.
///
/// Reads are synchronous: the documents are fetched before the body runs.
/// All reads must happen before the first write.
#[derive(Clone)]
pub struct Transaction {
    firestore: Firestore,
    state: Arc<Mutex<TransactionState>>,
}

impl Transaction {
    fn collecting(firestore: Firestore) -> Self {
        Self::with_state(firestore, Phase::Collecting, BTreeMap::new())
    }

    fn executing(firestore: Firestore, documents: Vec<TransactionResult>) -> Self {
        let snapshots = documents
            .into_iter()
            .map(|result| (result.key().clone(), result.into_snapshot()))
            .collect();
        Self::with_state(firestore, Phase::Executing, snapshots)
    }

    fn with_state(
        firestore: Firestore,
        phase: Phase,
        snapshots: BTreeMap<DocumentKey, DocumentSnapshot>,
    ) -> Self {
        Self {
            firestore,
            state: Arc::new(Mutex::new(TransactionState {
                phase,
                discovered: Vec::new(),
                snapshots,
                writes: Vec::new(),
                has_written: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TransactionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `true` while the body runs only to discover its reads. Snapshots
    /// returned during that run are placeholders.
    pub fn is_collecting(&self) -> bool {
        self.lock().phase == Phase::Collecting
    }

    /// Reads a document inside the transaction.
    pub fn get(&self, reference: &DocumentReference) -> FirestoreResult<DocumentSnapshot> {
        self.ensure_same_firestore(reference.firestore())?;
        let key = reference.key().clone();
        let mut state = self.lock();
        match state.phase {
            Phase::Collecting => {
                if !state.discovered.contains(&key) {
                    state.discovered.push(key.clone());
                }
                Ok(DocumentSnapshot::missing(key))
            }
            Phase::Executing => {
                if state.has_written {
                    return Err(failed_precondition(
                        "Transactions require all reads to be executed before all writes",
                    ));
                }
                state.snapshots.get(&key).cloned().ok_or_else(|| {
                    failed_precondition(format!(
                        "Document '{key}' was not read while the transaction collected its \
                         reads; the body must read the same documents on every run"
                    ))
                })
            }
            Phase::Finished => Err(finished_error()),
        }
    }

    /// Reads a document and decodes it with the reference's converter.
    pub fn get_with_converter<C>(
        &self,
        reference: &ConvertedDocumentReference<C>,
    ) -> FirestoreResult<TypedDocumentSnapshot<C>>
    where
        C: FirestoreDataConverter,
    {
        let snapshot = self.get(reference.raw())?;
        Ok(snapshot.into_typed(reference.converter()))
    }

    pub fn set(
        &self,
        reference: &DocumentReference,
        data: BTreeMap<String, FirestoreValue>,
        options: Option<SetOptions>,
    ) -> FirestoreResult<&Self> {
        self.ensure_same_firestore(reference.firestore())?;
        let options = options.unwrap_or_default();
        let write = operations::set_operation(reference.key().clone(), data, &options)?;
        self.stage(write)
    }

    pub fn set_with_converter<C>(
        &self,
        reference: &ConvertedDocumentReference<C>,
        model: C::Model,
        options: Option<SetOptions>,
    ) -> FirestoreResult<&Self>
    where
        C: FirestoreDataConverter,
    {
        let map = reference.converter().to_map(&model)?;
        self.set(reference.raw(), map, options)
    }

    pub fn update(
        &self,
        reference: &DocumentReference,
        data: BTreeMap<String, FirestoreValue>,
    ) -> FirestoreResult<&Self> {
        self.ensure_same_firestore(reference.firestore())?;
        let write = operations::update_operation(reference.key().clone(), data)?;
        self.stage(write)
    }

    pub fn delete(&self, reference: &DocumentReference) -> FirestoreResult<&Self> {
        self.ensure_same_firestore(reference.firestore())?;
        self.stage(WriteOperation::Delete {
            key: reference.key().clone(),
        })
    }

    fn stage(&self, write: WriteOperation) -> FirestoreResult<&Self> {
        let mut state = self.lock();
        match state.phase {
            Phase::Collecting => {
                state.has_written = true;
            }
            Phase::Executing => {
                state.has_written = true;
                state.writes.push(write);
            }
            Phase::Finished => return Err(finished_error()),
        }
        Ok(self)
    }

    fn ensure_same_firestore(&self, other: &Firestore) -> FirestoreResult<()> {
        if self.firestore.database_id() != other.database_id() {
            return Err(invalid_argument(
                "All transaction operations must target the same Firestore instance",
            ));
        }
        Ok(())
    }

    /// Closes the handle and returns what the run discovered and staged.
    fn finish(&self) -> (Vec<DocumentKey>, Vec<WriteOperation>) {
        let mut state = self.lock();
        state.phase = Phase::Finished;
        (
            std::mem::take(&mut state.discovered),
            std::mem::take(&mut state.writes),
        )
    }
}

fn finished_error() -> FirestoreError {
    failed_precondition("This transaction has already completed and cannot be used")
}

impl Firestore {
    /// Runs `body` atomically with the configured number of attempts.
    ///
    /// ```no_run
    /// # use firestore_query_core::firestore::api::Firestore;
    /// # use firestore_query_core::firestore::value::FirestoreValue;
    /// # use std::collections::BTreeMap;
    /// # async fn transfer(db: Firestore) -> firestore_query_core::firestore::FirestoreResult<()> {
    /// let from = db.doc("accounts/alice")?;
    /// let to = db.doc("accounts/bob")?;
    /// db.run_transaction(|tx| {
    ///     let balance = tx.get(&from)?.get("balance")?.and_then(|v| v.as_integer()).unwrap_or(0);
    ///     tx.update(&from, BTreeMap::from([("balance".into(), FirestoreValue::from(balance - 10))]))?;
    ///     tx.update(&to, BTreeMap::from([("balance".into(), FirestoreValue::numeric_increment(10))]))?;
    ///     Ok(())
    /// })
    /// .await
    /// # }
    /// ```
    pub async fn run_transaction<T, F>(&self, body: F) -> FirestoreResult<T>
    where
        F: FnMut(&Transaction) -> FirestoreResult<T>,
    {
        self.run_transaction_with_options(TransactionOptions::default(), body)
            .await
    }

    pub async fn run_transaction_with_options<T, F>(
        &self,
        options: TransactionOptions,
        mut body: F,
    ) -> FirestoreResult<T>
    where
        F: FnMut(&Transaction) -> FirestoreResult<T>,
    {
        let max_attempts = options
            .max_attempts
            .unwrap_or(self.settings().max_transaction_attempts);
        if max_attempts == 0 {
            return Err(invalid_argument(
                "Transactions require at least one attempt",
            ));
        }
        let backoff = self.settings().transaction_backoff;
        let datastore = self.datastore();

        for attempt in 0..max_attempts {
            let collecting = Transaction::collecting(self.clone());
            if let Err(err) = body(&collecting) {
                log::debug!("transaction read collection ended with {err}; continuing");
            }
            let (keys, _) = collecting.finish();

            let reads = datastore.begin_transaction(&keys).await?;
            let executing = Transaction::executing(self.clone(), reads.documents);
            let outcome = body(&executing);
            let (_, writes) = executing.finish();

            let value = match outcome {
                Ok(value) => value,
                Err(err) => {
                    if let Err(rollback_err) = datastore.rollback_transaction(&reads.id).await {
                        log::warn!("failed to roll back transaction {}: {rollback_err}", reads.id);
                    }
                    return Err(err);
                }
            };

            match datastore.commit_transaction(&reads.id, writes).await {
                Ok(()) => return Ok(value),
                Err(err) if err.code == FirestoreErrorCode::Aborted => {
                    log::debug!(
                        "transaction attempt {}/{max_attempts} aborted: {err}",
                        attempt + 1
                    );
                    if attempt + 1 < max_attempts {
                        sleep(backoff.delay(attempt)).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Err(aborted(format!(
            "Transaction failed after {max_attempts} attempts because of concurrent modifications"
        )))
    }
}
