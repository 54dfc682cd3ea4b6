use std::future::Future;
use std::pin::pin;

use futures::future::{select, Either};
use tokio_util::sync::CancellationToken;

use crate::firestore::error::{cancelled, FirestoreResult};

/// Lets callers stop waiting on any client operation.
///
/// Cancelling only abandons the wait: a write or commit that already reached
/// the backend may still be applied.
pub trait FirestoreFutureExt<T>: Future<Output = FirestoreResult<T>> + Sized {
    /// Resolves with `firestore/cancelled` as soon as `token` fires.
    fn with_cancellation(
        self,
        token: &CancellationToken,
    ) -> impl Future<Output = FirestoreResult<T>>;
}

impl<T, F> FirestoreFutureExt<T> for F
where
    F: Future<Output = FirestoreResult<T>>,
{
    fn with_cancellation(
        self,
        token: &CancellationToken,
    ) -> impl Future<Output = FirestoreResult<T>> {
        let token = token.clone();
        async move {
            let operation = pin!(self);
            let cancellation = pin!(token.cancelled());
            match select(operation, cancellation).await {
                Either::Left((result, _)) => result,
                Either::Right(((), _)) => Err(cancelled("The operation was cancelled by the caller")),
            }
        }
    }
}
