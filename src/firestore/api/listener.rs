//! Real-time listeners.
//!
//! Every `on_snapshot` call gets an entry in a shared registry and a
//! [`ListenerRegistration`] handle returned before the backend has answered.
//! The backend watch is registered in the background; its outcome moves the
//! entry through `Requested -> Active | Error`, and `unsubscribe` moves it to
//! `Unsubscribed`. Events are only delivered while the entry is `Requested`
//! or `Active`, and the backend watch is released exactly once whatever the
//! interleaving of registration and unsubscription.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::firestore::error::{cancelled, FirestoreError, FirestoreResult};
use crate::firestore::remote::datastore::{
    Datastore, WatchEvent, WatchHandle, WatchSink, WatchTarget,
};
use crate::platform::runtime::spawn_detached;
use crate::util::PartialObserver;

/// Lifecycle of a snapshot listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    /// Returned to the caller, backend registration still in flight.
    Requested,
    /// Registered with the backend and delivering snapshots.
    Active,
    /// Stopped by a backend or decoding error; the error callback has run.
    Error,
    /// Stopped by the caller.
    Unsubscribed,
}

struct Entry {
    state: SubscriptionState,
    handle: Option<WatchHandle>,
    ready: Option<oneshot::Sender<FirestoreResult<()>>>,
}

impl Entry {
    fn resolve(&mut self, result: FirestoreResult<()>) {
        if let Some(sender) = self.ready.take() {
            let _ = sender.send(result);
        }
    }

    fn is_live(&self) -> bool {
        matches!(
            self.state,
            SubscriptionState::Requested | SubscriptionState::Active
        )
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: HashMap<u64, Entry>,
}

struct ManagerInner {
    datastore: Arc<dyn Datastore>,
    registry: Mutex<Registry>,
}

impl ManagerInner {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_live(&self, id: u64) -> bool {
        self.lock()
            .entries
            .get(&id)
            .map(Entry::is_live)
            .unwrap_or(false)
    }

    fn state(&self, id: u64) -> SubscriptionState {
        self.lock()
            .entries
            .get(&id)
            .map(|entry| entry.state)
            .unwrap_or(SubscriptionState::Unsubscribed)
    }

    /// Moves a live entry to `Error`. Returns `false` when the entry was no
    /// longer live, in which case the error must not be reported.
    fn fail(&self, id: u64, err: &FirestoreError) -> bool {
        let handle = {
            let mut registry = self.lock();
            let Some(entry) = registry.entries.get_mut(&id) else {
                return false;
            };
            if !entry.is_live() {
                return false;
            }
            entry.state = SubscriptionState::Error;
            entry.resolve(Err(err.clone()));
            entry.handle.take()
        };
        log::debug!("listener {id} stopped with error: {err}");
        if let Some(handle) = handle {
            self.unregister(handle);
        }
        true
    }

    fn unsubscribe(&self, id: u64) {
        let handle = {
            let mut registry = self.lock();
            let Some(entry) = registry.entries.get_mut(&id) else {
                return;
            };
            match entry.state {
                SubscriptionState::Requested => {
                    entry.state = SubscriptionState::Unsubscribed;
                    entry.resolve(Err(cancelled(
                        "Listener was unsubscribed before it became active",
                    )));
                    None
                }
                SubscriptionState::Active => {
                    let handle = entry.handle.take();
                    registry.entries.remove(&id);
                    handle
                }
                SubscriptionState::Error | SubscriptionState::Unsubscribed => None,
            }
        };
        if let Some(handle) = handle {
            self.unregister(handle);
        }
    }

    /// Unsubscribes and forgets entries that can no longer change.
    fn release(&self, id: u64) {
        self.unsubscribe(id);
        let mut registry = self.lock();
        if matches!(
            registry.entries.get(&id).map(|entry| entry.state),
            Some(SubscriptionState::Error)
        ) {
            registry.entries.remove(&id);
        }
    }

    fn unregister(&self, handle: WatchHandle) {
        let datastore = Arc::clone(&self.datastore);
        spawn_detached(async move {
            if let Err(err) = datastore.unregister_watch(handle).await {
                log::warn!("failed to release watch {}: {err}", handle.id());
            }
        });
    }

    fn complete_registration(&self, id: u64, result: FirestoreResult<WatchHandle>) -> Option<FirestoreError> {
        match result {
            Ok(handle) => {
                let release = {
                    let mut registry = self.lock();
                    match registry.entries.get_mut(&id) {
                        Some(entry) if entry.state == SubscriptionState::Requested => {
                            entry.state = SubscriptionState::Active;
                            entry.handle = Some(handle);
                            entry.resolve(Ok(()));
                            false
                        }
                        Some(entry) if entry.state == SubscriptionState::Unsubscribed => {
                            registry.entries.remove(&id);
                            true
                        }
                        _ => true,
                    }
                };
                if release {
                    log::debug!("releasing watch {} of inactive listener {id}", handle.id());
                    self.unregister(handle);
                }
                None
            }
            Err(err) => {
                let mut registry = self.lock();
                match registry.entries.get_mut(&id) {
                    Some(entry) if entry.state == SubscriptionState::Requested => {
                        entry.state = SubscriptionState::Error;
                        entry.resolve(Err(err.clone()));
                        Some(err)
                    }
                    Some(entry) if entry.state == SubscriptionState::Unsubscribed => {
                        registry.entries.remove(&id);
                        None
                    }
                    _ => None,
                }
            }
        }
    }
}

/// Registry of the snapshot listeners opened through one client.
#[derive(Clone)]
pub(crate) struct SubscriptionManager {
    inner: Arc<ManagerInner>,
}

impl SubscriptionManager {
    pub(crate) fn new(datastore: Arc<dyn Datastore>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                datastore,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Opens a listener on `target`.
    ///
    /// `decode` turns backend events into snapshots; a decoding failure is
    /// handled like a backend error. Callbacks run on the thread that
    /// delivered the event, never while a registry lock is held.
    pub(crate) fn listen<T, D>(
        &self,
        target: WatchTarget,
        decode: D,
        observer: PartialObserver<T>,
    ) -> ListenerRegistration
    where
        T: 'static,
        D: FnMut(WatchEvent) -> FirestoreResult<T> + Send + 'static,
    {
        let (ready_tx, ready_rx) = oneshot::channel();
        let id = {
            let mut registry = self.inner.lock();
            registry.next_id += 1;
            let id = registry.next_id;
            registry.entries.insert(
                id,
                Entry {
                    state: SubscriptionState::Requested,
                    handle: None,
                    ready: Some(ready_tx),
                },
            );
            id
        };

        let sink = build_sink(Arc::downgrade(&self.inner), id, decode, observer.clone());
        let inner = Arc::clone(&self.inner);
        spawn_detached(async move {
            let result = inner.datastore.register_watch(target, sink).await;
            if let Some(err) = inner.complete_registration(id, result) {
                observer.notify_error(&err);
            }
        });

        let ready = ready_rx
            .map(|result| {
                result.unwrap_or_else(|_| {
                    Err(cancelled("Listener registration was dropped"))
                })
            })
            .boxed()
            .shared();

        ListenerRegistration {
            id,
            manager: Arc::clone(&self.inner),
            ready,
        }
    }

    /// Opens a listener whose snapshots are delivered through a channel.
    pub(crate) fn stream<T, D>(&self, target: WatchTarget, decode: D) -> SnapshotStream<T>
    where
        T: Clone + Send + 'static,
        D: FnMut(WatchEvent) -> FirestoreResult<T> + Send + 'static,
    {
        let (sender, receiver) = async_channel::unbounded();
        let error_sender = sender.clone();
        let observer = PartialObserver::new()
            .with_next(move |snapshot: &T| {
                let _ = sender.try_send(Ok(snapshot.clone()));
            })
            .with_error(move |err: &FirestoreError| {
                let _ = error_sender.try_send(Err(err.clone()));
                error_sender.close();
            });
        let registration = self.listen(target, decode, observer);
        SnapshotStream {
            registration,
            receiver,
        }
    }

    #[cfg(test)]
    fn state(&self, id: u64) -> SubscriptionState {
        self.inner.state(id)
    }
}

fn build_sink<T, D>(
    manager: Weak<ManagerInner>,
    id: u64,
    decode: D,
    observer: PartialObserver<T>,
) -> WatchSink
where
    T: 'static,
    D: FnMut(WatchEvent) -> FirestoreResult<T> + Send + 'static,
{
    let decode = Mutex::new(decode);
    Arc::new(move |event: WatchEvent| {
        let Some(manager) = manager.upgrade() else {
            return;
        };
        if !manager.is_live(id) {
            return;
        }
        let decoded = match event {
            WatchEvent::Error(err) => Err(err),
            event => {
                let mut decode = decode.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                (&mut *decode)(event)
            }
        };
        match decoded {
            Ok(snapshot) => observer.notify_next(&snapshot),
            Err(err) => {
                if manager.fail(id, &err) {
                    observer.notify_error(&err);
                }
            }
        }
    })
}

/// Handle on an open snapshot listener.
///
/// Dropping the handle unsubscribes the listener.
pub struct ListenerRegistration {
    id: u64,
    manager: Arc<ManagerInner>,
    ready: Shared<BoxFuture<'static, FirestoreResult<()>>>,
}

impl ListenerRegistration {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SubscriptionState {
        self.manager.state(self.id)
    }

    /// Resolves once the backend accepted the watch, or with the error that
    /// stopped the listener first.
    pub fn ready(&self) -> impl Future<Output = FirestoreResult<()>> + Send + 'static {
        self.ready.clone()
    }

    /// Stops the listener. Calling it again is a no-op.
    ///
    /// Events delivered after this returns are dropped. A delivery that was
    /// already running on another thread may still finish its callback; this
    /// call does not wait for it, so a callback may unsubscribe its own
    /// listener.
    pub fn unsubscribe(&self) {
        self.manager.unsubscribe(self.id);
    }
}

impl Debug for ListenerRegistration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.manager.release(self.id);
    }
}

/// Snapshot listener consumed as an async sequence.
///
/// The sequence ends after the first error. Dropping the stream
/// unsubscribes the listener.
pub struct SnapshotStream<T> {
    registration: ListenerRegistration,
    receiver: async_channel::Receiver<FirestoreResult<T>>,
}

impl<T> SnapshotStream<T> {
    /// Waits for the next snapshot; `None` once the listener has stopped.
    pub async fn next(&mut self) -> Option<FirestoreResult<T>> {
        self.receiver.recv().await.ok()
    }

    pub fn registration(&self) -> &ListenerRegistration {
        &self.registration
    }

    pub fn state(&self) -> SubscriptionState {
        self.registration.state()
    }
}
