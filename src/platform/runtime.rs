use std::future::Future;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::runtime::{Builder, Handle, Runtime};

static BACKGROUND_RUNTIME: Lazy<Option<Runtime>> = Lazy::new(|| {
    match Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("firestore-background")
        .enable_all()
        .build()
    {
        Ok(runtime) => Some(runtime),
        Err(err) => {
            log::warn!("failed to build background tokio runtime: {err}");
            None
        }
    }
});

/// Spawns `future` on the current tokio runtime, or on a shared background
/// runtime when called from synchronous code.
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        handle.spawn(future);
    } else if let Some(runtime) = BACKGROUND_RUNTIME.as_ref() {
        runtime.spawn(future);
    } else {
        log::warn!("dropping background task: no tokio runtime available");
    }
}

/// Waits for `duration`; returns immediately for a zero duration.
pub async fn sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    tokio::time::sleep(duration).await;
}
