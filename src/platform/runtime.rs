use std::future::Future;
use std::time::Duration;

use futures::future::{select, Either};

/// Platform-independent helper to spawn an async task that runs in the background.
#[cfg(target_arch = "wasm32")]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    wasm_bindgen_futures::spawn_local(future);
}

/// Platform-independent helper to spawn an async task that runs in the background.
///
/// Inside a Tokio context the task joins the caller's runtime; otherwise it runs on a small
/// shared runtime with its own worker so the task outlives the caller.
#[cfg(not(target_arch = "wasm32"))]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    use tokio::runtime::Handle;

    if let Ok(handle) = Handle::try_current() {
        handle.spawn(future);
    } else if let Some(runtime) = native::background() {
        runtime.spawn(future);
    }
}

/// Asynchronously waits for the provided duration in a platform-compatible way.
pub async fn sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }

    sleep_impl(duration).await;
}

#[cfg(target_arch = "wasm32")]
async fn sleep_impl(duration: Duration) {
    use gloo_timers::future::sleep;
    sleep(duration).await;
}

#[cfg(not(target_arch = "wasm32"))]
async fn sleep_impl(duration: Duration) {
    use tokio::time::sleep;
    sleep(duration).await;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimedOut;

/// Races `future` against a timer. A zero duration disables the timer.
pub async fn with_timeout<F, T>(future: F, duration: Duration) -> Result<T, TimedOut>
where
    F: Future<Output = T>,
{
    if duration.is_zero() {
        return Ok(future.await);
    }

    let future = Box::pin(future);
    let timer = Box::pin(sleep(duration));
    match select(future, timer).await {
        Either::Left((value, _)) => Ok(value),
        Either::Right(_) => Err(TimedOut),
    }
}

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::future::Future;
    use std::sync::LazyLock;

    use tokio::runtime::{Builder, Runtime};

    static BACKGROUND_RUNTIME: LazyLock<Option<Runtime>> = LazyLock::new(|| {
        Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("analytics-background")
            .enable_all()
            .build()
            .ok()
    });

    static BLOCKING_RUNTIME: LazyLock<Option<Runtime>> = LazyLock::new(|| {
        Builder::new_current_thread().enable_all().build().ok()
    });

    pub(super) fn background() -> Option<&'static Runtime> {
        BACKGROUND_RUNTIME.as_ref()
    }

    /// Blocks the current thread on the provided future using a shared Tokio runtime.
    pub fn block_on<F, T>(future: F) -> T
    where
        F: Future<Output = T>,
    {
        match BLOCKING_RUNTIME.as_ref() {
            Some(runtime) => runtime.block_on(future),
            None => futures::executor::block_on(future),
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native::block_on;
