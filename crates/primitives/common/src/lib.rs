//! Runtime utilities shared by the Tessera node crates.

use std::{
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    task,
    time::{Duration, Instant},
};
use tokio::task::JoinHandle;

pub mod parsers;
pub mod service;

/// A spawned tokio task that is aborted when its handle is dropped, so that a background task never outlives its
/// owner. Tasks spawned this way must be cancellation-safe.
pub struct AbortOnDrop<T>(JoinHandle<T>);

impl<T: Send + 'static> AbortOnDrop<T> {
    #[track_caller]
    pub fn spawn<F: Future<Output = T> + Send + 'static>(future: F) -> Self {
        Self(tokio::spawn(future))
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort()
    }
}

impl<T> Future for AbortOnDrop<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Self::Output> {
        // Only aborted on drop, so a polled task cannot have been cancelled.
        Pin::new(&mut self.get_mut().0).poll(cx).map(|res| res.expect("Task panicked"))
    }
}

/// Runs a CPU-bound closure on the global rayon pool and awaits its result. Panics are resumed on the calling task.
///
/// Prefer this over [`tokio::task::spawn_blocking`], which creates new OS threads we do not need.
pub async fn spawn_rayon_task<F, R>(func: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel();

    rayon::spawn(move || {
        let _result = tx.send(std::panic::catch_unwind(AssertUnwindSafe(func)));
    });

    match rx.await.expect("tokio channel closed") {
        Ok(res) => res,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

pub struct PerfStopwatch(pub Instant);

impl PerfStopwatch {
    #[allow(clippy::new_without_default)]
    pub fn new() -> PerfStopwatch {
        PerfStopwatch(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }
}

/// Logs the elapsed time of a [`PerfStopwatch`] at debug level. The last `{:?}` of the format string receives the
/// duration.
#[macro_export]
macro_rules! stopwatch_end {
    ($stopwatch:expr, $($arg:tt)+) => {
        tracing::debug!($($arg)+, $stopwatch.elapsed())
    }
}
