//! Repeating Task - Cancellable Fixed-Period Timer
//!
//! Replaces ad hoc interval callbacks with an owned handle. A job runs
//! sequentially inside one tokio task, so two runs of the same job never
//! overlap; fires that come due while a run is still in progress are
//! skipped rather than queued. `cancel` waits for the task to exit, so
//! once it returns no further run can start.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

type Job = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle to a job running every `period`.
///
/// The first run happens one period after spawning. Dropping the handle
/// cancels the task without waiting for it.
pub struct RepeatingTask {
    name: &'static str,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl RepeatingTask {
    /// Spawn `job` on the current tokio runtime.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job: Job = Arc::new(move || job().boxed());
        let token = CancellationToken::new();
        let handle = tokio::spawn(Self::run(name, period, job, token.clone()));
        debug!(task = name, period_ms = period.as_millis(), "Repeating task armed");

        Self {
            name,
            token,
            handle: Some(handle),
        }
    }

    async fn run(name: &'static str, period: Duration, job: Job, token: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // A panicking run must not take the timer down with it.
            if AssertUnwindSafe(job()).catch_unwind().await.is_err() {
                error!(task = name, "Repeating task run panicked, continuing");
            }
        }

        debug!(task = name, "Repeating task exited");
    }

    /// Cancel and wait until the task has fully exited.
    ///
    /// A run in progress is allowed to finish first.
    pub async fn cancel(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(task = self.name, error = %e, "Repeating task ended abnormally");
            }
        }
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
