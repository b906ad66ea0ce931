//! A reusable retry wrapper around one operation and one controller.

use crate::driver::{self, AttemptObserver, Operation, Outcome};
use crate::function_call::Completion;
use parking_lot::Mutex;
use rebound_core::{Backoff, BackoffError, Result};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Runs retried calls of one operation through a caller-configured
/// [`Backoff`].
///
/// Unlike [`FunctionCall`](crate::FunctionCall), a handler is bound to
/// neither arguments nor a callback: every [`call`](Self::call) supplies its
/// own. Calls cannot overlap. After each delivery the history is cleared and
/// the controller is reset, so the next call starts from the first delay.
///
/// ```rust
/// use rebound::prelude::*;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), BackoffError> {
/// let mut backoff = rebound::exponential(
///     StrategyOptions::new().initial_delay(Duration::from_millis(10)),
/// )?;
/// backoff.fail_after(3)?;
///
/// let handler = FunctionHandler::new(
///     |path: &'static str| async move { std::fs::read_to_string(path).map_err(|e| e.kind()) },
///     backoff,
/// );
/// handler
///     .call("/etc/hostname", |completion| println!("{:?}", completion.result))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct FunctionHandler<A, T, E> {
    operation: Operation<A, T, E>,
    backoff: tokio::sync::Mutex<Backoff<E>>,
    results: Mutex<Vec<std::result::Result<T, E>>>,
}

impl<A, T, E> FunctionHandler<A, T, E>
where
    A: Clone + Send + Sync + 'static,
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Bind `operation` to `backoff`.
    ///
    /// The controller keeps its strategy, ceilings and listeners across calls.
    pub fn new<F, Fut>(operation: F, backoff: Backoff<E>) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        Self {
            operation: driver::operation(operation),
            backoff: tokio::sync::Mutex::new(backoff),
            results: Mutex::new(Vec::new()),
        }
    }

    /// Invoke the operation with `args`, retrying failures, and hand the
    /// terminal [`Completion`] to `callback`.
    ///
    /// Fails with [`BackoffError::OperationInProgress`] if another call is
    /// running. Dropping the returned future cancels the pending retry.
    ///
    /// The controller is left reset once the completion is delivered.
    pub async fn call<C>(&self, args: A, callback: C) -> Result<()>
    where
        C: FnOnce(Completion<T, E>),
    {
        let mut backoff = self
            .backoff
            .try_lock()
            .map_err(|_| BackoffError::OperationInProgress("handler call in progress"))?;
        // A dropped call can leave the timer armed.
        if !backoff.is_idle() {
            backoff.reset();
        }
        self.results.lock().clear();

        let mut history = HistoryGuard {
            results: &self.results,
        };
        let outcome = driver::drive(&self.operation, &args, &mut *backoff, &history, None).await?;

        let result = match outcome {
            Outcome::Finished(result) => result,
            Outcome::Aborted => return Ok(()),
        };
        let completion = Completion {
            result,
            history: history.take(),
        };
        drop(backoff);

        info!(
            success = completion.is_success(),
            attempts = completion.attempts(),
            "handler call completed"
        );
        callback(completion);
        Ok(())
    }

    /// Results recorded so far by the call in progress.
    pub fn get_results(&self) -> Vec<std::result::Result<T, E>> {
        self.results.lock().clone()
    }

    /// Whether a call is running.
    pub fn is_running(&self) -> bool {
        self.backoff.try_lock().is_err()
    }
}

impl<A, T, E> fmt::Debug for FunctionHandler<A, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionHandler")
            .field("running", &self.backoff.try_lock().is_err())
            .field("results", &self.results.lock().len())
            .finish()
    }
}

/// Records attempt results and clears them when the call ends, however it
/// ends.
struct HistoryGuard<'a, T, E> {
    results: &'a Mutex<Vec<std::result::Result<T, E>>>,
}

impl<T, E> HistoryGuard<'_, T, E> {
    fn take(&mut self) -> Vec<std::result::Result<T, E>> {
        std::mem::take(&mut *self.results.lock())
    }
}

impl<T, E> Drop for HistoryGuard<'_, T, E> {
    fn drop(&mut self) {
        self.results.lock().clear();
    }
}

impl<A, T: Clone, E> AttemptObserver<A, T, E> for HistoryGuard<'_, T, E>
where
    E: Clone,
{
    fn on_call(&self, _args: &A) {
        debug!("invoking wrapped operation");
    }

    fn on_callback(&self, result: &std::result::Result<T, E>) {
        self.results.lock().push(result.clone());
    }

    fn on_backoff(&self, attempt: u32, delay: Duration, _error: &E) {
        debug!(attempt, ?delay, "handler retry scheduled");
    }
}
