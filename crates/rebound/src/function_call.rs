//! Transparent retries around one asynchronous operation.
//!
//! A [`FunctionCall`] binds an operation, the arguments forwarded to every
//! attempt and a completion callback. [`start`](FunctionCall::start) invokes
//! the operation right away, retries failures through a [`Backoff`]
//! controller and hands exactly one [`Completion`] to the callback per run.
//!
//! ```text
//! Pending --start()--> Running --success/exhausted--> Completed --start()--> Running ...
//!    |                    |
//!    +------abort()-------+-----------> Aborted (permanent)
//! ```
//!
//! # Examples
//!
//! ```rust
//! use rebound::prelude::*;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU32, Ordering};
//!
//! # async fn example() -> Result<(), BackoffError> {
//! let attempts = Arc::new(AtomicU32::new(0));
//! let counter = Arc::clone(&attempts);
//!
//! let call = FunctionCall::new(
//!     move |url: String| {
//!         let counter = Arc::clone(&counter);
//!         async move {
//!             if counter.fetch_add(1, Ordering::SeqCst) < 2 {
//!                 Err(format!("{url}: connection reset"))
//!             } else {
//!                 Ok(200u16)
//!             }
//!         }
//!     },
//!     "https://example.com".to_string(),
//!     |completion: Completion<u16, String>| {
//!         println!("{:?} after {} attempts", completion.result, completion.attempts());
//!     },
//! );
//! call.fail_after(5)?;
//! call.start().await?;
//! # Ok(())
//! # }
//! ```

use crate::driver::{self, AttemptObserver, Operation, Outcome};
use parking_lot::Mutex;
use rebound_core::strategy::{BackoffStrategy, FibonacciStrategy};
use rebound_core::{Backoff, BackoffError, Result};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Lifecycle state of a [`FunctionCall`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// Never started
    Pending,
    /// A run is in progress
    Running,
    /// The last run delivered its completion
    Completed,
    /// Aborted; the operation will not be invoked again
    Aborted,
}

/// Terminal result of a run, handed to the completion callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion<T, E> {
    /// Result of the last attempt
    pub result: std::result::Result<T, E>,
    /// Results of every attempt of the run, oldest first (includes `result`)
    pub history: Vec<std::result::Result<T, E>>,
}

impl<T, E> Completion<T, E> {
    /// Whether the run ended with a success.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Number of times the operation was invoked.
    pub fn attempts(&self) -> usize {
        self.history.len()
    }
}

/// Observable steps of a run, for monitoring.
#[derive(Debug)]
pub enum CallEvent<'a, A, T, E> {
    /// The operation is about to be invoked.
    Call {
        /// Arguments forwarded to the operation
        args: &'a A,
    },

    /// The operation completed.
    Callback {
        /// What the operation returned
        result: &'a std::result::Result<T, E>,
    },

    /// A retry was scheduled.
    Backoff {
        /// Zero-based attempt number
        attempt: u32,
        /// Delay before the retry
        delay: Duration,
        /// Error that caused the retry
        error: &'a E,
    },
}

type CallListener<A, T, E> = Arc<dyn Fn(&CallEvent<'_, A, T, E>) + Send + Sync>;
type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type CompletionCallback<T, E> = Box<dyn FnMut(Completion<T, E>) + Send>;

struct CallState<T, E> {
    status: CallStatus,
    strategy: Option<Box<dyn BackoffStrategy>>,
    max_retries: Option<u32>,
    max_total_elapsed: Option<Duration>,
    retry_if: Option<RetryPredicate<E>>,
    results: Vec<std::result::Result<T, E>>,
    num_retries: u32,
}

struct Shared<T, E> {
    state: Mutex<CallState<T, E>>,
    aborted: watch::Sender<bool>,
}

impl<T, E> Shared<T, E> {
    fn abort(&self) {
        {
            let mut state = self.state.lock();
            if matches!(state.status, CallStatus::Completed | CallStatus::Aborted) {
                return;
            }
            state.status = CallStatus::Aborted;
        }
        self.aborted.send_replace(true);
        debug!("call aborted");
    }

    fn status(&self) -> CallStatus {
        self.state.lock().status
    }
}

/// Cloneable handle that aborts a [`FunctionCall`].
///
/// Usable from inside the wrapped operation (re-entrant abort) or from any
/// other task.
pub struct AbortHandle<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> AbortHandle<T, E> {
    /// Abort the call. See [`FunctionCall::abort`].
    pub fn abort(&self) {
        self.shared.abort();
    }

    /// Whether the call was aborted.
    pub fn is_aborted(&self) -> bool {
        self.shared.status() == CallStatus::Aborted
    }
}

impl<T, E> Clone for AbortHandle<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> fmt::Debug for AbortHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortHandle")
            .field("status", &self.shared.status())
            .finish()
    }
}

/// An asynchronous operation wrapped in a backoff loop.
///
/// All methods take `&self`, so a call can be shared (for example behind an
/// `Arc`) between the task driving [`start`](Self::start) and tasks that
/// observe or abort it.
pub struct FunctionCall<A, T, E> {
    operation: Operation<A, T, E>,
    args: A,
    shared: Arc<Shared<T, E>>,
    listeners: Mutex<Vec<CallListener<A, T, E>>>,
    callback: Mutex<CompletionCallback<T, E>>,
}

impl<A, T, E> FunctionCall<A, T, E>
where
    A: Clone + Send + Sync + 'static,
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Wrap `operation`, to be called with a clone of `args` on every attempt.
    ///
    /// `callback` receives the [`Completion`] of every run that is not aborted.
    pub fn new<F, Fut, C>(operation: F, args: A, callback: C) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        C: FnMut(Completion<T, E>) + Send + 'static,
    {
        let (aborted, _) = watch::channel(false);
        Self {
            operation: driver::operation(operation),
            args,
            shared: Arc::new(Shared {
                state: Mutex::new(CallState {
                    status: CallStatus::Pending,
                    strategy: None,
                    max_retries: None,
                    max_total_elapsed: None,
                    retry_if: None,
                    results: Vec::new(),
                    num_retries: 0,
                }),
                aborted,
            }),
            listeners: Mutex::new(Vec::new()),
            callback: Mutex::new(Box::new(callback)),
        }
    }

    /// Replace the default strategy (Fibonacci with default options).
    ///
    /// Fails while a run is in progress.
    pub fn set_strategy<S: BackoffStrategy + 'static>(&self, strategy: S) -> Result<()> {
        let mut state = self.lock_idle()?;
        state.strategy = Some(Box::new(strategy));
        Ok(())
    }

    /// Limit the number of retries. Fails while running or if zero.
    pub fn fail_after(&self, max_retries: u32) -> Result<()> {
        if max_retries == 0 {
            return Err(BackoffError::InvalidConfiguration(
                "maximum number of retries must be greater than 0 but got 0".to_string(),
            ));
        }
        self.lock_idle()?.max_retries = Some(max_retries);
        Ok(())
    }

    /// Limit the time spent retrying. Fails while running or if zero.
    pub fn fail_after_time(&self, max_total_elapsed: Duration) -> Result<()> {
        if max_total_elapsed.is_zero() {
            return Err(BackoffError::InvalidConfiguration(
                "maximum total time must be greater than 0".to_string(),
            ));
        }
        self.lock_idle()?.max_total_elapsed = Some(max_total_elapsed);
        Ok(())
    }

    /// Only retry errors accepted by `predicate`.
    ///
    /// A rejected error ends the run right away and is delivered as its result.
    pub fn retry_if<P>(&self, predicate: P) -> &Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.shared.state.lock().retry_if = Some(Arc::new(predicate));
        self
    }

    /// Register a listener for [`CallEvent`]s.
    pub fn on_event<F>(&self, listener: F) -> &Self
    where
        F: Fn(&CallEvent<'_, A, T, E>) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Arc::new(listener));
        self
    }

    /// Run the call with a controller built by [`Backoff::from_boxed`].
    ///
    /// See [`start_with`](Self::start_with).
    pub async fn start(&self) -> Result<()> {
        self.start_with(Backoff::from_boxed).await
    }

    /// Run the call with a controller built by `make_backoff` from the
    /// configured strategy.
    ///
    /// The first attempt happens immediately. Resolves once the completion was
    /// delivered, or once the run was aborted (then nothing is delivered).
    /// Returns immediately without invoking the operation if the call was
    /// aborted before. Fails with [`BackoffError::OperationInProgress`] if a
    /// run is already in progress.
    ///
    /// Dropping the returned future aborts the call. A panic in the operation
    /// or in `make_backoff` is not caught: it unwinds out of this method and
    /// leaves the call aborted. A panic in the completion callback also
    /// unwinds, but the run is already completed and the callback is kept for
    /// the next run.
    pub async fn start_with<F>(&self, make_backoff: F) -> Result<()>
    where
        F: FnOnce(Box<dyn BackoffStrategy>) -> Backoff<E>,
    {
        let (previous, strategy, max_retries, max_total_elapsed) = {
            let mut state = self.shared.state.lock();
            let previous = state.status;
            match previous {
                CallStatus::Running => {
                    return Err(BackoffError::OperationInProgress("call in progress"));
                }
                CallStatus::Aborted => return Ok(()),
                CallStatus::Pending | CallStatus::Completed => {}
            }
            state.status = CallStatus::Running;
            state.results.clear();
            state.num_retries = 0;
            let strategy = state
                .strategy
                .take()
                .unwrap_or_else(|| Box::new(FibonacciStrategy::default()));
            (
                previous,
                strategy,
                state.max_retries,
                state.max_total_elapsed,
            )
        };

        // Covers a panicking factory as well as a dropped run.
        let mut guard = RunGuard {
            shared: &self.shared,
            finished: false,
        };
        let mut backoff = make_backoff(strategy);
        if let Err(err) = apply_limits(&mut backoff, max_retries, max_total_elapsed) {
            guard.finished = true;
            let mut state = self.shared.state.lock();
            state.strategy = Some(backoff.into_strategy());
            state.status = previous;
            return Err(err);
        }

        let outcome = driver::drive(
            &self.operation,
            &self.args,
            &mut backoff,
            self,
            Some(self.shared.aborted.subscribe()),
        )
        .await;
        guard.finished = true;

        let completion = {
            let mut state = self.shared.state.lock();
            state.strategy = Some(backoff.into_strategy());

            let result = match outcome {
                Ok(Outcome::Finished(result)) => result,
                Ok(Outcome::Aborted) => {
                    debug!("run ended by abort");
                    return Ok(());
                }
                Err(err) => {
                    state.status = CallStatus::Completed;
                    return Err(err);
                }
            };
            if state.status == CallStatus::Aborted {
                return Ok(());
            }

            state.status = CallStatus::Completed;
            Completion {
                result,
                history: state.results.clone(),
            }
        };

        info!(
            success = completion.is_success(),
            attempts = completion.attempts(),
            "call completed"
        );
        // The callback stays owned by the call even if it unwinds.
        let mut callback = self.callback.lock();
        (*callback)(completion);
        Ok(())
    }

    /// Abort the call.
    ///
    /// Cancels a pending retry and suppresses every later invocation, event
    /// and completion delivery. When called from inside the operation, the
    /// completion of that attempt is ignored and not recorded. An operation
    /// already in flight is not interrupted. No-op once completed.
    ///
    /// Cancelling a pending retry resets the run's controller, so listeners
    /// registered on it through [`start_with`](Self::start_with) see one last
    /// [`BackoffEvent::Reset`](rebound_core::BackoffEvent::Reset) acknowledging
    /// the cancellation. No [`CallEvent`] follows an abort.
    pub fn abort(&self) {
        self.shared.abort();
    }

    /// Handle that can abort this call from elsewhere.
    pub fn abort_handle(&self) -> AbortHandle<T, E> {
        AbortHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Results of every attempt of the current or last run, oldest first.
    pub fn get_results(&self) -> Vec<std::result::Result<T, E>> {
        self.shared.state.lock().results.clone()
    }

    /// Result of the most recent attempt.
    pub fn last_result(&self) -> Option<std::result::Result<T, E>> {
        self.shared.state.lock().results.last().cloned()
    }

    /// Number of retries performed in the current or last run.
    pub fn num_retries(&self) -> u32 {
        self.shared.state.lock().num_retries
    }

    /// Current lifecycle state.
    pub fn status(&self) -> CallStatus {
        self.shared.status()
    }

    /// Never started.
    pub fn is_pending(&self) -> bool {
        self.status() == CallStatus::Pending
    }

    /// A run is in progress.
    pub fn is_running(&self) -> bool {
        self.status() == CallStatus::Running
    }

    /// The last run delivered its completion.
    pub fn is_completed(&self) -> bool {
        self.status() == CallStatus::Completed
    }

    /// Aborted.
    pub fn is_aborted(&self) -> bool {
        self.status() == CallStatus::Aborted
    }

    fn lock_idle(&self) -> Result<parking_lot::MutexGuard<'_, CallState<T, E>>> {
        let state = self.shared.state.lock();
        if state.status == CallStatus::Running {
            return Err(BackoffError::OperationInProgress("call in progress"));
        }
        Ok(state)
    }

    fn emit(&self, event: &CallEvent<'_, A, T, E>) {
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener(event);
        }
    }
}

impl<A, T, E> AttemptObserver<A, T, E> for FunctionCall<A, T, E>
where
    A: Clone + Send + Sync + 'static,
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn is_aborted(&self) -> bool {
        self.shared.status() == CallStatus::Aborted
    }

    fn on_call(&self, args: &A) {
        debug!("invoking wrapped operation");
        self.emit(&CallEvent::Call { args });
    }

    fn on_callback(&self, result: &std::result::Result<T, E>) {
        self.shared.state.lock().results.push(result.clone());
        self.emit(&CallEvent::Callback { result });
    }

    fn on_backoff(&self, attempt: u32, delay: Duration, error: &E) {
        self.emit(&CallEvent::Backoff {
            attempt,
            delay,
            error,
        });
    }

    fn on_retry(&self) {
        self.shared.state.lock().num_retries += 1;
    }

    fn should_retry(&self, error: &E) -> bool {
        let predicate = self.shared.state.lock().retry_if.clone();
        predicate.is_none_or(|predicate| predicate(error))
    }
}

impl<A, T, E> fmt::Debug for FunctionCall<A, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("FunctionCall")
            .field("status", &state.status)
            .field("max_retries", &state.max_retries)
            .field("max_total_elapsed", &state.max_total_elapsed)
            .field("results", &state.results.len())
            .field("num_retries", &state.num_retries)
            .finish()
    }
}

/// Marks the call aborted if a run is dropped before it finishes.
struct RunGuard<'a, T, E> {
    shared: &'a Shared<T, E>,
    finished: bool,
}

impl<T, E> Drop for RunGuard<'_, T, E> {
    fn drop(&mut self) {
        if !self.finished {
            self.shared.abort();
        }
    }
}

fn apply_limits<E>(
    backoff: &mut Backoff<E>,
    max_retries: Option<u32>,
    max_total_elapsed: Option<Duration>,
) -> Result<()> {
    if let Some(max_retries) = max_retries {
        backoff.fail_after(max_retries)?;
    }
    if let Some(max_total_elapsed) = max_total_elapsed {
        backoff.fail_after_time(max_total_elapsed)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_pending;

    fn noop_call() -> FunctionCall<u32, u32, String> {
        FunctionCall::new(|n: u32| async move { Ok(n) }, 7, |_| {})
    }

    #[test]
    fn test_new_call_is_pending() {
        let call = noop_call();
        assert!(call.is_pending());
        assert!(!call.is_running());
        assert!(call.get_results().is_empty());
        assert_eq!(call.last_result(), None);
        assert_eq!(call.num_retries(), 0);
    }

    #[test]
    fn test_limits_must_be_positive() {
        let call = noop_call();
        assert!(call.fail_after(0).unwrap_err().is_configuration());
        assert!(
            call.fail_after_time(Duration::ZERO)
                .unwrap_err()
                .is_configuration()
        );
    }

    #[test]
    fn test_abort_before_start() {
        let call = noop_call();
        let handle = call.abort_handle();
        handle.abort();
        assert!(call.is_aborted());
        assert!(handle.is_aborted());
    }

    #[test]
    fn test_completion_helpers() {
        let completion: Completion<u32, String> = Completion {
            result: Ok(3),
            history: vec![Err("a".into()), Err("b".into()), Ok(3)],
        };
        assert!(completion.is_success());
        assert_eq!(completion.attempts(), 3);
    }

    #[test]
    fn test_dropped_run_aborts_call() {
        let call = FunctionCall::new(
            |_: ()| std::future::pending::<std::result::Result<(), ()>>(),
            (),
            |_| {},
        );
        {
            let mut run = tokio_test::task::spawn(call.start());
            assert_pending!(run.poll());
            assert!(call.is_running());
        }
        assert!(call.is_aborted());
    }
}
