//! The attempt loop shared by [`FunctionCall`](crate::FunctionCall) and
//! [`FunctionHandler`](crate::FunctionHandler).

use rebound_core::{Backoff, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Future returned by a wrapped operation.
pub(crate) type OperationFuture<T, E> = Pin<Box<dyn Future<Output = std::result::Result<T, E>> + Send>>;

/// A wrapped operation: called with the arguments of every attempt.
pub(crate) type Operation<A, T, E> = Arc<dyn Fn(A) -> OperationFuture<T, E> + Send + Sync>;

pub(crate) fn operation<A, T, E, F, Fut>(operation: F) -> Operation<A, T, E>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(operation(args)) as OperationFuture<T, E>)
}

/// Hooks the attempt loop calls at each step of a run.
pub(crate) trait AttemptObserver<A, T, E> {
    /// Checked before every invocation and right after every completion.
    fn is_aborted(&self) -> bool {
        false
    }

    fn on_call(&self, _args: &A) {}

    /// Sees every completion before the loop decides what to do with it.
    fn on_callback(&self, result: &std::result::Result<T, E>);

    fn on_backoff(&self, _attempt: u32, _delay: Duration, _error: &E) {}

    fn on_retry(&self) {}

    fn should_retry(&self, _error: &E) -> bool {
        true
    }
}

/// How a run ended.
pub(crate) enum Outcome<T, E> {
    /// Terminal result: success, rejected error or exhausted retries.
    Finished(std::result::Result<T, E>),
    /// Abort was observed; nothing may be delivered.
    Aborted,
}

/// Invoke `operation` until it succeeds, its error is not retryable or
/// `backoff` is exhausted.
///
/// The first attempt runs immediately. Attempts are strictly sequential: the
/// next one starts only after the previous completion was observed and the
/// controller's timer fired. When `abort` flips to `true` while a timer is
/// pending, the timer is cancelled and the run ends as [`Outcome::Aborted`].
pub(crate) async fn drive<A, T, E, O>(
    operation: &Operation<A, T, E>,
    args: &A,
    backoff: &mut Backoff<E>,
    observer: &O,
    mut abort: Option<watch::Receiver<bool>>,
) -> Result<Outcome<T, E>>
where
    A: Clone,
    E: Clone,
    O: AttemptObserver<A, T, E>,
{
    loop {
        if observer.is_aborted() {
            backoff.reset();
            return Ok(Outcome::Aborted);
        }

        observer.on_call(args);
        let result = operation(args.clone()).await;

        if observer.is_aborted() {
            backoff.reset();
            return Ok(Outcome::Aborted);
        }
        observer.on_callback(&result);

        let error = match result {
            Ok(value) => {
                backoff.reset();
                return Ok(Outcome::Finished(Ok(value)));
            }
            Err(error) => error,
        };

        if !observer.should_retry(&error) {
            debug!("error rejected by retry predicate");
            backoff.reset();
            return Ok(Outcome::Finished(Err(error)));
        }

        let attempt = backoff.attempt();
        match backoff.backoff(Some(error.clone()))? {
            Some(delay) => observer.on_backoff(attempt, delay, &error),
            // Exhausted: the controller already reset itself.
            None => return Ok(Outcome::Finished(Err(error))),
        }

        let fired = match abort.as_mut() {
            Some(abort) => tokio::select! {
                biased;
                Ok(_) = abort.wait_for(|aborted| *aborted) => false,
                ready = backoff.ready() => ready.is_some(),
            },
            None => backoff.ready().await.is_some(),
        };

        if !fired {
            // The controller's final `Reset` acknowledges the cancellation.
            backoff.reset();
            return Ok(Outcome::Aborted);
        }
        observer.on_retry();
    }
}
