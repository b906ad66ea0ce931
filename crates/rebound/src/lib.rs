#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Transparent retries for asynchronous operations.
//!
//! `rebound` wraps a fallible async operation and re-invokes it after
//! increasing delays until it succeeds, a retry ceiling is hit or the call is
//! aborted. It is built on the strategies and the timer-driven controller of
//! [`rebound_core`], which are re-exported here.
//!
//! - [`FunctionCall`]: one operation bound to its arguments and a completion
//!   callback, with abort support and call history
//! - [`FunctionHandler`]: a reusable wrapper around one operation and one
//!   caller-configured [`Backoff`]
//!
//! # Examples
//!
//! ```rust
//! use rebound::prelude::*;
//! use std::time::Duration;
//!
//! # async fn fetch(id: u64) -> Result<String, std::io::ErrorKind> { Ok(id.to_string()) }
//! # async fn example() -> Result<(), BackoffError> {
//! let call = rebound::call(fetch, 42, |completion| {
//!     println!("{:?} after {} attempts", completion.result, completion.attempts());
//! });
//! call.set_strategy(ExponentialStrategy::new(
//!     StrategyOptions::new()
//!         .initial_delay(Duration::from_millis(10))
//!         .max_delay(Duration::from_secs(1)),
//! )?)?;
//! call.fail_after(5)?;
//! call.start().await?;
//! # Ok(())
//! # }
//! ```

mod driver;
pub mod function_call;
pub mod function_handler;

pub use function_call::{AbortHandle, CallEvent, CallStatus, Completion, FunctionCall};
pub use function_handler::FunctionHandler;

pub use rebound_core::{
    Backoff, BackoffError, BackoffEvent, BackoffListener, Result, backoff, config, error,
    exponential, fibonacci, strategy,
};

use std::future::Future;

/// Wrap `operation` in a [`FunctionCall`] using the default Fibonacci
/// strategy.
///
/// Shorthand for [`FunctionCall::new`].
pub fn call<A, T, E, F, Fut, C>(operation: F, args: A, callback: C) -> FunctionCall<A, T, E>
where
    A: Clone + Send + Sync + 'static,
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    C: FnMut(Completion<T, E>) + Send + 'static,
{
    FunctionCall::new(operation, args, callback)
}

/// Convenient re-exports of commonly used items.
///
/// ```rust
/// use rebound::prelude::*;
/// ```
pub mod prelude {
    pub use crate::function_call::{AbortHandle, CallEvent, CallStatus, Completion, FunctionCall};
    pub use crate::function_handler::FunctionHandler;
    pub use rebound_core::prelude::*;
}
