#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Core building blocks of rebound.
//!
//! This crate provides the pieces the retry wrappers in `rebound` are built on:
//!
//! - **Backoff strategies** via the [`BackoffStrategy`](strategy::BackoffStrategy) trait
//!   - Exponential, Fibonacci, Linear and Inverse exponential sequences
//!   - Shared validation and randomization
//! - **A timer-driven controller** via [`Backoff`](backoff::Backoff)
//!   - Attempt and wall-clock ceilings
//!   - Lifecycle events (`scheduled`, `ready`, `exhausted`, `reset`)
//! - **Declarative configuration** via [`BackoffConfig`](config::BackoffConfig)
//!
//! # Examples
//!
//! ```rust
//! use rebound_core::prelude::*;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), BackoffError> {
//! let mut backoff = rebound_core::exponential::<()>(
//!     StrategyOptions::new()
//!         .initial_delay(Duration::from_millis(10))
//!         .max_delay(Duration::from_secs(1)),
//! )?;
//! backoff.fail_after(5)?;
//!
//! while let Some(_delay) = backoff.backoff(None)? {
//!     backoff.ready().await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod strategy;

pub use backoff::{Backoff, BackoffEvent, BackoffListener};
pub use error::{BackoffError, Result};

use strategy::{ExponentialStrategy, FibonacciStrategy, StrategyOptions};

/// Build a controller around an [`ExponentialStrategy`].
pub fn exponential<C>(options: StrategyOptions) -> Result<Backoff<C>> {
    Ok(Backoff::new(ExponentialStrategy::new(options)?))
}

/// Build a controller around a [`FibonacciStrategy`].
pub fn fibonacci<C>(options: StrategyOptions) -> Result<Backoff<C>> {
    Ok(Backoff::new(FibonacciStrategy::new(options)?))
}

/// Convenient re-exports of commonly used items.
///
/// ```rust
/// use rebound_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::backoff::{Backoff, BackoffEvent};
    pub use crate::config::{BackoffConfig, StrategyKind};
    pub use crate::error::BackoffError;
    pub use crate::strategy::{
        BackoffStrategy, ExponentialStrategy, FibonacciStrategy, InverseExponentialStrategy,
        LinearStrategy, StrategyOptions,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::BackoffStrategy;
    use std::time::Duration;

    #[test]
    fn test_factories_pick_their_strategy() {
        let options = StrategyOptions::new()
            .initial_delay(Duration::from_millis(10))
            .max_delay(Duration::from_millis(1000));

        let backoff = exponential::<()>(options.clone()).unwrap();
        let mut strategy = backoff.into_strategy();
        strategy.next();
        assert_eq!(strategy.next(), Duration::from_millis(20));

        let backoff = fibonacci::<()>(options).unwrap();
        let mut strategy = backoff.into_strategy();
        strategy.next();
        assert_eq!(strategy.next(), Duration::from_millis(10));
    }

    #[test]
    fn test_factories_validate_options() {
        let options = StrategyOptions::new().initial_delay(Duration::ZERO);
        assert!(exponential::<()>(options.clone()).is_err());
        assert!(fibonacci::<()>(options).is_err());
    }
}
