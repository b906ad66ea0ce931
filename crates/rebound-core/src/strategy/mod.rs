//! Backoff strategies: stateful generators of retry delays.
//!
//! Every strategy shares one configuration contract ([`StrategyConfig`],
//! validated from [`StrategyOptions`]) and supplies only its own recurrence.
//! The provided [`BackoffStrategy::next`] applies randomization and the
//! ceiling on top of that recurrence, so variants never repeat the shared
//! bookkeeping.
//!
//! # Key Types
//!
//! - [`BackoffStrategy`] - Core trait consumed by the backoff controller
//! - [`ExponentialStrategy`] - `d[i] = min(d[i-1] * factor, max)`
//! - [`FibonacciStrategy`] - Fibonacci recurrence capped at `max`
//! - [`LinearStrategy`] - `d[i] = min(d[i-1] + factor, max)`
//! - [`InverseExponentialStrategy`] - `d[i] = trunc(d[i-1] / factor)`, decays to zero
//!
//! # Examples
//!
//! ```rust
//! use rebound_core::strategy::{BackoffStrategy, ExponentialStrategy, StrategyOptions};
//! use std::time::Duration;
//!
//! let mut strategy = ExponentialStrategy::new(
//!     StrategyOptions::new()
//!         .initial_delay(Duration::from_millis(10))
//!         .max_delay(Duration::from_millis(1000)),
//! )?;
//!
//! assert_eq!(strategy.next(), Duration::from_millis(10));
//! assert_eq!(strategy.next(), Duration::from_millis(20));
//!
//! strategy.reset();
//! assert_eq!(strategy.next(), Duration::from_millis(10));
//! # Ok::<(), rebound_core::BackoffError>(())
//! ```

mod exponential;
mod fibonacci;
mod inverse_exponential;
mod linear;

pub use exponential::ExponentialStrategy;
pub use fibonacci::FibonacciStrategy;
pub use inverse_exponential::InverseExponentialStrategy;
pub use linear::LinearStrategy;

use crate::error::{BackoffError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Initial delay used when none is configured, in milliseconds.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;

/// Maximum delay used when none is configured, in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

/// A stateful generator of backoff delays.
///
/// Implementations provide the deterministic recurrence through
/// [`next_delay`](Self::next_delay) and [`reset_delay`](Self::reset_delay).
/// Callers use [`next`](Self::next) and [`reset`](Self::reset), which layer the
/// shared randomization and range checks on top.
///
/// A strategy is owned by exactly one controller; nothing here is shared.
pub trait BackoffStrategy: Send {
    /// The validated configuration shared by every strategy.
    fn config(&self) -> &StrategyConfig;

    /// Advance the recurrence and return the next deterministic delay in milliseconds.
    fn next_delay(&mut self) -> f64;

    /// Restore the recurrence to its pre-first-call state.
    fn reset_delay(&mut self);

    /// Upper bound of every emitted delay, in milliseconds.
    ///
    /// Growing strategies are bounded by the maximum delay.
    fn ceiling(&self) -> f64 {
        self.config().max_delay_ms()
    }

    /// Compute the next delay, randomized according to the configuration.
    fn next(&mut self) -> Duration {
        let delay = self.next_delay();
        let ceiling = self.ceiling();
        self.config().randomize(delay, ceiling)
    }

    /// Restart the sequence from its first value.
    ///
    /// Configuration is left untouched.
    fn reset(&mut self) {
        self.reset_delay();
    }

    /// The first value of the sequence.
    fn initial_delay(&self) -> Duration {
        self.config().initial_delay()
    }

    /// The configured ceiling of the sequence.
    fn max_delay(&self) -> Duration {
        self.config().max_delay()
    }
}

impl<S: BackoffStrategy + ?Sized> BackoffStrategy for Box<S> {
    fn config(&self) -> &StrategyConfig {
        (**self).config()
    }

    fn next_delay(&mut self) -> f64 {
        (**self).next_delay()
    }

    fn reset_delay(&mut self) {
        (**self).reset_delay()
    }

    fn ceiling(&self) -> f64 {
        (**self).ceiling()
    }

    fn next(&mut self) -> Duration {
        (**self).next()
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Unvalidated strategy options.
///
/// Every field is optional; unset fields take their defaults when the
/// options are validated. Delays are expressed in milliseconds so the options
/// read naturally from configuration files.
///
/// # Examples
///
/// ```rust
/// use rebound_core::strategy::StrategyOptions;
/// use std::time::Duration;
///
/// let options = StrategyOptions::new()
///     .initial_delay(Duration::from_millis(50))
///     .max_delay(Duration::from_secs(5))
///     .randomization_factor(0.2)
///     .factor(3.0);
///
/// assert_eq!(options.initial_delay_ms, Some(50));
/// assert_eq!(options.max_delay_ms, Some(5000));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyOptions {
    /// First value of the sequence (default 100ms).
    pub initial_delay_ms: Option<u64>,

    /// Ceiling of the sequence (default 10s).
    pub max_delay_ms: Option<u64>,

    /// Fraction of uniform jitter added to each delay, in `[0, 1]` (default 0).
    pub randomization_factor: Option<f64>,

    /// Growth, increment or decay factor, interpreted by each strategy.
    pub factor: Option<f64>,
}

impl StrategyOptions {
    /// Create empty options; every value takes its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the first value of the sequence.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = Some(duration_to_ms(delay));
        self
    }

    /// Set the ceiling of the sequence.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = Some(duration_to_ms(delay));
        self
    }

    /// Set the randomization factor.
    ///
    /// A factor of 0.1 lets each delay grow by up to 10%.
    pub fn randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = Some(factor);
        self
    }

    /// Override the strategy-specific factor.
    pub fn factor(mut self, factor: f64) -> Self {
        self.factor = Some(factor);
        self
    }

    /// Validate a strategy-specific factor, falling back to `default` when unset.
    ///
    /// The factor must be finite and strictly greater than `lower_bound`.
    pub(crate) fn factor_or(&self, name: &str, default: f64, lower_bound: f64) -> Result<f64> {
        match self.factor {
            None => Ok(default),
            Some(factor) if factor.is_finite() && factor > lower_bound => Ok(factor),
            Some(factor) => Err(BackoffError::invalid(format!(
                "{name} factor should be greater than {lower_bound} but got {factor}"
            ))),
        }
    }
}

fn duration_to_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Validated configuration shared by all strategies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyConfig {
    initial_delay: f64,
    max_delay: f64,
    randomization_factor: f64,
}

impl StrategyConfig {
    /// Validate options.
    ///
    /// The four checks are independent preconditions:
    /// - initial delay of at least 1ms
    /// - maximum delay of at least 1ms
    /// - maximum delay strictly greater than the initial delay
    /// - randomization factor within `[0, 1]`
    pub fn from_options(options: &StrategyOptions) -> Result<Self> {
        let initial_delay = options.initial_delay_ms.unwrap_or(DEFAULT_INITIAL_DELAY_MS);
        let max_delay = options.max_delay_ms.unwrap_or(DEFAULT_MAX_DELAY_MS);
        let randomization_factor = options.randomization_factor.unwrap_or(0.0);

        if initial_delay < 1 {
            return Err(BackoffError::invalid(format!(
                "initial delay must be greater than 0 but got {initial_delay}ms"
            )));
        }
        if max_delay < 1 {
            return Err(BackoffError::invalid(format!(
                "maximum delay must be greater than 0 but got {max_delay}ms"
            )));
        }
        if max_delay <= initial_delay {
            return Err(BackoffError::invalid(format!(
                "maximum delay ({max_delay}ms) must be greater than the initial delay ({initial_delay}ms)"
            )));
        }
        if !(0.0..=1.0).contains(&randomization_factor) {
            return Err(BackoffError::invalid(format!(
                "randomization factor must be between 0 and 1 but got {randomization_factor}"
            )));
        }

        Ok(Self {
            initial_delay: initial_delay as f64,
            max_delay: max_delay as f64,
            randomization_factor,
        })
    }

    /// First value of the sequence.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay as u64)
    }

    /// Ceiling of the sequence.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay as u64)
    }

    /// Fraction of jitter applied to each delay.
    pub fn randomization_factor(&self) -> f64 {
        self.randomization_factor
    }

    /// Initial delay in milliseconds, for recurrences.
    pub fn initial_delay_ms(&self) -> f64 {
        self.initial_delay
    }

    /// Maximum delay in milliseconds, for recurrences.
    pub fn max_delay_ms(&self) -> f64 {
        self.max_delay
    }

    /// Apply jitter to a deterministic delay and round to whole milliseconds.
    ///
    /// `round(delay * (1 + U(0,1) * randomization_factor))`, kept within `[0, ceiling]`.
    /// A factor of 0 never draws and returns `delay` unchanged.
    pub fn randomize(&self, delay: f64, ceiling: f64) -> Duration {
        let multiple = if self.randomization_factor > 0.0 {
            1.0 + rand::random::<f64>() * self.randomization_factor
        } else {
            1.0
        };
        let randomized = (delay * multiple).round().clamp(0.0, ceiling.max(0.0));
        Duration::from_millis(randomized as u64)
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY_MS as f64,
            max_delay: DEFAULT_MAX_DELAY_MS as f64,
            randomization_factor: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn options(initial: u64, max: u64) -> StrategyOptions {
        StrategyOptions {
            initial_delay_ms: Some(initial),
            max_delay_ms: Some(max),
            ..Default::default()
        }
    }

    fn all_strategies(options: StrategyOptions) -> Vec<Box<dyn BackoffStrategy>> {
        vec![
            Box::new(ExponentialStrategy::new(options.clone()).unwrap()),
            Box::new(FibonacciStrategy::new(options.clone()).unwrap()),
            Box::new(LinearStrategy::new(options.clone()).unwrap()),
            Box::new(InverseExponentialStrategy::new(options).unwrap()),
        ]
    }

    #[test]
    fn test_defaults() {
        let config = StrategyConfig::from_options(&StrategyOptions::new()).unwrap();
        assert_eq!(config, StrategyConfig::default());
        assert_eq!(config.initial_delay(), Duration::from_millis(100));
        assert_eq!(config.max_delay(), Duration::from_secs(10));
        assert_eq!(config.randomization_factor(), 0.0);
    }

    #[test]
    fn test_initial_delay_must_be_positive() {
        let err = StrategyConfig::from_options(&options(0, 1000)).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("initial delay"));
    }

    #[test]
    fn test_max_delay_must_be_positive() {
        let opts = StrategyOptions {
            initial_delay_ms: None,
            max_delay_ms: Some(0),
            ..Default::default()
        };
        let err = StrategyConfig::from_options(&opts).unwrap_err();
        assert!(err.to_string().contains("maximum delay must be greater than 0"));
    }

    #[test]
    fn test_max_delay_must_exceed_initial_delay() {
        assert!(StrategyConfig::from_options(&options(100, 100)).is_err());
        assert!(StrategyConfig::from_options(&options(200, 100)).is_err());
        assert!(StrategyConfig::from_options(&options(100, 101)).is_ok());
    }

    #[test]
    fn test_randomization_factor_range() {
        for factor in [-0.1, 1.1, f64::NAN] {
            let opts = StrategyOptions::new().randomization_factor(factor);
            assert!(StrategyConfig::from_options(&opts).is_err(), "{factor}");
        }
        for factor in [0.0, 0.5, 1.0] {
            let opts = StrategyOptions::new().randomization_factor(factor);
            assert!(StrategyConfig::from_options(&opts).is_ok(), "{factor}");
        }
    }

    #[test]
    fn test_randomize_without_factor_is_exact() {
        let config = StrategyConfig::default();
        assert_eq!(config.randomize(250.0, 10_000.0), Duration::from_millis(250));
        assert_eq!(config.randomize(12.5, 10_000.0), Duration::from_millis(13));
    }

    #[test]
    fn test_randomize_stays_within_factor() {
        let config =
            StrategyConfig::from_options(&StrategyOptions::new().randomization_factor(0.5)).unwrap();

        let delays: Vec<_> = (0..50).map(|_| config.randomize(1000.0, 10_000.0)).collect();
        for delay in &delays {
            let millis = delay.as_millis();
            assert!(
                (1000..=1500).contains(&millis),
                "delay with 50% randomization should be in [1000ms, 1500ms], got {}ms",
                millis
            );
        }

        let all_same = delays.windows(2).all(|w| w[0] == w[1]);
        assert!(!all_same, "With randomization, delays should vary");
    }

    #[test]
    fn test_randomize_respects_ceiling() {
        let config =
            StrategyConfig::from_options(&StrategyOptions::new().randomization_factor(1.0)).unwrap();
        for _ in 0..50 {
            assert!(config.randomize(900.0, 1000.0) <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_option_setters() {
        let opts = StrategyOptions::new()
            .initial_delay(Duration::from_millis(20))
            .max_delay(Duration::from_secs(2))
            .randomization_factor(0.25)
            .factor(1.5);

        assert_eq!(opts.initial_delay_ms, Some(20));
        assert_eq!(opts.max_delay_ms, Some(2000));
        assert_eq!(opts.randomization_factor, Some(0.25));
        assert_eq!(opts.factor, Some(1.5));
    }

    #[test]
    fn test_boxed_strategy_forwards() {
        let mut boxed: Box<dyn BackoffStrategy> =
            Box::new(ExponentialStrategy::new(options(10, 1000)).unwrap());
        assert_eq!(boxed.next(), Duration::from_millis(10));
        assert_eq!(boxed.next(), Duration::from_millis(20));
        boxed.reset();
        assert_eq!(boxed.next(), Duration::from_millis(10));
        assert_eq!(boxed.initial_delay(), Duration::from_millis(10));
        assert_eq!(boxed.max_delay(), Duration::from_millis(1000));
    }

    proptest! {
        #[test]
        fn prop_first_value_is_initial_delay(initial in 1u64..5_000, extra in 1u64..50_000) {
            let max = initial + extra;
            let strategies: Vec<Box<dyn BackoffStrategy>> = vec![
                Box::new(ExponentialStrategy::new(options(initial, max)).unwrap()),
                Box::new(FibonacciStrategy::new(options(initial, max)).unwrap()),
                Box::new(LinearStrategy::new(options(initial, max)).unwrap()),
            ];
            for mut strategy in strategies {
                prop_assert_eq!(strategy.next(), Duration::from_millis(initial));
            }
        }

        #[test]
        fn prop_values_stay_in_range(
            initial in 1u64..5_000,
            extra in 1u64..50_000,
            randomization in 0.0f64..=1.0,
            steps in 1usize..64,
        ) {
            let max = initial + extra;
            let opts = options(initial, max).randomization_factor(randomization);
            for mut strategy in all_strategies(opts) {
                let ceiling = Duration::from_millis(strategy.ceiling() as u64);
                for _ in 0..steps {
                    prop_assert!(strategy.next() <= ceiling);
                }
            }
        }

        #[test]
        fn prop_reset_restarts_sequence(initial in 1u64..5_000, extra in 1u64..50_000, steps in 0usize..32) {
            let max = initial + extra;
            for mut strategy in all_strategies(options(initial, max)) {
                let first = strategy.next();
                for _ in 0..steps {
                    strategy.next();
                }
                strategy.reset();
                prop_assert_eq!(strategy.next(), first);
            }
        }
    }
}
