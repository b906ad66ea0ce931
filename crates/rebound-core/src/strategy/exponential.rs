//! Exponential backoff strategy.

use super::{BackoffStrategy, StrategyConfig, StrategyOptions};
use crate::error::Result;

/// Exponential backoff strategy.
///
/// Delays grow geometrically from the initial delay and saturate at the
/// maximum delay.
///
/// # Mathematical Formula
///
/// ```text
/// delay[0] = initial_delay
/// delay[i] = min(delay[i-1] * factor, max_delay)
/// ```
///
/// # Examples
///
/// ```rust
/// use rebound_core::strategy::{BackoffStrategy, ExponentialStrategy, StrategyOptions};
/// use std::time::Duration;
///
/// let mut strategy = ExponentialStrategy::new(
///     StrategyOptions::new()
///         .initial_delay(Duration::from_millis(100))
///         .max_delay(Duration::from_secs(30))
///         .factor(3.0),
/// )?;
///
/// assert_eq!(strategy.next(), Duration::from_millis(100));
/// assert_eq!(strategy.next(), Duration::from_millis(300));
/// # Ok::<(), rebound_core::BackoffError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ExponentialStrategy {
    config: StrategyConfig,
    factor: f64,
    delay: f64,
    next_delay: f64,
}

impl ExponentialStrategy {
    /// Growth factor used when none is configured.
    pub const DEFAULT_FACTOR: f64 = 2.0;

    /// Create an exponential strategy.
    ///
    /// A configured factor must be greater than 1.
    pub fn new(options: StrategyOptions) -> Result<Self> {
        let config = StrategyConfig::from_options(&options)?;
        let factor = options.factor_or("Exponential", Self::DEFAULT_FACTOR, 1.0)?;
        Ok(Self::from_parts(config, factor))
    }

    fn from_parts(config: StrategyConfig, factor: f64) -> Self {
        Self {
            config,
            factor,
            delay: 0.0,
            next_delay: config.initial_delay_ms(),
        }
    }

    /// The configured growth factor.
    pub fn factor(&self) -> f64 {
        self.factor
    }
}

impl Default for ExponentialStrategy {
    /// Defaults: 100ms initial delay, 10s maximum delay, factor 2, no randomization.
    fn default() -> Self {
        Self::from_parts(StrategyConfig::default(), Self::DEFAULT_FACTOR)
    }
}

impl BackoffStrategy for ExponentialStrategy {
    fn config(&self) -> &StrategyConfig {
        &self.config
    }

    fn next_delay(&mut self) -> f64 {
        self.delay = self.next_delay.min(self.config.max_delay_ms());
        self.next_delay = self.delay * self.factor;
        self.delay
    }

    fn reset_delay(&mut self) {
        self.delay = 0.0;
        self.next_delay = self.config.initial_delay_ms();
    }
}
