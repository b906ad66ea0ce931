//! Linear backoff strategy.

use super::{BackoffStrategy, StrategyConfig, StrategyOptions};
use crate::error::Result;

/// Linear backoff strategy.
///
/// Each delay adds a fixed increment (`factor`, in milliseconds) to the
/// previous one, capped at the maximum delay.
///
/// ```text
/// delay[0] = initial_delay
/// delay[i] = min(delay[i-1] + factor, max_delay)
/// ```
#[derive(Debug, Clone)]
pub struct LinearStrategy {
    config: StrategyConfig,
    factor: f64,
    delay: f64,
    next_delay: f64,
}

impl LinearStrategy {
    /// Increment, in milliseconds, used when none is configured.
    pub const DEFAULT_FACTOR: f64 = 5.0;

    /// Create a linear strategy. A configured factor must be greater than 0.
    pub fn new(options: StrategyOptions) -> Result<Self> {
        let config = StrategyConfig::from_options(&options)?;
        let factor = options.factor_or("Linear", Self::DEFAULT_FACTOR, 0.0)?;
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

    /// The configured increment in milliseconds.
    pub fn factor(&self) -> f64 {
        self.factor
    }
}

impl Default for LinearStrategy {
    fn default() -> Self {
        Self::from_parts(StrategyConfig::default(), Self::DEFAULT_FACTOR)
    }
}

impl BackoffStrategy for LinearStrategy {
    fn config(&self) -> &StrategyConfig {
        &self.config
    }

    fn next_delay(&mut self) -> f64 {
        self.delay = self.next_delay.min(self.config.max_delay_ms());
        self.next_delay = self.delay + self.factor;
        self.delay
    }

    fn reset_delay(&mut self) {
        self.delay = 0.0;
        self.next_delay = self.config.initial_delay_ms();
    }
}
