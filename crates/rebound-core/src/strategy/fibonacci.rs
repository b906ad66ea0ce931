//! Fibonacci backoff strategy.

use super::{BackoffStrategy, StrategyConfig, StrategyOptions};
use crate::error::Result;

/// Fibonacci backoff strategy.
///
/// Grows more gently than [`ExponentialStrategy`](super::ExponentialStrategy):
/// each delay is the sum of the two before it, starting from the initial
/// delay twice. Once a value saturates at the maximum delay, every later call
/// returns the maximum.
///
/// With a 10ms initial delay and a 1s maximum:
/// `10, 10, 20, 30, 50, 80, 130, 210, 340, 550, 890, 1000, 1000, ...`
///
/// This is the strategy used by a retry wrapper when none is set.
#[derive(Debug, Clone)]
pub struct FibonacciStrategy {
    config: StrategyConfig,
    delay: f64,
    next_delay: f64,
}

impl FibonacciStrategy {
    /// Create a Fibonacci strategy. The `factor` option is ignored.
    pub fn new(options: StrategyOptions) -> Result<Self> {
        Ok(Self::from_config(StrategyConfig::from_options(&options)?))
    }

    fn from_config(config: StrategyConfig) -> Self {
        Self {
            config,
            delay: 0.0,
            next_delay: config.initial_delay_ms(),
        }
    }
}

impl Default for FibonacciStrategy {
    fn default() -> Self {
        Self::from_config(StrategyConfig::default())
    }
}

impl BackoffStrategy for FibonacciStrategy {
    fn config(&self) -> &StrategyConfig {
        &self.config
    }

    fn next_delay(&mut self) -> f64 {
        let delay = self.next_delay.min(self.config.max_delay_ms());
        self.next_delay += self.delay;
        self.delay = delay;
        delay
    }

    fn reset_delay(&mut self) {
        self.delay = 0.0;
        self.next_delay = self.config.initial_delay_ms();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fibonacci_sequence() {
        let mut strategy = FibonacciStrategy::new(StrategyOptions {
            initial_delay_ms: Some(10),
            max_delay_ms: Some(1000),
            ..Default::default()
        })
        .unwrap();

        let delays: Vec<u64> = (0..12).map(|_| strategy.next().as_millis() as u64).collect();
        assert_eq!(
            delays,
            vec![10, 10, 20, 30, 50, 80, 130, 210, 340, 550, 890, 1000]
        );
    }

    #[test]
    fn test_saturates_at_max_delay() {
        let mut strategy = FibonacciStrategy::new(StrategyOptions {
            initial_delay_ms: Some(10),
            max_delay_ms: Some(100),
            ..Default::default()
        })
        .unwrap();

        for _ in 0..8 {
            strategy.next();
        }
        for _ in 0..5 {
            assert_eq!(strategy.next(), Duration::from_millis(100));
        }
    }

    #[test]
    fn test_reset_restarts_from_initial_delay() {
        let mut strategy = FibonacciStrategy::default();
        for _ in 0..4 {
            strategy.next();
        }
        strategy.reset();
        assert_eq!(strategy.next(), Duration::from_millis(100));
        assert_eq!(strategy.next(), Duration::from_millis(100));
        assert_eq!(strategy.next(), Duration::from_millis(200));
    }
}
