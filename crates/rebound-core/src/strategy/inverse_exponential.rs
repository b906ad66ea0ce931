//! Inverse exponential strategy.

use super::{BackoffStrategy, StrategyConfig, StrategyOptions};
use crate::error::Result;

/// Inverse exponential strategy.
///
/// Descends instead of growing: each delay is the previous one divided by
/// `factor`, truncated to whole milliseconds, until it reaches zero. Suited to
/// rate-limit style backoff that relaxes over time.
///
/// ```text
/// delay[0] = initial_delay
/// delay[i] = max(trunc(delay[i-1] / factor), 0)
/// ```
///
/// Every value lies in `[0, initial_delay]`; the maximum delay is validated
/// but never reached.
#[derive(Debug, Clone)]
pub struct InverseExponentialStrategy {
    config: StrategyConfig,
    factor: f64,
    delay: f64,
    next_delay: f64,
}

impl InverseExponentialStrategy {
    /// Division factor used when none is configured.
    pub const DEFAULT_FACTOR: f64 = 2.0;

    /// Create an inverse exponential strategy.
    ///
    /// A configured factor must be greater than 1.
    pub fn new(options: StrategyOptions) -> Result<Self> {
        let config = StrategyConfig::from_options(&options)?;
        let factor = options.factor_or("Inverse exponential", Self::DEFAULT_FACTOR, 1.0)?;
        Ok(Self::from_parts(config, factor))
    }

    fn from_parts(config: StrategyConfig, factor: f64) -> Self {
        Self {
            config,
            factor,
            delay: config.initial_delay_ms(),
            next_delay: config.initial_delay_ms(),
        }
    }

    /// The configured division factor.
    pub fn factor(&self) -> f64 {
        self.factor
    }
}

impl Default for InverseExponentialStrategy {
    fn default() -> Self {
        Self::from_parts(StrategyConfig::default(), Self::DEFAULT_FACTOR)
    }
}

impl BackoffStrategy for InverseExponentialStrategy {
    fn config(&self) -> &StrategyConfig {
        &self.config
    }

    fn next_delay(&mut self) -> f64 {
        self.delay = self.next_delay.max(0.0);
        self.next_delay = (self.delay / self.factor).trunc();
        self.delay
    }

    fn reset_delay(&mut self) {
        self.delay = self.config.initial_delay_ms();
        self.next_delay = self.config.initial_delay_ms();
    }

    fn ceiling(&self) -> f64 {
        self.config.initial_delay_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn inverse(initial: u64, factor: Option<f64>) -> InverseExponentialStrategy {
        InverseExponentialStrategy::new(StrategyOptions {
            initial_delay_ms: Some(initial),
            max_delay_ms: Some(initial * 2),
            factor,
            ..Default::default()
        })
        .unwrap()
    }

    fn millis(strategy: &mut InverseExponentialStrategy, count: usize) -> Vec<u64> {
        (0..count).map(|_| strategy.next().as_millis() as u64).collect()
    }

    #[test]
    fn test_inverse_exponential_sequence() {
        let mut strategy = inverse(512, None);
        assert_eq!(
            millis(&mut strategy, 11),
            vec![512, 256, 128, 64, 32, 16, 8, 4, 2, 1, 0]
        );
    }

    #[test]
    fn test_configurable_factor() {
        let mut strategy = inverse(1024, Some(4.0));
        assert_eq!(millis(&mut strategy, 7), vec![1024, 256, 64, 16, 4, 1, 0]);
    }

    #[test]
    fn test_truncates_odd_values() {
        let mut strategy = inverse(100, Some(3.0));
        assert_eq!(millis(&mut strategy, 6), vec![100, 33, 11, 3, 1, 0]);
    }

    #[test]
    fn test_stays_at_zero() {
        let mut strategy = inverse(4, None);
        millis(&mut strategy, 3);
        for _ in 0..3 {
            assert_eq!(strategy.next(), Duration::ZERO);
        }
    }

    #[test]
    fn test_randomization_never_exceeds_initial_delay() {
        let mut strategy = InverseExponentialStrategy::new(StrategyOptions {
            initial_delay_ms: Some(512),
            max_delay_ms: Some(10_000),
            randomization_factor: Some(1.0),
            ..Default::default()
        })
        .unwrap();

        for _ in 0..20 {
            assert!(strategy.next() <= Duration::from_millis(512));
        }
    }

    #[test]
    fn test_factor_must_exceed_one() {
        assert!(InverseExponentialStrategy::new(StrategyOptions::new().factor(1.0)).is_err());
    }

    #[test]
    fn test_reset_restarts_from_initial_delay() {
        let mut strategy = inverse(512, None);
        strategy.next();
        strategy.next();
        strategy.reset();
        assert_eq!(strategy.next(), Duration::from_millis(512));
    }
}
