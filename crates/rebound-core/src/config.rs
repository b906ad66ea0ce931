//! Declarative backoff configuration.
//!
//! [`BackoffConfig`] describes a controller as data (strategy kind, strategy
//! options and retry ceilings) so it can live in a configuration file.
//!
//! ```rust
//! use rebound_core::config::{BackoffConfig, StrategyKind};
//!
//! let config = BackoffConfig::from_json_str(
//!     r#"{ "strategy": "exponential", "initial_delay_ms": 10, "max_delay_ms": 1000, "fail_after": 5 }"#,
//! )?;
//! assert_eq!(config.strategy, StrategyKind::Exponential);
//!
//! let backoff = config.build_backoff::<()>()?;
//! assert_eq!(backoff.max_retries(), Some(5));
//! # Ok::<(), rebound_core::BackoffError>(())
//! ```

use crate::backoff::Backoff;
use crate::error::{BackoffError, Result};
use crate::strategy::{
    BackoffStrategy, ExponentialStrategy, FibonacciStrategy, InverseExponentialStrategy,
    LinearStrategy, StrategyOptions,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which recurrence a strategy follows.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// `d[i] = min(d[i-1] * factor, max)`
    Exponential,
    /// Fibonacci recurrence capped at `max`.
    #[default]
    Fibonacci,
    /// `d[i] = min(d[i-1] + factor, max)`
    Linear,
    /// `d[i] = trunc(d[i-1] / factor)`, decaying to zero.
    InverseExponential,
}

impl StrategyKind {
    /// Build a strategy of this kind from options.
    pub fn build(self, options: StrategyOptions) -> Result<Box<dyn BackoffStrategy>> {
        let strategy: Box<dyn BackoffStrategy> = match self {
            Self::Exponential => Box::new(ExponentialStrategy::new(options)?),
            Self::Fibonacci => Box::new(FibonacciStrategy::new(options)?),
            Self::Linear => Box::new(LinearStrategy::new(options)?),
            Self::InverseExponential => Box::new(InverseExponentialStrategy::new(options)?),
        };
        Ok(strategy)
    }

    /// Canonical name, as accepted by [`FromStr`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exponential => "exponential",
            Self::Fibonacci => "fibonacci",
            Self::Linear => "linear",
            Self::InverseExponential => "inverse_exponential",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = BackoffError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "exponential" => Ok(Self::Exponential),
            "" | "fibonacci" | "default" => Ok(Self::Fibonacci),
            "linear" => Ok(Self::Linear),
            "inverse_exponential" => Ok(Self::InverseExponential),
            other => Err(BackoffError::invalid(format!(
                "unknown backoff strategy: {other}"
            ))),
        }
    }
}

/// Complete description of a backoff controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Strategy kind (default: fibonacci)
    pub strategy: StrategyKind,

    /// Options of the strategy
    #[serde(flatten)]
    pub options: StrategyOptions,

    /// Attempt ceiling
    pub fail_after: Option<u32>,

    /// Wall-clock ceiling in milliseconds
    pub fail_after_ms: Option<u64>,
}

impl BackoffConfig {
    /// Parse a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Build the configured strategy.
    pub fn build_strategy(&self) -> Result<Box<dyn BackoffStrategy>> {
        self.strategy.build(self.options.clone())
    }

    /// Build an idle controller with both ceilings applied.
    pub fn build_backoff<C>(&self) -> Result<Backoff<C>> {
        let mut backoff = Backoff::from_boxed(self.build_strategy()?);
        if let Some(max_retries) = self.fail_after {
            backoff.fail_after(max_retries)?;
        }
        if let Some(max_ms) = self.fail_after_ms {
            backoff.fail_after_time(Duration::from_millis(max_ms))?;
        }
        Ok(backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_kind_from_str() {
        assert_eq!(
            "Exponential".parse::<StrategyKind>().unwrap(),
            StrategyKind::Exponential
        );
        assert_eq!(
            " inverse-exponential ".parse::<StrategyKind>().unwrap(),
            StrategyKind::InverseExponential
        );
        assert_eq!("".parse::<StrategyKind>().unwrap(), StrategyKind::Fibonacci);
        assert_eq!("linear".parse::<StrategyKind>().unwrap(), StrategyKind::Linear);

        let err = "quadratic".parse::<StrategyKind>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: unknown backoff strategy: quadratic"
        );
    }

    #[test]
    fn test_strategy_kind_display_round_trips() {
        for kind in [
            StrategyKind::Exponential,
            StrategyKind::Fibonacci,
            StrategyKind::Linear,
            StrategyKind::InverseExponential,
        ] {
            assert_eq!(kind.to_string().parse::<StrategyKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_default_config() {
        let config = BackoffConfig::default();
        assert_eq!(config.strategy, StrategyKind::Fibonacci);
        let backoff = config.build_backoff::<()>().unwrap();
        assert_eq!(backoff.max_retries(), None);
        assert_eq!(backoff.max_total_elapsed(), None);
        assert_eq!(backoff.strategy().initial_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_from_json() {
        let config = BackoffConfig::from_json_str(
            r#"{
                "strategy": "linear",
                "initial_delay_ms": 10,
                "max_delay_ms": 40,
                "factor": 5,
                "fail_after": 3,
                "fail_after_ms": 2000
            }"#,
        )
        .unwrap();

        assert_eq!(config.strategy, StrategyKind::Linear);
        assert_eq!(config.options.factor, Some(5.0));

        let backoff = config.build_backoff::<()>().unwrap();
        assert_eq!(backoff.max_retries(), Some(3));
        assert_eq!(backoff.max_total_elapsed(), Some(Duration::from_secs(2)));

        let mut strategy = config.build_strategy().unwrap();
        assert_eq!(strategy.next(), Duration::from_millis(10));
        assert_eq!(strategy.next(), Duration::from_millis(15));
    }

    #[test]
    fn test_from_toml() {
        let config: BackoffConfig = toml::from_str(
            r#"
                strategy = "inverse_exponential"
                initial_delay_ms = 512
                max_delay_ms = 1024
            "#,
        )
        .unwrap();

        let mut strategy = config.build_strategy().unwrap();
        assert_eq!(strategy.next(), Duration::from_millis(512));
        assert_eq!(strategy.next(), Duration::from_millis(256));
    }

    #[test]
    fn test_invalid_json_is_configuration_error() {
        let err = BackoffConfig::from_json_str(r#"{ "strategy": "sideways" }"#).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_invalid_values_fail_at_build_time() {
        let config = BackoffConfig {
            fail_after: Some(0),
            ..Default::default()
        };
        assert!(config.build_backoff::<()>().unwrap_err().is_configuration());

        let config = BackoffConfig {
            strategy: StrategyKind::Exponential,
            options: StrategyOptions::new().factor(0.5),
            ..Default::default()
        };
        assert!(config.build_strategy().is_err());
    }
}
