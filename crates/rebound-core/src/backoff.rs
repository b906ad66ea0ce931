//! The backoff controller: a strategy plus timer scheduling, retry ceilings and lifecycle events.
//!
//! A [`Backoff`] is idle until [`backoff`](Backoff::backoff) arms its timer.
//! Awaiting [`ready`](Backoff::ready) lets the timer fire, which emits
//! [`BackoffEvent::Ready`] and makes the controller eligible for the next
//! `backoff()` call. At most one timer is pending at any time; arming a second
//! one fails with [`BackoffError::OperationInProgress`].
//!
//! ```text
//! Idle --backoff()--> Armed --timer fires--> Ready/Idle --backoff()--> Armed ...
//!  ^                                                                     |
//!  +----------------------------- reset() -------------------------------+
//! ```
//!
//! # Examples
//!
//! ```rust
//! use rebound_core::backoff::{Backoff, BackoffEvent};
//! use rebound_core::strategy::{ExponentialStrategy, StrategyOptions};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), rebound_core::BackoffError> {
//! let strategy = ExponentialStrategy::new(
//!     StrategyOptions::new()
//!         .initial_delay(Duration::from_millis(10))
//!         .max_delay(Duration::from_secs(1)),
//! )?;
//!
//! let mut backoff: Backoff<&str> = Backoff::new(strategy);
//! backoff.fail_after(3)?;
//! backoff.on_event(|event| {
//!     if let BackoffEvent::Exhausted { context } = event {
//!         eprintln!("giving up: {:?}", context);
//!     }
//! });
//!
//! while let Some(delay) = backoff.backoff(Some("connection refused"))? {
//!     println!("retrying in {:?}", delay);
//!     backoff.ready().await;
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{BackoffError, Result};
use crate::strategy::BackoffStrategy;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Instant, Sleep};
use tracing::{debug, trace, warn};

/// Signals emitted by a [`Backoff`] controller.
///
/// Contexts are borrowed for the duration of the listener call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffEvent<'a, C> {
    /// A timer was armed for `delay`.
    Scheduled {
        /// Zero-based attempt number
        attempt: u32,
        /// Delay until the timer fires
        delay: Duration,
        /// Context handed to `backoff()`
        context: Option<&'a C>,
    },

    /// The timer fired; the next attempt may proceed.
    Ready {
        /// Zero-based attempt number
        attempt: u32,
        /// Delay that just elapsed
        delay: Duration,
    },

    /// A retry ceiling was reached. The controller resets itself right after.
    Exhausted {
        /// Context handed to the `backoff()` call that hit the ceiling
        context: Option<&'a C>,
    },

    /// The controller returned to idle.
    Reset,
}

impl<C> BackoffEvent<'_, C> {
    /// Short name of the event, as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scheduled { .. } => "scheduled",
            Self::Ready { .. } => "ready",
            Self::Exhausted { .. } => "exhausted",
            Self::Reset => "reset",
        }
    }
}

/// Listener invoked synchronously for every [`BackoffEvent`].
pub type BackoffListener<C> = Box<dyn Fn(&BackoffEvent<'_, C>) + Send + Sync>;

/// Timer-driven backoff controller.
///
/// Owns exactly one strategy. `C` is the context type carried by the
/// `scheduled` and `exhausted` signals, typically the error that caused the
/// backoff.
///
/// The timer is a `tokio` sleep owned by the controller: it fires when
/// [`ready`](Self::ready) is awaited, so the controller must be used inside a
/// tokio runtime. Dropping the pending sleep is how the timer is cancelled,
/// which makes cancellation infallible even if the deadline already passed.
pub struct Backoff<C = ()> {
    strategy: Box<dyn BackoffStrategy>,
    max_retries: Option<u32>,
    max_total_elapsed: Option<Duration>,
    attempt: u32,
    started_at: Option<Instant>,
    delay: Duration,
    pending: Option<Pin<Box<Sleep>>>,
    listeners: Vec<BackoffListener<C>>,
}

impl<C> Backoff<C> {
    /// Create an idle controller around a strategy.
    pub fn new<S: BackoffStrategy + 'static>(strategy: S) -> Self {
        Self::from_boxed(Box::new(strategy))
    }

    /// Create an idle controller around an already boxed strategy.
    pub fn from_boxed(strategy: Box<dyn BackoffStrategy>) -> Self {
        Self {
            strategy,
            max_retries: None,
            max_total_elapsed: None,
            attempt: 0,
            started_at: None,
            delay: Duration::ZERO,
            pending: None,
            listeners: Vec::new(),
        }
    }

    /// Register a listener for every emitted event.
    ///
    /// Listeners run synchronously, in registration order.
    pub fn on_event<F>(&mut self, listener: F) -> &mut Self
    where
        F: Fn(&BackoffEvent<'_, C>) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
        self
    }

    /// Limit the number of backoffs. Once `max_retries` backoffs have fired,
    /// the next `backoff()` call emits [`BackoffEvent::Exhausted`].
    ///
    /// Fails if `max_retries` is zero or if the controller is not idle.
    pub fn fail_after(&mut self, max_retries: u32) -> Result<()> {
        if max_retries == 0 {
            return Err(BackoffError::invalid(
                "maximum number of retries must be greater than 0 but got 0",
            ));
        }
        self.ensure_idle()?;
        self.max_retries = Some(max_retries);
        Ok(())
    }

    /// Limit the time elapsed since the first backoff of a run.
    ///
    /// A backoff that would end past the limit is shortened to end exactly
    /// at it; the next `backoff()` call then emits [`BackoffEvent::Exhausted`].
    /// Fails if the limit is zero or if the controller is not idle.
    pub fn fail_after_time(&mut self, max_total_elapsed: Duration) -> Result<()> {
        if max_total_elapsed.is_zero() {
            return Err(BackoffError::invalid(
                "maximum total time must be greater than 0",
            ));
        }
        self.ensure_idle()?;
        self.max_total_elapsed = Some(max_total_elapsed);
        Ok(())
    }

    /// Arm the timer for the next delay, or report exhaustion.
    ///
    /// Returns `Some(delay)` after emitting [`BackoffEvent::Scheduled`], or
    /// `None` after emitting [`BackoffEvent::Exhausted`] and resetting.
    /// `context` is forwarded to listeners, usually the error being retried.
    ///
    /// Fails with [`BackoffError::OperationInProgress`] while a timer is pending.
    pub fn backoff(&mut self, context: Option<C>) -> Result<Option<Duration>> {
        if self.pending.is_some() {
            return Err(BackoffError::OperationInProgress("backoff in progress"));
        }

        let now = Instant::now();
        let started_at = *self.started_at.get_or_insert(now);
        let time_left = self
            .max_total_elapsed
            .map(|max| max.saturating_sub(now.duration_since(started_at)));

        if Some(self.attempt) == self.max_retries || time_left == Some(Duration::ZERO) {
            warn!(attempt = self.attempt, "backoff exhausted");
            self.emit(&BackoffEvent::Exhausted {
                context: context.as_ref(),
            });
            self.reset();
            return Ok(None);
        }

        let mut delay = self.strategy.next();
        if let Some(time_left) = time_left {
            delay = delay.min(time_left);
        }

        self.delay = delay;
        self.pending = Some(Box::pin(tokio::time::sleep(delay)));
        debug!(
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "backoff scheduled"
        );
        self.emit(&BackoffEvent::Scheduled {
            attempt: self.attempt,
            delay,
            context: context.as_ref(),
        });

        Ok(Some(delay))
    }

    /// Wait for the pending timer to fire.
    ///
    /// Emits [`BackoffEvent::Ready`] and returns the attempt number and delay
    /// that just elapsed, then increments the attempt counter. Returns `None`
    /// immediately when no timer is pending.
    ///
    /// Cancel safe: dropping the returned future leaves the timer armed.
    pub async fn ready(&mut self) -> Option<(u32, Duration)> {
        let sleep = self.pending.as_mut()?;
        sleep.as_mut().await;

        self.pending = None;
        let attempt = self.attempt;
        let delay = self.delay;
        debug!(attempt, delay_ms = delay.as_millis() as u64, "backoff ready");
        self.emit(&BackoffEvent::Ready { attempt, delay });
        self.attempt += 1;

        Some((attempt, delay))
    }

    /// Cancel any pending timer and return to idle.
    ///
    /// Resets the attempt counter, forgets the run's start time and restarts
    /// the strategy's sequence. Configured ceilings are kept. Safe to call at
    /// any time.
    pub fn reset(&mut self) {
        self.pending = None;
        self.attempt = 0;
        self.started_at = None;
        self.delay = Duration::ZERO;
        self.strategy.reset();
        trace!("backoff reset");
        self.emit(&BackoffEvent::Reset);
    }

    /// Number of timers that fired in the current run.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether a timer is pending.
    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether no run is in progress.
    pub fn is_idle(&self) -> bool {
        self.pending.is_none() && self.started_at.is_none()
    }

    /// Configured attempt ceiling.
    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// Configured wall-clock ceiling.
    pub fn max_total_elapsed(&self) -> Option<Duration> {
        self.max_total_elapsed
    }

    /// The owned strategy.
    pub fn strategy(&self) -> &dyn BackoffStrategy {
        self.strategy.as_ref()
    }

    /// Give the strategy back, dropping any pending timer.
    pub fn into_strategy(self) -> Box<dyn BackoffStrategy> {
        self.strategy
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.is_idle() {
            Ok(())
        } else {
            Err(BackoffError::OperationInProgress("backoff in progress"))
        }
    }

    fn emit(&self, event: &BackoffEvent<'_, C>) {
        for listener in &self.listeners {
            listener(event);
        }
    }
}

impl<C> fmt::Debug for Backoff<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backoff")
            .field("max_retries", &self.max_retries)
            .field("max_total_elapsed", &self.max_total_elapsed)
            .field("attempt", &self.attempt)
            .field("armed", &self.pending.is_some())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
