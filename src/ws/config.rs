#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;

const DEFAULT_RECONNECT_DELAY_DURATION: Duration = Duration::from_secs(3);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Configuration for WebSocket client behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Builder)]
pub struct Config {
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
    /// Upper bound on a single connect attempt. `None` leaves it to the transport.
    pub connect_timeout: Option<Duration>,
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct ReconnectConfig {
    /// Whether an unsolicited close schedules a reconnect at all
    #[builder(default = true)]
    pub enabled: bool,
    /// Number of consecutive failures after which the connection is marked failed
    #[builder(default = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    pub max_attempts: u32,
    /// Delay before each reconnect attempt
    #[builder(default)]
    pub strategy: DelayStrategy,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            strategy: DelayStrategy::default(),
        }
    }
}

/// How long to wait before reconnect attempt `n`.
///
/// Every variant is converted into a [`Backoff`] that the connection driver owns. The driver
/// resets it on each successful open, so attempt numbering restarts at 1.
#[non_exhaustive]
#[derive(Clone)]
pub enum DelayStrategy {
    /// Same delay before every attempt
    Fixed(Duration),
    /// Exponential growth with jitter, capped at `max`
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
    /// Caller supplied function of the 1-based attempt number
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl DelayStrategy {
    /// Exponential strategy starting at `initial` with the default cap and multiplier.
    #[must_use]
    pub const fn exponential(initial: Duration) -> Self {
        Self::Exponential {
            initial,
            max: DEFAULT_MAX_BACKOFF_DURATION,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    pub fn custom<F>(delay: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(delay))
    }

    /// Build the stateful backoff used by the connection driver.
    #[must_use]
    pub fn into_backoff(self) -> Box<dyn Backoff + Send> {
        match self {
            Self::Fixed(delay) => Box::new(Constant::new(delay)),
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => Box::new(
                ExponentialBackoffBuilder::default()
                    .with_initial_interval(initial)
                    .with_max_interval(max)
                    .with_multiplier(multiplier)
                    .with_max_elapsed_time(None) // We handle max attempts separately
                    .build(),
            ),
            Self::Custom(delay) => Box::new(AttemptBackoff { delay, attempt: 0 }),
        }
    }
}

impl Default for DelayStrategy {
    fn default() -> Self {
        Self::Fixed(DEFAULT_RECONNECT_DELAY_DURATION)
    }
}

impl fmt::Debug for DelayStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => f
                .debug_struct("Exponential")
                .field("initial", initial)
                .field("max", max)
                .field("multiplier", multiplier)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl From<ExponentialBackoff> for DelayStrategy {
    fn from(backoff: ExponentialBackoff) -> Self {
        Self::Exponential {
            initial: backoff.initial_interval,
            max: backoff.max_interval,
            multiplier: backoff.multiplier,
        }
    }
}

/// Adapts an attempt-indexed delay function to the [`Backoff`] interface.
struct AttemptBackoff {
    delay: Arc<dyn Fn(u32) -> Duration + Send + Sync>,
    attempt: u32,
}

impl Backoff for AttemptBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        Some((self.delay)(self.attempt))
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}
