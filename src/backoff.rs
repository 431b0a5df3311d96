//! Interval generators used between attempts, plus the clock and sleeper
//! they depend on.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngExt;
use thiserror::Error;

use crate::error::Error;

pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;
pub const DEFAULT_MULTIPLIER: f64 = 1.5;
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_ELAPSED_TIME: Duration = Duration::from_secs(15 * 60);

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("sleep interrupted")]
pub struct Interrupted;

/// Wait primitive used between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> Result<(), Interrupted>;
}

#[derive(Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
        Ok(())
    }
}

/// Produces the wait before the next attempt; `None` means stop retrying.
pub trait BackOff: Send {
    fn reset(&mut self);

    fn next_backoff(&mut self) -> Option<Duration>;
}

/// Randomized exponential intervals, capped per interval and bounded by a
/// total elapsed time since the last [`BackOff::reset`].
pub struct ExponentialBackOff {
    initial_interval_millis: u64,
    randomization_factor: f64,
    multiplier: f64,
    max_interval_millis: u64,
    max_elapsed_time: Duration,
    current_interval_millis: u64,
    started_at: Instant,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ExponentialBackOff {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ExponentialBackOff")
            .field("initial_interval_millis", &self.initial_interval_millis)
            .field("randomization_factor", &self.randomization_factor)
            .field("multiplier", &self.multiplier)
            .field("max_interval_millis", &self.max_interval_millis)
            .field("max_elapsed_time", &self.max_elapsed_time)
            .field("current_interval_millis", &self.current_interval_millis)
            .finish()
    }
}

impl Default for ExponentialBackOff {
    fn default() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let started_at = clock.now();
        Self {
            initial_interval_millis: duration_millis(DEFAULT_INITIAL_INTERVAL),
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
            multiplier: DEFAULT_MULTIPLIER,
            max_interval_millis: duration_millis(DEFAULT_MAX_INTERVAL),
            max_elapsed_time: DEFAULT_MAX_ELAPSED_TIME,
            current_interval_millis: duration_millis(DEFAULT_INITIAL_INTERVAL),
            started_at,
            clock,
        }
    }
}

impl ExponentialBackOff {
    pub fn builder() -> ExponentialBackOffBuilder {
        ExponentialBackOffBuilder::default()
    }

    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_millis)
    }

    pub fn randomization_factor(&self) -> f64 {
        self.randomization_factor
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_millis)
    }

    pub fn max_elapsed_time(&self) -> Duration {
        self.max_elapsed_time
    }

    pub fn current_interval(&self) -> Duration {
        Duration::from_millis(self.current_interval_millis)
    }

    /// Time since construction or the last reset, read from the clock.
    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.started_at)
    }

    fn randomized_interval(&self, uniform: f64) -> u64 {
        let current = self.current_interval_millis as f64;
        let delta = self.randomization_factor * current;
        let low = current - delta;
        let high = current + delta;
        let value = (low + uniform * (high - low + 1.0)).round();
        value.clamp(low.ceil(), (high + 1.0).floor()) as u64
    }

    fn increment_current_interval(&mut self) {
        let current = self.current_interval_millis as f64;
        if current >= self.max_interval_millis as f64 / self.multiplier {
            self.current_interval_millis = self.max_interval_millis;
        } else {
            self.current_interval_millis = (current * self.multiplier) as u64;
        }
    }
}

impl BackOff for ExponentialBackOff {
    fn reset(&mut self) {
        self.current_interval_millis = self.initial_interval_millis;
        self.started_at = self.clock.now();
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.elapsed() > self.max_elapsed_time {
            return None;
        }
        let uniform = rand::rng().random_range(0.0..1.0);
        let interval = self.randomized_interval(uniform);
        self.increment_current_interval();
        Some(Duration::from_millis(interval))
    }
}

#[derive(Clone)]
pub struct ExponentialBackOffBuilder {
    initial_interval: Duration,
    randomization_factor: f64,
    multiplier: f64,
    max_interval: Duration,
    max_elapsed_time: Duration,
    clock: Arc<dyn Clock>,
}

impl Default for ExponentialBackOffBuilder {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
            multiplier: DEFAULT_MULTIPLIER,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_elapsed_time: DEFAULT_MAX_ELAPSED_TIME,
            clock: Arc::new(SystemClock),
        }
    }
}

impl ExponentialBackOffBuilder {
    pub fn initial_interval(mut self, initial_interval: Duration) -> Self {
        self.initial_interval = initial_interval;
        self
    }

    pub fn randomization_factor(mut self, randomization_factor: f64) -> Self {
        self.randomization_factor = randomization_factor;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    pub fn max_elapsed_time(mut self, max_elapsed_time: Duration) -> Self {
        self.max_elapsed_time = max_elapsed_time;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> crate::Result<ExponentialBackOff> {
        if self.initial_interval.is_zero() {
            return Err(Error::invalid_argument("initial_interval must be > 0"));
        }
        if !(0.0..1.0).contains(&self.randomization_factor) {
            return Err(Error::invalid_argument(
                "randomization_factor must be in [0, 1)",
            ));
        }
        if !(self.multiplier >= 1.0) {
            return Err(Error::invalid_argument("multiplier must be >= 1"));
        }
        if self.max_interval < self.initial_interval {
            return Err(Error::invalid_argument(
                "max_interval must be >= initial_interval",
            ));
        }
        if self.max_elapsed_time.is_zero() {
            return Err(Error::invalid_argument("max_elapsed_time must be > 0"));
        }

        let initial_interval_millis = duration_millis(self.initial_interval).max(1);
        let started_at = self.clock.now();
        Ok(ExponentialBackOff {
            initial_interval_millis,
            randomization_factor: self.randomization_factor,
            multiplier: self.multiplier,
            max_interval_millis: duration_millis(self.max_interval),
            max_elapsed_time: self.max_elapsed_time,
            current_interval_millis: initial_interval_millis,
            started_at,
            clock: self.clock,
        })
    }
}

/// Same interval every time, optionally limited to a number of retries.
#[derive(Clone, Debug)]
pub struct FixedBackOff {
    interval: Duration,
    max_retries: Option<usize>,
    issued: usize,
}

impl FixedBackOff {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_retries: None,
            issued: 0,
        }
    }

    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl BackOff for FixedBackOff {
    fn reset(&mut self) {
        self.issued = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.max_retries.is_some_and(|max| self.issued >= max) {
            return None;
        }
        self.issued += 1;
        Some(self.interval)
    }
}

/// Retries immediately.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZeroBackOff;

impl BackOff for ZeroBackOff {
    fn reset(&mut self) {}

    fn next_backoff(&mut self) -> Option<Duration> {
        Some(Duration::ZERO)
    }
}

/// Never retries.
#[derive(Clone, Copy, Debug, Default)]
pub struct StopBackOff;

impl BackOff for StopBackOff {
    fn reset(&mut self) {}

    fn next_backoff(&mut self) -> Option<Duration> {
        None
    }
}

/// Status-aware backoff consulted by the executor for non-2xx responses.
pub trait BackOffPolicy: Send {
    fn is_backoff_required(&self, status_code: u16) -> bool {
        is_server_unavailable(status_code)
    }

    fn reset(&mut self);

    fn next_backoff(&mut self) -> Option<Duration>;
}

fn is_server_unavailable(status_code: u16) -> bool {
    matches!(status_code, 500 | 503)
}

/// Built-in retry strategy applied after handlers and redirects decline.
#[derive(Default)]
pub enum RetryStrategy {
    #[default]
    None,
    FixedInterval(FixedBackOff),
    ExponentialBackoff(ExponentialBackOff),
    Custom(Box<dyn BackOffPolicy>),
}

impl fmt::Debug for RetryStrategy {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => formatter.write_str("None"),
            Self::FixedInterval(backoff) => formatter
                .debug_tuple("FixedInterval")
                .field(backoff)
                .finish(),
            Self::ExponentialBackoff(backoff) => formatter
                .debug_tuple("ExponentialBackoff")
                .field(backoff)
                .finish(),
            Self::Custom(_) => formatter.write_str("Custom(..)"),
        }
    }
}

impl RetryStrategy {
    pub fn exponential() -> Self {
        Self::ExponentialBackoff(ExponentialBackOff::default())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn is_backoff_required(&self, status_code: u16) -> bool {
        match self {
            Self::None => false,
            Self::FixedInterval(_) | Self::ExponentialBackoff(_) => {
                is_server_unavailable(status_code)
            }
            Self::Custom(policy) => policy.is_backoff_required(status_code),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Self::None => {}
            Self::FixedInterval(backoff) => backoff.reset(),
            Self::ExponentialBackoff(backoff) => backoff.reset(),
            Self::Custom(policy) => policy.reset(),
        }
    }

    pub fn next_backoff(&mut self) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::FixedInterval(backoff) => backoff.next_backoff(),
            Self::ExponentialBackoff(backoff) => backoff.next_backoff(),
            Self::Custom(policy) => policy.next_backoff(),
        }
    }
}

/// Runs `backoff` and sleeps for the interval it yields. Returns `false` when
/// the backoff says stop or the sleep was interrupted.
pub fn next_backoff_and_sleep(backoff: &mut dyn BackOff, sleeper: &dyn Sleeper) -> bool {
    let Some(interval) = backoff.next_backoff() else {
        return false;
    };
    sleeper.sleep(interval).is_ok()
}

fn duration_millis(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}
