use crate::config::RetryConfig;
use crate::pipeline::{ErrorKind, TaskError};
use crate::task::ProcessingTask;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What to do with a failed task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Resubmit the task once `at` has passed
    Retry { at: Instant, reason: String },

    /// Give up; the task goes to the dead-letter queue
    DeadLetter { reason: String },
}

/// Maps a failed attempt to a retry decision
///
/// `task.attempt()` is the attempt that just failed, starting at 0.
pub trait RetryPolicy: Send + Sync {
    fn on_failure(&self, task: &ProcessingTask, error: &TaskError, now: Instant) -> RetryDecision;
}

impl<F> RetryPolicy for F
where
    F: Fn(&ProcessingTask, &TaskError, Instant) -> RetryDecision + Send + Sync,
{
    fn on_failure(&self, task: &ProcessingTask, error: &TaskError, now: Instant) -> RetryDecision {
        self(task, error, now)
    }
}

/// Retries every failure after a fixed delay
#[derive(Debug, Clone, Copy)]
pub struct RetryAlways {
    pub delay: Duration,
}

impl RetryPolicy for RetryAlways {
    fn on_failure(&self, _task: &ProcessingTask, error: &TaskError, now: Instant) -> RetryDecision {
        RetryDecision::Retry {
            at: now + self.delay,
            reason: error.to_string(),
        }
    }
}

/// Exponential backoff: `base * 2^attempt`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// No delay between attempts
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Delay before the retry that follows failed attempt `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

/// Retries until `max_attempts` attempts have failed, then dead-letters
#[derive(Debug, Clone, Copy)]
pub struct MaxAttempts {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl MaxAttempts {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl RetryPolicy for MaxAttempts {
    fn on_failure(&self, task: &ProcessingTask, error: &TaskError, now: Instant) -> RetryDecision {
        let attempts_made = task.attempt() + 1;
        if attempts_made >= self.max_attempts {
            return RetryDecision::DeadLetter {
                reason: format!("gave up after {} attempts: {}", attempts_made, error),
            };
        }

        RetryDecision::Retry {
            at: now + self.backoff.delay(task.attempt()),
            reason: error.to_string(),
        }
    }
}

/// Dead-letters the listed error kinds at once, defers everything else
pub struct DeadLetterOn {
    pub kinds: Vec<ErrorKind>,
    pub inner: Arc<dyn RetryPolicy>,
}

impl RetryPolicy for DeadLetterOn {
    fn on_failure(&self, task: &ProcessingTask, error: &TaskError, now: Instant) -> RetryDecision {
        let kind = error.kind();
        if self.kinds.contains(&kind) {
            return RetryDecision::DeadLetter {
                reason: format!("{} ({})", error, kind),
            };
        }
        self.inner.on_failure(task, error, now)
    }
}

/// Builds the policy described by the `[retry]` configuration section
pub fn from_config(config: &RetryConfig) -> Arc<dyn RetryPolicy> {
    let backoff = Backoff::new(
        Duration::from_millis(config.base_delay_ms),
        Duration::from_millis(config.max_delay_ms),
    );
    let max_attempts: Arc<dyn RetryPolicy> = Arc::new(MaxAttempts::new(config.max_attempts, backoff));

    if config.dead_letter_on.is_empty() {
        max_attempts
    } else {
        Arc::new(DeadLetterOn {
            kinds: config.dead_letter_on.clone(),
            inner: max_attempts,
        })
    }
}
