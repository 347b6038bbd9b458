use crate::decision::{DecisionLog, DecisionLogEntry, Outcome};
use crate::persistence::StorageResult;
use crate::pipeline::TaskError;
use crate::queue::{DeadLetterQueue, RetryBuffer};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::task::ProcessingTask;
use std::sync::Arc;
use std::time::Instant;

/// Applies retry decisions to the retry buffer and the dead-letter queue
///
/// The caller removes the task from the in-flight buffer once the decision
/// has been applied.
pub struct RetryCoordinator {
    policy: Arc<dyn RetryPolicy>,
    retry_buffer: Arc<dyn RetryBuffer>,
    dead_letters: Arc<dyn DeadLetterQueue>,
    decisions: Arc<dyn DecisionLog>,
}

impl RetryCoordinator {
    pub fn new(
        policy: Arc<dyn RetryPolicy>,
        retry_buffer: Arc<dyn RetryBuffer>,
        dead_letters: Arc<dyn DeadLetterQueue>,
        decisions: Arc<dyn DecisionLog>,
    ) -> Self {
        Self {
            policy,
            retry_buffer,
            dead_letters,
            decisions,
        }
    }

    /// Classifies a failed attempt and moves the task accordingly
    ///
    /// A retried task keeps its id and gets `attempt + 1`. A dead-lettered
    /// task is recorded in the decision log, then added to the dead-letter
    /// queue; that transition is terminal.
    ///
    /// # Arguments
    ///
    /// * `task` - The task whose attempt failed
    /// * `error` - Why it failed
    /// * `now` - The current time instant
    ///
    /// # Returns
    ///
    /// The decision that was applied
    pub fn handle_failure(
        &self,
        task: ProcessingTask,
        error: &TaskError,
        now: Instant,
    ) -> StorageResult<RetryDecision> {
        let decision = self.policy.on_failure(&task, error, now);

        match &decision {
            RetryDecision::Retry { at, reason } => {
                let next = task.retry(reason.clone());
                tracing::info!(
                    task_id = %next.id(),
                    url = %next.url(),
                    attempt = next.attempt(),
                    delay_ms = at.saturating_duration_since(now).as_millis() as u64,
                    "Scheduling retry: {}",
                    reason
                );
                self.retry_buffer.schedule(next, *at)?;
            }
            RetryDecision::DeadLetter { reason } => self.dead_letter(task, reason)?,
        }

        Ok(decision)
    }

    /// Records the task in the decision log, then moves it to the dead-letter
    /// queue
    ///
    /// The outcome is `RetriesExhausted` for a task that was already retried
    /// and `DeadLettered` otherwise.
    pub fn dead_letter(&self, task: ProcessingTask, reason: &str) -> StorageResult<()> {
        let outcome = if task.attempt() > 0 {
            Outcome::RetriesExhausted
        } else {
            Outcome::DeadLettered
        };
        self.decisions
            .record(DecisionLogEntry::new(&task, outcome, reason))?;
        self.dead_letters.add(task, reason)
    }

    pub fn retry_buffer(&self) -> &Arc<dyn RetryBuffer> {
        &self.retry_buffer
    }

    pub fn dead_letters(&self) -> &Arc<dyn DeadLetterQueue> {
        &self.dead_letters
    }

    pub fn decisions(&self) -> &Arc<dyn DecisionLog> {
        &self.decisions
    }
}
