//! Statistics generation from the crawl database
//!
//! This module provides functionality for extracting and displaying
//! crawl statistics from the storage layer, and for printing the report of a
//! finished drain.

use crate::crawler::DrainReport;
use crate::decision::Outcome;
use crate::persistence::{FrontierMirror, InFlightMirror, Journal};
use crate::storage::{RunRecord, Storage, POLITENESS_HOLD_STREAM, RETRY_STREAM};
use crate::SumiError;
use std::collections::HashMap;

/// Number of dead-letter reasons shown by `print_statistics`
const TOP_REASONS: usize = 10;

/// Crawl statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    /// Most recent run, if any
    pub latest_run: Option<RunRecord>,

    /// Decision log entries per outcome
    pub decisions_by_outcome: HashMap<Outcome, u64>,

    /// Tasks in the dead-letter queue
    pub dead_letters: u64,

    /// Most frequent dead-letter reasons
    pub top_dead_letter_reasons: Vec<(String, u64)>,

    /// WAL events written since the last frontier checkpoint
    pub pending_frontier_events: u64,

    /// WAL events written since the last in-flight checkpoint
    pub pending_in_flight_events: u64,

    /// WAL events written since the last retry buffer checkpoint
    pub pending_retry_events: u64,

    /// WAL events written since the last politeness hold checkpoint
    pub pending_hold_events: u64,
}

impl CrawlStatistics {
    /// Total number of tasks with a recorded outcome
    pub fn total_decisions(&self) -> u64 {
        self.decisions_by_outcome.values().sum()
    }

    fn count(&self, outcome: Outcome) -> u64 {
        self.decisions_by_outcome
            .get(&outcome)
            .copied()
            .unwrap_or(0)
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(SumiError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<CrawlStatistics, SumiError> {
    Ok(CrawlStatistics {
        latest_run: storage.get_latest_run()?,
        decisions_by_outcome: storage.count_decisions_by_outcome()?,
        dead_letters: storage.count_dead_letters()?,
        top_dead_letter_reasons: storage.get_dead_letter_reasons(TOP_REASONS)?,
        pending_frontier_events: storage.count_wal_events(FrontierMirror::NAME)?,
        pending_in_flight_events: storage.count_wal_events(InFlightMirror::NAME)?,
        pending_retry_events: storage.count_wal_events(RETRY_STREAM)?,
        pending_hold_events: storage.count_wal_events(POLITENESS_HOLD_STREAM)?,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    if let Some(run) = &stats.latest_run {
        println!("Latest Run:");
        println!("  ID: {}", run.id);
        println!("  Status: {}", run.status.to_db_string());
        println!("  Started: {}", run.started_at);
        if let Some(finished) = &run.finished_at {
            println!("  Finished: {}", finished);
        }
        println!("  Config hash: {}", run.config_hash);
        println!();
    }

    let total = stats.total_decisions();
    println!("Outcomes:");
    println!("  Total tasks with an outcome: {}", total);
    for outcome in [Outcome::Done, Outcome::RetriesExhausted, Outcome::DeadLettered] {
        let count = stats.count(outcome);
        println!("  {}: {} ({:.1}%)", outcome, count, percentage(count, total));
    }
    println!();

    if !stats.top_dead_letter_reasons.is_empty() {
        println!("Dead Letters ({}):", stats.dead_letters);
        for (reason, count) in &stats.top_dead_letter_reasons {
            println!("  {}: {}", reason, count);
        }
        println!();
    }

    println!("Unflushed WAL events:");
    println!("  frontier: {}", stats.pending_frontier_events);
    println!("  in-flight: {}", stats.pending_in_flight_events);
    println!("  retry: {}", stats.pending_retry_events);
    println!("  politeness hold: {}", stats.pending_hold_events);
    println!();

    let done = stats.count(Outcome::Done);
    println!(
        "Success Rate: {:.1}% ({} / {} tasks done)",
        percentage(done, total),
        done,
        total
    );
}

/// Prints the report of one drain
pub fn print_drain_report(report: &DrainReport) {
    println!("=== Drain Report ===\n");
    println!("  Dispatched: {}", report.dispatched);
    println!("  Done: {}", report.completed);
    println!("  Failed attempts: {}", report.failed_attempts);
    println!("  Retried: {}", report.retried);
    println!("  Dead-lettered: {}", report.dead_lettered);
    println!("  Politeness holds: {}", report.politeness_holds);
    if report.requeued > 0 {
        println!("  Requeued after restart: {}", report.requeued);
    }
    println!(
        "  Elapsed: {:.2?} ({:.2} tasks/sec)",
        report.elapsed,
        report.rate()
    );
}

fn percentage(count: u64, total: u64) -> f64 {
    if total > 0 {
        (count as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}
