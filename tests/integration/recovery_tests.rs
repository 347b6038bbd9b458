//! Crash recovery from the SQLite and file journals

use crate::common::{builder, done_route, item};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sumi_frontier::config::{ExecutionMode, PersistenceConfig};
use sumi_frontier::crawler::CrawlerBuilder;
use sumi_frontier::decision::Outcome;
use sumi_frontier::persistence::{
    EveryOps, FileSnapshotRepository, FileWalRepository, Persistent, PersistentFrontier,
    PersistentInFlight,
};
use sumi_frontier::pipeline::{step_fn, Matcher, Route};
use sumi_frontier::politeness::{LanePolicy, PolitenessGate};
use sumi_frontier::queue::{InMemoryFrontier, InMemoryInFlightBuffer, RetryBuffer};
use sumi_frontier::retry::RetryAlways;
use sumi_frontier::storage::{SqliteStorage, Storage};
use sumi_frontier::{Crawler, Pipeline, ProcessingTask, TaskError};

const HOUR: Duration = Duration::from_secs(3600);

fn persistence_config(db: &Path) -> PersistenceConfig {
    PersistenceConfig {
        database_path: db.display().to_string(),
        checkpoint_every: 10,
        checkpoint_interval_secs: 60,
    }
}

fn sqlite_crawler(storage: &SqliteStorage, db: &Path) -> Crawler {
    builder(ExecutionMode::Pooled)
        .sqlite(storage, &persistence_config(db))
        .route(done_route())
        .unwrap()
        .build()
        .unwrap()
}

/// Seeds `seeded` tasks, then moves `dispatched` of them to the in-flight
/// buffer and drops the crawler without finishing them
fn crash_mid_crawl(crawler: &Crawler, seeded: usize, dispatched: usize) {
    for n in 0..seeded {
        crawler.seed_task(item(n)).unwrap();
    }
    for _ in 0..dispatched {
        let task = crawler.frontier().poll().unwrap().unwrap();
        crawler.in_flight().put(task).unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sqlite_recovery_requeues_orphans() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("crawl.db");

    {
        let storage = SqliteStorage::new(&db).unwrap();
        let crawler = sqlite_crawler(&storage, &db);
        assert_eq!(crawler.recover().unwrap().restored, 0);
        crash_mid_crawl(&crawler, 25, 3);
    }

    let storage = SqliteStorage::new(&db).unwrap();
    let crawler = sqlite_crawler(&storage, &db);
    let recovery = crawler.recover().unwrap();

    assert_eq!(recovery.restored, 25);
    assert_eq!(recovery.requeued, 3);
    assert_eq!(crawler.frontier().size(), 25);
    assert!(crawler.in_flight().is_empty());

    let report = crawler.run_until_drained().await.unwrap();
    assert_eq!(report.completed, 25);
    assert_eq!(report.requeued, 0);

    let done = storage.count_decisions_by_outcome().unwrap();
    assert_eq!(done.get(&Outcome::Done), Some(&25));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drained_crawl_recovers_to_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("crawl.db");

    {
        let storage = SqliteStorage::new(&db).unwrap();
        let crawler = sqlite_crawler(&storage, &db);
        crawler.recover().unwrap();
        for n in 0..30 {
            crawler.seed_task(item(n)).unwrap();
        }
        crawler.run_until_drained().await.unwrap();
        crawler.checkpoint().unwrap();
    }

    let storage = SqliteStorage::new(&db).unwrap();
    assert_eq!(storage.count_wal_events("frontier").unwrap(), 0);

    let crawler = sqlite_crawler(&storage, &db);
    let recovery = crawler.recover().unwrap();
    assert_eq!(recovery.restored, 0);
    assert!(crawler.is_drained());
}

#[tokio::test]
async fn test_recover_twice_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("crawl.db");

    {
        let storage = SqliteStorage::new(&db).unwrap();
        let crawler = sqlite_crawler(&storage, &db);
        crawler.recover().unwrap();
        crash_mid_crawl(&crawler, 4, 0);
    }

    let storage = SqliteStorage::new(&db).unwrap();
    let crawler = sqlite_crawler(&storage, &db);
    assert_eq!(crawler.recover().unwrap().restored, 4);
    assert_eq!(crawler.recover().unwrap().restored, 0);
    assert_eq!(crawler.frontier().size(), 4);
}

fn sqlite_builder(storage: &SqliteStorage, db: &Path) -> CrawlerBuilder {
    builder(ExecutionMode::Pooled).sqlite(storage, &persistence_config(db))
}

/// Runs the crawl for a moment, then abandons it mid-drain
async fn interrupt(crawler: &Crawler) {
    let drain = tokio::time::timeout(Duration::from_millis(300), crawler.run_until_drained()).await;
    assert!(drain.is_err(), "drain should still be waiting");
}

/// Everything due within two hours, still left in the buffer
fn pending(buffer: &Arc<dyn RetryBuffer>) -> Vec<ProcessingTask> {
    buffer.due_entries(Instant::now() + 2 * HOUR)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_politeness_hold_survives_a_crash() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("crawl.db");
    let (first, second) = (item(1), item(2));

    {
        let storage = SqliteStorage::new(&db).unwrap();
        let crawler = sqlite_builder(&storage, &db)
            .politeness(PolitenessGate::new(LanePolicy::new(HOUR)))
            .route(done_route())
            .unwrap()
            .build()
            .unwrap();
        crawler.recover().unwrap();
        crawler.seed_task(first.clone()).unwrap();
        crawler.seed_task(second.clone()).unwrap();

        interrupt(&crawler).await;
        assert_eq!(crawler.politeness_hold().size(), 1);
        assert!(crawler.frontier().is_empty());
    }

    let storage = SqliteStorage::new(&db).unwrap();
    let crawler = sqlite_builder(&storage, &db)
        .route(done_route())
        .unwrap()
        .build()
        .unwrap();
    let recovery = crawler.recover().unwrap();

    assert_eq!(recovery.restored, 1);
    assert_eq!(recovery.requeued, 0);
    assert!(crawler.frontier().is_empty());

    // Still held for the rest of the hour, with its attempt count unchanged
    let hold = crawler.politeness_hold();
    assert!(hold.contains(second.id()));
    assert!(hold.due_entries(Instant::now()).is_empty());
    let held = pending(hold);
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].attempt(), 0);

    let done = storage.count_decisions_by_outcome().unwrap();
    assert_eq!(done.get(&Outcome::Done), Some(&1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduled_retry_survives_a_crash() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("crawl.db");
    let task = item(7);
    let failing = || {
        Route::new(
            "fail",
            Matcher::Any,
            Pipeline::new().step("fail", step_fn(|_| Err(TaskError::Timeout))),
        )
    };

    {
        let storage = SqliteStorage::new(&db).unwrap();
        let crawler = sqlite_builder(&storage, &db)
            .retry_policy(Arc::new(RetryAlways { delay: HOUR }))
            .route(failing())
            .unwrap()
            .build()
            .unwrap();
        crawler.recover().unwrap();
        crawler.seed_task(task.clone()).unwrap();

        interrupt(&crawler).await;
        assert_eq!(crawler.retry_buffer().size(), 1);
        assert!(crawler.in_flight().is_empty());
    }

    let storage = SqliteStorage::new(&db).unwrap();
    let crawler = sqlite_builder(&storage, &db)
        .retry_policy(Arc::new(RetryAlways { delay: HOUR }))
        .route(failing())
        .unwrap()
        .build()
        .unwrap();
    let recovery = crawler.recover().unwrap();

    assert_eq!(recovery.restored, 1);
    assert!(crawler.frontier().is_empty());
    assert!(crawler.retry_buffer().next_due().unwrap() > Instant::now() + HOUR / 2);

    let retries = pending(crawler.retry_buffer());
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].id(), task.id());
    assert_eq!(retries[0].attempt(), 1);
}

#[tokio::test]
async fn test_failure_scheduled_before_leaving_in_flight_is_not_requeued() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("crawl.db");
    let task = item(3);

    // The retry was written, then the process died before the task left
    // the in-flight buffer
    {
        let storage = SqliteStorage::new(&db).unwrap();
        let crawler = sqlite_crawler(&storage, &db);
        crawler.recover().unwrap();
        crawler.in_flight().put(task.clone()).unwrap();
        crawler
            .retry_buffer()
            .schedule(task.retry("timeout"), Instant::now())
            .unwrap();
    }

    let storage = SqliteStorage::new(&db).unwrap();
    let crawler = sqlite_crawler(&storage, &db);
    let recovery = crawler.recover().unwrap();

    assert_eq!(recovery.restored, 2);
    assert_eq!(recovery.requeued, 0);
    assert!(crawler.in_flight().is_empty());
    assert!(crawler.frontier().is_empty());

    let report = crawler.run_until_drained().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.dispatched, 1);

    let entries = crawler.decisions().entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempt, 1);
}

#[tokio::test]
async fn test_task_dispatched_but_not_yet_dequeued_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("crawl.db");
    let task = item(4);

    // The task reached the in-flight buffer but was never removed from the
    // frontier
    {
        let storage = SqliteStorage::new(&db).unwrap();
        let crawler = sqlite_crawler(&storage, &db);
        crawler.recover().unwrap();
        crawler.seed_task(task.clone()).unwrap();
        crawler.in_flight().put(task.clone()).unwrap();
    }

    let storage = SqliteStorage::new(&db).unwrap();
    let crawler = sqlite_crawler(&storage, &db);
    crawler.recover().unwrap();
    assert_eq!(crawler.frontier().size(), 1);
    assert!(crawler.in_flight().is_empty());

    let report = crawler.run_until_drained().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(crawler.decisions().len(), 1);
}

fn file_crawler(dir: &Path) -> Crawler {
    let frontier: Arc<PersistentFrontier<InMemoryFrontier>> = Arc::new(Persistent::new(
        InMemoryFrontier::new(),
        FileWalRepository::open(dir.join("frontier.wal")).unwrap(),
        FileSnapshotRepository::new(dir.join("frontier.snapshot")),
        EveryOps::new(7),
    ));
    let in_flight: Arc<PersistentInFlight<InMemoryInFlightBuffer>> = Arc::new(Persistent::new(
        InMemoryInFlightBuffer::new(),
        FileWalRepository::open(dir.join("in-flight.wal")).unwrap(),
        FileSnapshotRepository::new(dir.join("in-flight.snapshot")),
        EveryOps::new(7),
    ));

    builder(ExecutionMode::SingleThread)
        .durable_frontier(frontier)
        .durable_in_flight(in_flight)
        .route(done_route())
        .unwrap()
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_file_journal_recovery() {
    let dir = tempfile::tempdir().unwrap();

    {
        let crawler = file_crawler(dir.path());
        crawler.recover().unwrap();
        crash_mid_crawl(&crawler, 20, 5);
    }

    let crawler = file_crawler(dir.path());
    let recovery = crawler.recover().unwrap();

    assert_eq!(recovery.restored, 20);
    assert_eq!(recovery.requeued, 5);

    let report = crawler.run_until_drained().await.unwrap();
    assert_eq!(report.completed, 20);
    assert!(crawler.is_drained());
}

#[tokio::test]
async fn test_fresh_state_discards_journal() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("crawl.db");

    {
        let storage = SqliteStorage::new(&db).unwrap();
        let crawler = sqlite_crawler(&storage, &db);
        crawler.recover().unwrap();
        crash_mid_crawl(&crawler, 12, 2);
    }

    let storage = SqliteStorage::new(&db).unwrap();
    storage.clear_crawl_state().unwrap();

    let crawler = sqlite_crawler(&storage, &db);
    let recovery = crawler.recover().unwrap();
    assert_eq!(recovery.restored, 0);
    assert!(crawler.is_drained());
}
