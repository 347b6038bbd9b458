//! Draining a workload through the engine in both execution modes

use crate::common::{builder, done_route, item, item_number};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sumi_frontier::config::{EngineConfig, ExecutionMode, UnroutablePolicy};
use sumi_frontier::decision::Outcome;
use sumi_frontier::pipeline::{step_fn, ErrorKind, Matcher, Route};
use sumi_frontier::queue::{InFlightBuffer, InMemoryInFlightBuffer};
use sumi_frontier::retry::{Backoff, DeadLetterOn, MaxAttempts};
use sumi_frontier::{
    Flow, Pipeline, PipelineStep, ProcessingContext, SumiError, TaskError, TaskId,
};

/// Every tenth item fails with a 503 on every attempt
fn flaky_route() -> Route {
    Route::new(
        "items",
        Matcher::Any,
        Pipeline::new().step(
            "work",
            step_fn(|ctx| {
                if item_number(ctx.task()) % 10 == 0 {
                    Err(TaskError::HttpStatus { status: 503 })
                } else {
                    Ok(Flow::Done)
                }
            }),
        ),
    )
}

async fn drain_thousand_with_failures(mode: ExecutionMode) {
    let crawler = builder(mode).route(flaky_route()).unwrap().build().unwrap();
    for n in 0..1000 {
        crawler.seed_task(item(n)).unwrap();
    }

    let report = crawler.run_until_drained().await.unwrap();

    assert_eq!(report.completed, 900);
    assert_eq!(report.dead_lettered, 100);
    assert_eq!(report.failed_attempts, 300);
    assert_eq!(report.retried, 200);
    assert_eq!(report.dispatched, 1200);
    assert!(crawler.is_drained());

    let dead = crawler.dead_letters().entries().unwrap();
    assert_eq!(dead.len(), 100);
    for letter in &dead {
        assert_eq!(item_number(&letter.task) % 10, 0);
        assert_eq!(letter.task.attempt(), 2);
        assert!(letter.reason.contains("503"));
    }

    let entries = crawler.decisions().entries().unwrap();
    assert_eq!(entries.len(), 1000);
    let exhausted = entries
        .iter()
        .filter(|e| e.outcome == Outcome::RetriesExhausted)
        .count();
    assert_eq!(exhausted, 100);
}

#[tokio::test]
async fn test_single_thread_drains_with_dead_letters() {
    drain_thousand_with_failures(ExecutionMode::SingleThread).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pooled_drains_with_dead_letters() {
    drain_thousand_with_failures(ExecutionMode::Pooled).await;
}

type Finished = Arc<Mutex<HashMap<usize, u32>>>;

/// Items divisible by 10 are rejected with a 404, other items divisible by 3
/// fail their first attempt with a 503; completions record their attempt
fn mixed_route(finished: &Finished) -> Route {
    let finished = Arc::clone(finished);
    Route::new(
        "items",
        Matcher::Any,
        Pipeline::new().step(
            "work",
            step_fn(move |ctx| {
                let n = item_number(ctx.task());
                let attempt = ctx.task().attempt();
                if n % 10 == 0 {
                    return Err(TaskError::HttpStatus { status: 404 });
                }
                if n % 3 == 0 && attempt == 0 {
                    return Err(TaskError::HttpStatus { status: 503 });
                }
                finished.lock().unwrap().insert(n, attempt);
                Ok(Flow::Done)
            }),
        ),
    )
}

async fn drain_mixed_workload(mode: ExecutionMode) {
    let finished: Finished = Arc::default();
    let crawler = builder(mode)
        .retry_policy(Arc::new(DeadLetterOn {
            kinds: vec![ErrorKind::HttpClient],
            inner: Arc::new(MaxAttempts::new(3, Backoff::none())),
        }))
        .route(mixed_route(&finished))
        .unwrap()
        .build()
        .unwrap();
    for n in 1..=1000 {
        crawler.seed_task(item(n)).unwrap();
    }

    let report = crawler.run_until_drained().await.unwrap();

    assert_eq!(crawler.frontier().size(), 0);
    assert_eq!(crawler.retry_buffer().size(), 0);
    assert_eq!(crawler.dead_letters().size(), 100);
    assert!(crawler.is_drained());

    assert_eq!(report.completed, 900);
    assert_eq!(report.dead_lettered, 100);
    assert_eq!(report.retried, 300);
    assert_eq!(report.failed_attempts, 400);
    assert_eq!(report.dispatched, 1300);

    for letter in crawler.dead_letters().entries().unwrap() {
        assert_eq!(item_number(&letter.task) % 10, 0);
        assert_eq!(letter.task.attempt(), 0);
    }

    let finished = finished.lock().unwrap();
    assert_eq!(finished.len(), 900);
    for (n, attempt) in finished.iter() {
        let expected = if n % 3 == 0 { 1 } else { 0 };
        assert_eq!(*attempt, expected, "item {} finished on attempt {}", n, attempt);
    }

    let entries = crawler.decisions().entries().unwrap();
    let dead = entries
        .iter()
        .filter(|e| e.outcome == Outcome::DeadLettered)
        .count();
    assert_eq!(dead, 100);
    assert_eq!(entries.len(), 1000);
}

#[tokio::test]
async fn test_single_thread_mixed_workload() {
    drain_mixed_workload(ExecutionMode::SingleThread).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pooled_mixed_workload() {
    drain_mixed_workload(ExecutionMode::Pooled).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_task_is_in_flight_exactly_while_it_runs() {
    let in_flight: Arc<dyn InFlightBuffer> = Arc::new(InMemoryInFlightBuffer::new());
    let runs: Arc<Mutex<HashMap<(TaskId, u32), usize>>> = Arc::new(Mutex::new(HashMap::new()));

    let observed = Arc::clone(&in_flight);
    let counted = Arc::clone(&runs);
    let observer = step_fn(move |ctx| {
        assert!(observed.contains(ctx.task().id()));
        *counted
            .lock()
            .unwrap()
            .entry((ctx.task().id(), ctx.task().attempt()))
            .or_insert(0) += 1;

        // Every seventh item fails once
        if item_number(ctx.task()) % 7 == 0 && ctx.task().attempt() == 0 {
            return Err(TaskError::Timeout);
        }
        Ok(Flow::Done)
    });

    let crawler = builder(ExecutionMode::Pooled)
        .in_flight(Arc::clone(&in_flight))
        .route(Route::new("observe", Matcher::Any, Pipeline::new().step("observe", observer)))
        .unwrap()
        .build()
        .unwrap();

    for n in 0..200 {
        crawler.seed_task(item(n)).unwrap();
    }
    let report = crawler.run_until_drained().await.unwrap();

    assert_eq!(report.completed, 200);
    assert_eq!(report.retried, 29);
    assert!(in_flight.is_empty());

    let runs = runs.lock().unwrap();
    assert_eq!(runs.len(), 229);
    assert!(runs.values().all(|count| *count == 1));

    let mut done: HashMap<TaskId, usize> = HashMap::new();
    for entry in crawler.decisions().entries().unwrap() {
        assert_eq!(entry.outcome, Outcome::Done);
        *done.entry(entry.task_id).or_insert(0) += 1;
    }
    assert_eq!(done.len(), 200);
    assert!(done.values().all(|count| *count == 1));
}

/// Tracks how many pipelines run at once
#[derive(Default)]
struct Gauge {
    running: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl PipelineStep for Gauge {
    async fn execute(&self, _ctx: &mut ProcessingContext) -> Result<Flow, TaskError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(Flow::Done)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_max_in_flight_bounds_concurrency() {
    let gauge = Arc::new(Gauge::default());
    let crawler = builder(ExecutionMode::Pooled)
        .pool_size(16)
        .max_in_flight(4)
        .route(Route::new(
            "gauge",
            Matcher::Any,
            Pipeline::new().shared_step("gauge", gauge.clone()),
        ))
        .unwrap()
        .build()
        .unwrap();

    for n in 0..60 {
        crawler.seed_task(item(n)).unwrap();
    }
    let report = crawler.run_until_drained().await.unwrap();

    assert_eq!(report.completed, 60);
    let peak = gauge.peak.load(Ordering::SeqCst);
    assert!(peak <= 4, "peak concurrency was {}", peak);
    assert!(peak >= 2, "pool never ran tasks side by side");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_size_bounds_running_pipelines() {
    let gauge = Arc::new(Gauge::default());
    let crawler = builder(ExecutionMode::Pooled)
        .pool_size(3)
        .max_in_flight(50)
        .route(Route::new(
            "gauge",
            Matcher::Any,
            Pipeline::new().shared_step("gauge", gauge.clone()),
        ))
        .unwrap()
        .build()
        .unwrap();

    for n in 0..40 {
        crawler.seed_task(item(n)).unwrap();
    }
    crawler.run_until_drained().await.unwrap();

    assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn test_single_thread_runs_one_at_a_time() {
    let gauge = Arc::new(Gauge::default());
    let crawler = builder(ExecutionMode::SingleThread)
        .route(Route::new(
            "gauge",
            Matcher::Any,
            Pipeline::new().shared_step("gauge", gauge.clone()),
        ))
        .unwrap()
        .build()
        .unwrap();

    for n in 0..10 {
        crawler.seed_task(item(n)).unwrap();
    }
    let report = crawler.run_until_drained().await.unwrap();

    assert_eq!(report.completed, 10);
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
}

async fn panicking_step_is_dead_lettered(mode: ExecutionMode) {
    let crawler = builder(mode)
        .retry_policy(Arc::new(MaxAttempts::new(1, Backoff::none())))
        .route(Route::new(
            "explode",
            Matcher::Any,
            Pipeline::new().step(
                "explode",
                step_fn(|ctx| {
                    if item_number(ctx.task()) == 3 {
                        panic!("step exploded");
                    }
                    Ok(Flow::Done)
                }),
            ),
        ))
        .unwrap()
        .build()
        .unwrap();

    for n in 0..5 {
        crawler.seed_task(item(n)).unwrap();
    }
    let report = crawler.run_until_drained().await.unwrap();

    assert_eq!(report.completed, 4);
    assert_eq!(report.dead_lettered, 1);
    assert!(crawler.in_flight().is_empty());

    let dead = crawler.dead_letters().entries().unwrap();
    assert_eq!(item_number(&dead[0].task), 3);
    assert!(dead[0].reason.to_lowercase().contains("panicked"));
}

#[tokio::test]
async fn test_panic_is_a_failure_in_single_thread_mode() {
    panicking_step_is_dead_lettered(ExecutionMode::SingleThread).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panic_is_a_failure_in_pooled_mode() {
    panicking_step_is_dead_lettered(ExecutionMode::Pooled).await;
}

#[tokio::test]
async fn test_retry_waits_for_backoff() {
    let crawler = builder(ExecutionMode::SingleThread)
        .retry_policy(Arc::new(MaxAttempts::new(
            2,
            Backoff::new(Duration::from_millis(80), Duration::from_millis(80)),
        )))
        .route(Route::new(
            "once",
            Matcher::Any,
            Pipeline::new().step(
                "once",
                step_fn(|ctx| {
                    if ctx.task().attempt() == 0 {
                        Err(TaskError::Timeout)
                    } else {
                        Ok(Flow::Done)
                    }
                }),
            ),
        ))
        .unwrap()
        .build()
        .unwrap();

    crawler.seed_task(item(1)).unwrap();
    let report = crawler.run_until_drained().await.unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(report.retried, 1);
    assert!(report.elapsed >= Duration::from_millis(80));
}

#[tokio::test]
async fn test_unroutable_task_aborts_the_drain() {
    let crawler = builder(ExecutionMode::SingleThread)
        .route(Route::new(
            "elsewhere",
            Matcher::host("elsewhere.org"),
            Pipeline::new().step("done", step_fn(|_| Ok(Flow::Done))),
        ))
        .unwrap()
        .build()
        .unwrap();

    let id = crawler.seed_task(item(1)).unwrap();
    let err = crawler.run_until_drained().await.unwrap_err();

    match err {
        SumiError::NoRoute { task_id, .. } => assert_eq!(task_id, id),
        other => panic!("expected NoRoute, got {}", other),
    }
    assert_eq!(crawler.frontier().size(), 1);
    assert!(crawler.in_flight().is_empty());
}

#[tokio::test]
async fn test_unroutable_task_can_be_dead_lettered() {
    let crawler = builder(ExecutionMode::SingleThread)
        .engine_config(EngineConfig {
            mode: ExecutionMode::SingleThread,
            on_unroutable: UnroutablePolicy::DeadLetter,
            ..EngineConfig::default()
        })
        .route(Route::new(
            "elsewhere",
            Matcher::host("elsewhere.org"),
            Pipeline::new().step("done", step_fn(|_| Ok(Flow::Done))),
        ))
        .unwrap()
        .build()
        .unwrap();

    crawler.seed_task(item(2)).unwrap();
    let report = crawler.run_until_drained().await.unwrap();

    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.dispatched, 0);
    assert!(crawler.is_drained());
    let entries = crawler.decisions().entries().unwrap();
    assert_eq!(entries[0].outcome, Outcome::DeadLettered);
    assert_eq!(crawler.dead_letters().size(), 1);
}

#[tokio::test]
async fn test_first_matching_route_wins() {
    let crawler = builder(ExecutionMode::SingleThread)
        .route(Route::new(
            "odd",
            Matcher::predicate(|task, _| item_number(task) % 2 == 1),
            Pipeline::new().step("fail", step_fn(|_| Err(TaskError::Timeout))),
        ))
        .unwrap()
        .route(done_route())
        .unwrap()
        .retry_policy(Arc::new(MaxAttempts::new(1, Backoff::none())))
        .build()
        .unwrap();

    for n in 0..6 {
        crawler.seed_task(item(n)).unwrap();
    }
    let report = crawler.run_until_drained().await.unwrap();

    assert_eq!(report.completed, 3);
    assert_eq!(report.dead_lettered, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_derived_tasks_are_drained_too() {
    let crawler = builder(ExecutionMode::Pooled)
        .route(Route::new(
            "fan-out",
            Matcher::Any,
            Pipeline::new().step(
                "fan-out",
                step_fn(|ctx| {
                    let n = item_number(ctx.task());
                    if n < 10 {
                        let url = ctx.task().url().join(&format!("{}", n + 100)).unwrap();
                        let child = ctx.task().derive(url, ctx.task().hint().clone(), "child");
                        ctx.offer(child)
                            .map_err(|e| TaskError::step("fan-out", e.to_string()))?;
                    }
                    Ok(Flow::Done)
                }),
            ),
        ))
        .unwrap()
        .build()
        .unwrap();

    for n in 0..10 {
        crawler.seed_task(item(n)).unwrap();
    }
    let report = crawler.run_until_drained().await.unwrap();

    assert_eq!(report.completed, 20);
    assert!(crawler.is_drained());
}
