//! Politeness spacing and concurrency caps seen through a full drain

use crate::common::{builder, item};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sumi_frontier::config::ExecutionMode;
use sumi_frontier::pipeline::{step_fn, Matcher, Route};
use sumi_frontier::politeness::{LanePolicy, PolitenessGate};
use sumi_frontier::{Flow, Pipeline, ProcessingTask, RoutingHint};
use url::Url;

type Starts = Arc<Mutex<HashMap<String, Vec<Instant>>>>;

/// Route recording when each host's pipelines start
fn recording_route(starts: &Starts) -> Route {
    let starts = Arc::clone(starts);
    Route::new(
        "record",
        Matcher::Any,
        Pipeline::new().step(
            "record",
            step_fn(move |ctx| {
                starts
                    .lock()
                    .unwrap()
                    .entry(ctx.task().host())
                    .or_default()
                    .push(Instant::now());
                Ok(Flow::Done)
            }),
        ),
    )
}

fn page(host: &str, n: usize) -> ProcessingTask {
    let url = Url::parse(&format!("https://{}/page/{}", host, n)).unwrap();
    ProcessingTask::seed(url, RoutingHint::Html)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dispatches_to_one_host_are_spaced() {
    let starts: Starts = Arc::default();
    let crawler = builder(ExecutionMode::Pooled)
        .politeness(PolitenessGate::new(LanePolicy::new(Duration::from_millis(40))))
        .route(recording_route(&starts))
        .unwrap()
        .build()
        .unwrap();

    for n in 0..5 {
        crawler.seed_task(page("slow.example.com", n)).unwrap();
    }
    let report = crawler.run_until_drained().await.unwrap();

    assert_eq!(report.completed, 5);
    assert!(report.politeness_holds > 0);
    assert!(report.elapsed >= Duration::from_millis(160));

    let starts = starts.lock().unwrap();
    let times = &starts["slow.example.com"];
    for pair in times.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        // Small slack for the time between dispatch and the step starting
        assert!(gap >= Duration::from_millis(30), "gap was {:?}", gap);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hosts_do_not_wait_for_each_other() {
    let starts: Starts = Arc::default();
    let crawler = builder(ExecutionMode::Pooled)
        .politeness(PolitenessGate::new(LanePolicy::new(Duration::from_millis(200))))
        .route(recording_route(&starts))
        .unwrap()
        .build()
        .unwrap();

    for n in 0..8 {
        crawler.seed_task(page(&format!("host{}.example.com", n), 0)).unwrap();
    }
    let report = crawler.run_until_drained().await.unwrap();

    assert_eq!(report.completed, 8);
    assert_eq!(report.politeness_holds, 0);
    assert!(report.elapsed < Duration::from_millis(200));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lane_override_applies_to_its_hint() {
    let starts: Starts = Arc::default();
    let gate = PolitenessGate::new(LanePolicy::new(Duration::from_millis(300)))
        .with_lane("api", LanePolicy::new(Duration::ZERO));
    let crawler = builder(ExecutionMode::Pooled)
        .politeness(gate)
        .route(recording_route(&starts))
        .unwrap()
        .build()
        .unwrap();

    for n in 0..4 {
        let url = Url::parse(&format!("https://api.example.com/v1/{}", n)).unwrap();
        crawler
            .seed_task(ProcessingTask::seed(url, RoutingHint::Json))
            .unwrap();
    }
    let report = crawler.run_until_drained().await.unwrap();

    assert_eq!(report.completed, 4);
    assert!(report.elapsed < Duration::from_millis(300));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_held_tasks_keep_their_attempt_count() {
    let attempts: Arc<Mutex<Vec<u32>>> = Arc::default();
    let seen = Arc::clone(&attempts);
    let crawler = builder(ExecutionMode::Pooled)
        .politeness(PolitenessGate::new(LanePolicy::new(Duration::from_millis(20))))
        .route(Route::new(
            "attempts",
            Matcher::Any,
            Pipeline::new().step(
                "attempts",
                step_fn(move |ctx| {
                    seen.lock().unwrap().push(ctx.task().attempt());
                    Ok(Flow::Done)
                }),
            ),
        ))
        .unwrap()
        .build()
        .unwrap();

    for n in 0..4 {
        crawler.seed_task(item(n)).unwrap();
    }
    let report = crawler.run_until_drained().await.unwrap();

    assert_eq!(report.completed, 4);
    assert!(report.politeness_holds > 0);
    assert_eq!(report.retried, 0);
    assert!(attempts.lock().unwrap().iter().all(|attempt| *attempt == 0));
}
