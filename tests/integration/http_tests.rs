//! End-to-end crawls over the standard fetch, parse and follow-links route
//!
//! These tests use wiremock to serve a small site and check which pages are
//! fetched, finished and dead-lettered.

use std::sync::Arc;
use std::time::Duration;
use sumi_frontier::config::{parse_config, ExecutionMode, UserAgentConfig};
use sumi_frontier::crawler::{CrawlerBuilder, HttpFetcher};
use sumi_frontier::decision::Outcome;
use sumi_frontier::pipeline::Matcher;
use sumi_frontier::politeness::PolitenessGate;
use sumi_frontier::retry::{Backoff, MaxAttempts};
use sumi_frontier::RoutingHint;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn user_agent() -> UserAgentConfig {
    UserAgentConfig {
        crawler_name: "TestBot".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    }
}

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html")
}

/// Serves `/` linking to `/a` and `/broken`, and `/a` linking back to `/`,
/// to `/b` and to another host
async fn mount_site(server: &MockServer) {
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(format!(
            r#"<html><head><title>Home</title></head><body>
            <a href="{base}/a">A</a>
            <a href="/broken">Broken</a>
            </body></html>"#
        )))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html(
            r#"<html><body>
            <a href="/">Home</a>
            <a href="/b#section">B</a>
            <a href="https://elsewhere.example.org/">Elsewhere</a>
            </body></html>"#
                .to_string(),
        ))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(html("<html><body>Leaf</body></html>".to_string()))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(503))
        .mount(server)
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_crawl_follows_links_and_dead_letters_failures() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let crawler = CrawlerBuilder::new()
        .fetcher(Arc::new(HttpFetcher::new(&user_agent(), false).unwrap()))
        .politeness(PolitenessGate::unrestricted())
        .retry_policy(Arc::new(MaxAttempts::new(2, Backoff::none())))
        .mode(ExecutionMode::Pooled)
        .pool_size(4)
        .max_idle_wait(Duration::from_millis(20))
        .standard_route("site", Matcher::Any, 3, true)
        .unwrap()
        .build()
        .unwrap();

    crawler.seed_str(&server.uri(), RoutingHint::Html).unwrap();
    let report = crawler.run_until_drained().await.unwrap();

    // `/`, `/a` and `/b` finish; `/broken` fails twice
    assert_eq!(report.completed, 3);
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.failed_attempts, 2);
    assert!(crawler.is_drained());

    let dead = crawler.dead_letters().entries().unwrap();
    assert_eq!(dead[0].task.url().path(), "/broken");
    assert_eq!(dead[0].task.depth(), 1);

    let done: Vec<String> = crawler
        .decisions()
        .entries()
        .unwrap()
        .into_iter()
        .filter(|e| e.outcome == Outcome::Done)
        .map(|e| e.url)
        .collect();
    assert_eq!(done.len(), 3);
    assert!(done.iter().all(|url| !url.contains("elsewhere")));

    let requests = server.received_requests().await.unwrap();
    let home_hits = requests.iter().filter(|r| r.url.path() == "/").count();
    assert_eq!(home_hits, 1);
}

#[tokio::test]
async fn test_max_depth_stops_link_following() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let crawler = CrawlerBuilder::new()
        .fetcher(Arc::new(HttpFetcher::new(&user_agent(), false).unwrap()))
        .politeness(PolitenessGate::unrestricted())
        .mode(ExecutionMode::SingleThread)
        .standard_route("site", Matcher::Any, 1, true)
        .unwrap()
        .build()
        .unwrap();

    crawler.seed_str(&server.uri(), RoutingHint::Html).unwrap();
    let report = crawler.run_until_drained().await.unwrap();

    // Depth 1 pages are fetched but their links are not followed
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.url.path() != "/b"));
    assert_eq!(report.completed, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_crawl_from_config() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let config = parse_config(&format!(
        r#"
[engine]
mode = "pooled"
pool-size = 2
max-idle-wait-ms = 20

[politeness]
default-interval-ms = 10

[retry]
max-attempts = 2
base-delay-ms = 10
max-delay-ms = 20
dead-letter-on = ["http-server"]

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"

[crawl]
max-depth = 3
https-only = false

[[seed]]
url = "{}/"
"#,
        server.uri()
    ))
    .unwrap();

    let crawler = CrawlerBuilder::from_config(&config).unwrap().build().unwrap();
    for seed in &config.seeds {
        crawler.seed_str(&seed.url, seed.routing_hint()).unwrap();
    }
    let report = crawler.run_until_drained().await.unwrap();

    // 503 is a server error, dead-lettered on the first failure
    assert_eq!(report.completed, 3);
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.failed_attempts, 1);
    assert_eq!(report.retried, 0);
}
