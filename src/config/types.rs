use crate::pipeline::ErrorKind;
use crate::task::RoutingHint;
use serde::Deserialize;

/// Main configuration structure for Sumi-Frontier
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub politeness: PolitenessConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default, rename = "seed")]
    pub seeds: Vec<SeedConfig>,
}

/// How pipelines are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Pipelines run one at a time on the coordinating task
    SingleThread,

    /// Pipelines run as spawned tasks, bounded by the pool size
    #[default]
    Pooled,
}

/// What the engine does with a task no route matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnroutablePolicy {
    /// Leave the task on the frontier and stop the drain with an error
    #[default]
    Abort,

    /// Dead-letter the task and keep draining
    DeadLetter,
}

/// Engine scheduling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub mode: ExecutionMode,

    /// Number of pipelines that may execute at once in pooled mode
    #[serde(rename = "pool-size", default = "default_pool_size")]
    pub pool_size: usize,

    /// Upper bound on the in-flight buffer
    #[serde(rename = "max-in-flight", default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Longest the engine sleeps before re-checking its buffers (milliseconds)
    #[serde(rename = "max-idle-wait-ms", default = "default_max_idle_wait_ms")]
    pub max_idle_wait_ms: u64,

    #[serde(rename = "on-unroutable", default)]
    pub on_unroutable: UnroutablePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            pool_size: default_pool_size(),
            max_in_flight: default_max_in_flight(),
            max_idle_wait_ms: default_max_idle_wait_ms(),
            on_unroutable: UnroutablePolicy::default(),
        }
    }
}

/// Per-key dispatch throttling
#[derive(Debug, Clone, Deserialize)]
pub struct PolitenessConfig {
    /// Minimum time between dispatches to the same key (milliseconds)
    #[serde(rename = "default-interval-ms", default = "default_interval_ms")]
    pub default_interval_ms: u64,

    /// Concurrent dispatches allowed per key, unlimited if absent
    #[serde(rename = "default-max-concurrent", default)]
    pub default_max_concurrent: Option<usize>,

    /// Lane-specific overrides
    #[serde(default, rename = "lane")]
    pub lanes: Vec<LaneConfig>,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: default_interval_ms(),
            default_max_concurrent: None,
            lanes: Vec::new(),
        }
    }
}

/// Politeness override for one lane (`html`, `api`, `asset` or a custom name)
#[derive(Debug, Clone, Deserialize)]
pub struct LaneConfig {
    pub name: String,

    #[serde(rename = "interval-ms")]
    pub interval_ms: u64,

    #[serde(rename = "max-concurrent", default)]
    pub max_concurrent: Option<usize>,
}

/// Retry and dead-letter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Attempts a task gets before it is dead-lettered, the first included
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(rename = "base-delay-ms", default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(rename = "max-delay-ms", default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Failure kinds that skip retries entirely
    #[serde(rename = "dead-letter-on", default)]
    pub dead_letter_on: Vec<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            dead_letter_on: Vec::new(),
        }
    }
}

/// Durable state configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path", default = "default_database_path")]
    pub database_path: String,

    /// Checkpoint after this many mutations of a structure
    #[serde(rename = "checkpoint-every", default = "default_checkpoint_every")]
    pub checkpoint_every: u64,

    /// Checkpoint at least this often while mutations happen (seconds)
    #[serde(
        rename = "checkpoint-interval-secs",
        default = "default_checkpoint_interval_secs"
    )]
    pub checkpoint_interval_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            checkpoint_every: default_checkpoint_every(),
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the `User-Agent` header: `Name/Version (+url; email)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Link following behavior of the standard pipeline
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    /// Maximum depth to crawl from seed URLs
    #[serde(rename = "max-depth", default = "default_max_depth")]
    pub max_depth: u32,

    /// Only follow links on the host of the page they were found on
    #[serde(rename = "same-host-only", default = "default_true")]
    pub same_host_only: bool,

    /// Refuse plain HTTP URLs
    #[serde(rename = "https-only", default = "default_true")]
    pub https_only: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            same_host_only: true,
            https_only: true,
        }
    }
}

/// A URL to seed the frontier with
#[derive(Debug, Clone, Deserialize)]
pub struct SeedConfig {
    pub url: String,

    /// Routing hint name (`html`, `json`, `xml`, `asset` or a custom class)
    #[serde(default = "default_hint")]
    pub hint: String,
}

impl SeedConfig {
    pub fn routing_hint(&self) -> RoutingHint {
        RoutingHint::from_name(&self.hint)
    }
}

fn default_pool_size() -> usize {
    8
}

fn default_max_in_flight() -> usize {
    64
}

fn default_max_idle_wait_ms() -> u64 {
    250
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_database_path() -> String {
    "./sumi-frontier.db".to_string()
}

fn default_checkpoint_every() -> u64 {
    1000
}

fn default_checkpoint_interval_secs() -> u64 {
    60
}

fn default_max_depth() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_hint() -> String {
    "html".to_string()
}
