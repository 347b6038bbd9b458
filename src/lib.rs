//! Sumi-Frontier: crawl scheduling and execution core
//!
//! This crate decides when each discovered URL runs, how failures are retried
//! or dead-lettered, how in-progress state survives a crash through a
//! write-ahead log plus snapshots, and how a bounded worker pool drains the
//! whole workload to completion.

pub mod config;
pub mod crawler;
pub mod decision;
pub mod output;
pub mod persistence;
pub mod pipeline;
pub mod politeness;
pub mod queue;
pub mod retry;
pub mod storage;
pub mod task;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Frontier operations
#[derive(Debug, Error)]
pub enum SumiError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] persistence::StorageError),

    #[error("No route matches task {task_id} ({url})")]
    NoRoute { task_id: task::TaskId, url: String },

    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    #[error("Invalid crawler setup: {0}")]
    Setup(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Sumi-Frontier operations
pub type Result<T> = std::result::Result<T, SumiError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Crawler, CrawlerBuilder, DrainReport};
pub use pipeline::{Flow, Pipeline, PipelineResult, PipelineStep, ProcessingContext, TaskError};
pub use task::{ProcessingTask, RoutingHint, TaskId, TaskOrigin};
