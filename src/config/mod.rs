//! Configuration module for Sumi-Frontier
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every section except `[user-agent]` and `[[seed]]` has defaults.
//!
//! # Example
//!
//! ```no_run
//! use sumi_frontier::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Engine runs {} workers", config.engine.pool_size);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlConfig, EngineConfig, ExecutionMode, LaneConfig, PersistenceConfig,
    PolitenessConfig, RetryConfig, SeedConfig, UnroutablePolicy, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
