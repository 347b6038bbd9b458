use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why one attempt at a task failed
///
/// These errors never abort a crawl: they are handed to the retry policy,
/// which either reschedules the task or dead-letters it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP status {status}")]
    HttpStatus { status: u16 },

    #[error("Parse failed: {0}")]
    Parse(String),

    #[error("No parser for content type '{0}'")]
    NoParser(String),

    #[error("Step '{step}' failed: {message}")]
    Step { step: String, message: String },

    #[error("Step panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Convenience constructor for step-specific failures
    pub fn step(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Classifies the error for retry policies
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Fetch(_) | Self::Timeout => ErrorKind::Transient,
            // Rate limited and request timeout are worth retrying
            Self::HttpStatus { status: 408 | 429 } => ErrorKind::Transient,
            Self::HttpStatus { status } if *status >= 500 => ErrorKind::HttpServer,
            Self::HttpStatus { .. } => ErrorKind::HttpClient,
            Self::Parse(_) => ErrorKind::Parse,
            Self::NoParser(_) | Self::Step { .. } => ErrorKind::Logic,
            Self::Panicked(_) => ErrorKind::Panic,
        }
    }
}

/// Coarse failure class used by retry policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Transient,
    HttpClient,
    HttpServer,
    Parse,
    Logic,
    Panic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transient => "transient",
            Self::HttpClient => "http-client",
            Self::HttpServer => "http-server",
            Self::Parse => "parse",
            Self::Logic => "logic",
            Self::Panic => "panic",
        };
        f.write_str(name)
    }
}
