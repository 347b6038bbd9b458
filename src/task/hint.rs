//! Routing hint definitions
//!
//! A hint is attached to every task when it is created. Routes match on it and
//! the default politeness resolver derives the task's lane from it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Content class of a task, used for routing and politeness lanes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingHint {
    /// Regular HTML page
    Html,

    /// JSON API endpoint
    Json,

    /// XML document (sitemaps, feeds)
    Xml,

    /// Binary asset (images, archives, documents)
    Asset,

    /// Application-defined class
    Custom(String),
}

impl RoutingHint {
    /// Returns the politeness lane for this content class
    ///
    /// JSON and XML endpoints share the `api` lane because they usually hit the
    /// same backend servers.
    pub fn lane(&self) -> &str {
        match self {
            Self::Html => "html",
            Self::Json | Self::Xml => "api",
            Self::Asset => "asset",
            Self::Custom(name) => name,
        }
    }

    /// Parses a hint from its configuration name
    ///
    /// Unknown names become `Custom` hints rather than errors.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "html" => Self::Html,
            "json" => Self::Json,
            "xml" => Self::Xml,
            "asset" => Self::Asset,
            _ => Self::Custom(name.to_string()),
        }
    }
}

impl Default for RoutingHint {
    fn default() -> Self {
        Self::Html
    }
}

impl fmt::Display for RoutingHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Html => write!(f, "html"),
            Self::Json => write!(f, "json"),
            Self::Xml => write!(f, "xml"),
            Self::Asset => write!(f, "asset"),
            Self::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}
