use crate::task::RoutingHint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use uuid::Uuid;

/// Opaque task identifier
///
/// Equality is by value. The same id is the join key across the frontier, the
/// in-flight buffer, the retry buffer, the dead-letter queue and WAL events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generates a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Why a task exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TaskOrigin {
    /// Supplied by the caller before the crawl started
    Seed { reason: String },

    /// Resubmitted after a failed attempt
    Retry { reason: String },

    /// Discovered while processing another task
    Derived { reason: String },
}

impl TaskOrigin {
    /// Returns the reason string attached to this origin
    pub fn reason(&self) -> &str {
        match self {
            Self::Seed { reason } | Self::Retry { reason } | Self::Derived { reason } => reason,
        }
    }

    /// Returns true if this task is a retry of an earlier attempt
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }
}

/// A URL to fetch and process, plus provenance and attempt metadata
///
/// Tasks are immutable values: retries and derived links build new values
/// through [`ProcessingTask::retry`] and [`ProcessingTask::derive`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTask {
    id: TaskId,
    url: Url,
    attempt: u32,
    parent_url: Option<Url>,
    origin: TaskOrigin,
    depth: u32,
    discovered_at: DateTime<Utc>,
    priority: i32,
    hint: RoutingHint,
}

impl ProcessingTask {
    /// Creates a seed task at depth 0
    pub fn seed(url: Url, hint: RoutingHint) -> Self {
        Self {
            id: TaskId::new(),
            url,
            attempt: 0,
            parent_url: None,
            origin: TaskOrigin::Seed {
                reason: "seed".to_string(),
            },
            depth: 0,
            discovered_at: Utc::now(),
            priority: 0,
            hint,
        }
    }

    /// Creates a task discovered while processing `self`
    ///
    /// The child gets a fresh id, `depth + 1`, `self`'s URL as parent and
    /// inherits the parent's priority.
    pub fn derive(&self, url: Url, hint: RoutingHint, reason: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            url,
            attempt: 0,
            parent_url: Some(self.url.clone()),
            origin: TaskOrigin::Derived {
                reason: reason.into(),
            },
            depth: self.depth + 1,
            discovered_at: Utc::now(),
            priority: self.priority,
            hint,
        }
    }

    /// Creates the next incarnation of this task after a failure
    ///
    /// The id is kept because it is the same logical task; `attempt` is
    /// incremented so every resubmission is strictly newer than the last.
    pub fn retry(&self, reason: impl Into<String>) -> Self {
        Self {
            attempt: self.attempt + 1,
            origin: TaskOrigin::Retry {
                reason: reason.into(),
            },
            ..self.clone()
        }
    }

    /// Returns a copy with the given priority (lower values are dispatched first)
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn parent_url(&self) -> Option<&Url> {
        self.parent_url.as_ref()
    }

    pub fn origin(&self) -> &TaskOrigin {
        &self.origin
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn discovered_at(&self) -> DateTime<Utc> {
        self.discovered_at
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn hint(&self) -> &RoutingHint {
        &self.hint
    }

    /// Returns the lowercase host of the task URL, or an empty string
    pub fn host(&self) -> String {
        crate::url::extract_host(&self.url).unwrap_or_default()
    }
}
