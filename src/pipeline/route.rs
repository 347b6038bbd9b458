use crate::pipeline::{Pipeline, RunContext};
use crate::task::{ProcessingTask, RoutingHint};
use crate::url::{matches_host_pattern, matches_path_prefix};
use crate::{Result, SumiError};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Custom match function
pub type MatchFn = Arc<dyn Fn(&ProcessingTask, &RunContext) -> bool + Send + Sync>;

/// Predicate over task attributes
#[derive(Clone)]
pub enum Matcher {
    /// Matches every task
    Any,

    /// Routing hint equals
    Hint(RoutingHint),

    /// Host matches a pattern; `*.example.com` also matches `example.com`
    Host(String),

    /// Path starts with a prefix, on a segment boundary
    PathPrefix(String),

    AllOf(Vec<Matcher>),
    AnyOf(Vec<Matcher>),
    Not(Box<Matcher>),
    Predicate(MatchFn),
}

impl Matcher {
    pub fn host(pattern: impl Into<String>) -> Self {
        Self::Host(pattern.into())
    }

    pub fn path_prefix(prefix: impl Into<String>) -> Self {
        Self::PathPrefix(prefix.into())
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&ProcessingTask, &RunContext) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Matcher) -> Self {
        Self::Not(Box::new(inner))
    }

    pub fn matches(&self, task: &ProcessingTask, run: &RunContext) -> bool {
        match self {
            Self::Any => true,
            Self::Hint(hint) => task.hint() == hint,
            Self::Host(pattern) => matches_host_pattern(pattern, &task.host()),
            Self::PathPrefix(prefix) => matches_path_prefix(task.url(), prefix),
            Self::AllOf(all) => all.iter().all(|m| m.matches(task, run)),
            Self::AnyOf(any) => any.iter().any(|m| m.matches(task, run)),
            Self::Not(inner) => !inner.matches(task, run),
            Self::Predicate(f) => f(task, run),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "Any"),
            Self::Hint(hint) => write!(f, "Hint({})", hint),
            Self::Host(pattern) => write!(f, "Host({})", pattern),
            Self::PathPrefix(prefix) => write!(f, "PathPrefix({})", prefix),
            Self::AllOf(all) => f.debug_tuple("AllOf").field(all).finish(),
            Self::AnyOf(any) => f.debug_tuple("AnyOf").field(any).finish(),
            Self::Not(inner) => f.debug_tuple("Not").field(inner).finish(),
            Self::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

/// A named matcher bound to a pipeline
#[derive(Debug, Clone)]
pub struct Route {
    pub name: String,
    pub matcher: Matcher,
    pub pipeline: Pipeline,
}

impl Route {
    pub fn new(name: impl Into<String>, matcher: Matcher, pipeline: Pipeline) -> Self {
        Self {
            name: name.into(),
            matcher,
            pipeline,
        }
    }
}

/// Picks the route for a task
///
/// Routes are tried in registration order; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct RouteResolver {
    routes: Vec<Route>,
    names: HashSet<String>,
}

impl RouteResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route after every existing one
    ///
    /// # Errors
    ///
    /// Returns `SumiError::InvalidRoute` if the pipeline has no steps or the
    /// name is already taken.
    pub fn register(&mut self, route: Route) -> Result<()> {
        if route.pipeline.is_empty() {
            return Err(SumiError::InvalidRoute(format!(
                "route '{}' has an empty pipeline",
                route.name
            )));
        }
        if !self.names.insert(route.name.clone()) {
            return Err(SumiError::InvalidRoute(format!(
                "duplicate route name '{}'",
                route.name
            )));
        }

        tracing::debug!(route = %route.name, steps = route.pipeline.len(), "Registered route");
        self.routes.push(route);
        Ok(())
    }

    /// Returns the first route whose matcher accepts the task
    pub fn resolve(&self, task: &ProcessingTask, run: &RunContext) -> Option<&Route> {
        self.routes.iter().find(|r| r.matcher.matches(task, run))
    }

    /// Like [`RouteResolver::resolve`], but a miss is an error
    pub fn resolve_or_err(&self, task: &ProcessingTask, run: &RunContext) -> Result<&Route> {
        self.resolve(task, run).ok_or_else(|| SumiError::NoRoute {
            task_id: task.id(),
            url: task.url().to_string(),
        })
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
