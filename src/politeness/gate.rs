use crate::config::PolitenessConfig;
use crate::politeness::{LaneHostResolver, PermitDecision, PolitenessKey, PolitenessKeyResolver};
use crate::queue::lock;
use crate::task::ProcessingTask;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Shortest delay returned when a key is at its concurrency cap
const CONCURRENCY_RECHECK: Duration = Duration::from_millis(10);

/// Throttling rules for one lane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanePolicy {
    /// Minimum time between two dispatches under the same key
    pub min_interval: Duration,

    /// Maximum tasks running at once under the same key
    pub max_concurrent: Option<usize>,
}

impl LanePolicy {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            max_concurrent: None,
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = Some(max.max(1));
        self
    }
}

impl Default for LanePolicy {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[derive(Debug, Default)]
struct SlotState {
    last_dispatch: Option<Instant>,
    running: usize,
}

/// Per-key state, locked independently of every other key
#[derive(Debug)]
struct KeySlot {
    policy: LanePolicy,
    state: Mutex<SlotState>,
}

/// Decides whether a task may be dispatched now
///
/// The key map is only write-locked to insert a key seen for the first time;
/// the read-modify-write on a key's last dispatch instant happens under that
/// key's own mutex, so unrelated keys never wait on each other.
pub struct PolitenessGate {
    resolver: Box<dyn PolitenessKeyResolver>,
    default_policy: LanePolicy,
    lanes: HashMap<String, LanePolicy>,
    slots: RwLock<HashMap<PolitenessKey, Arc<KeySlot>>>,
}

impl PolitenessGate {
    /// Creates a gate applying `default_policy` to every lane
    pub fn new(default_policy: LanePolicy) -> Self {
        Self {
            resolver: Box::new(LaneHostResolver),
            default_policy,
            lanes: HashMap::new(),
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a gate that allows every dispatch
    pub fn unrestricted() -> Self {
        Self::new(LanePolicy::default())
    }

    /// Builds a gate from the `[politeness]` configuration section
    pub fn from_config(config: &PolitenessConfig) -> Self {
        let mut default_policy = LanePolicy::new(Duration::from_millis(config.default_interval_ms));
        if let Some(max) = config.default_max_concurrent {
            default_policy = default_policy.with_max_concurrent(max);
        }

        let mut gate = Self::new(default_policy);
        for lane in &config.lanes {
            let mut policy = LanePolicy::new(Duration::from_millis(lane.interval_ms));
            if let Some(max) = lane.max_concurrent {
                policy = policy.with_max_concurrent(max);
            }
            gate = gate.with_lane(&lane.name, policy);
        }
        gate
    }

    /// Overrides the policy for one lane
    pub fn with_lane(mut self, lane: &str, policy: LanePolicy) -> Self {
        self.lanes.insert(lane.to_string(), policy);
        self
    }

    /// Replaces the key resolver
    pub fn with_resolver(mut self, resolver: impl PolitenessKeyResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Returns the key a task is throttled under
    pub fn key_for(&self, task: &ProcessingTask) -> PolitenessKey {
        self.resolver.resolve(task)
    }

    /// Asks whether `task` may be dispatched at `now`
    ///
    /// On `Allow` the dispatch is recorded against the task's key, and the
    /// caller must call [`PolitenessGate::release`] once the task finishes.
    ///
    /// # Arguments
    ///
    /// * `task` - The task about to be dispatched
    /// * `now` - The current time instant
    ///
    /// # Returns
    ///
    /// * `PermitDecision::Allow` - Dispatch now
    /// * `PermitDecision::RetryAfter(delay)` - Too soon, or the key is at capacity
    pub fn permit(&self, task: &ProcessingTask, now: Instant) -> PermitDecision {
        let key = self.key_for(task);
        let slot = self.slot(&key);
        let policy = slot.policy;
        let mut state = lock(&slot.state);

        if let Some(max) = policy.max_concurrent {
            if state.running >= max {
                let delay = policy.min_interval.max(CONCURRENCY_RECHECK);
                tracing::trace!(%key, running = state.running, "Key at capacity");
                return PermitDecision::RetryAfter(delay);
            }
        }

        if let Some(last) = state.last_dispatch {
            let earliest = last + policy.min_interval;
            if now < earliest {
                let wait = earliest - now;
                tracing::trace!(%key, wait_ms = wait.as_millis() as u64, "Too soon for key");
                return PermitDecision::RetryAfter(wait);
            }
        }

        state.last_dispatch = Some(now);
        state.running += 1;
        PermitDecision::Allow
    }

    /// Records that an allowed task has finished running
    pub fn release(&self, task: &ProcessingTask) {
        let key = self.key_for(task);
        let slot = self.existing_slot(&key);
        if let Some(slot) = slot {
            let mut state = lock(&slot.state);
            state.running = state.running.saturating_sub(1);
        }
    }

    /// Number of tasks currently running under `key`
    pub fn running(&self, key: &PolitenessKey) -> usize {
        self.existing_slot(key)
            .map(|slot| lock(&slot.state).running)
            .unwrap_or(0)
    }

    fn policy_for(&self, key: &PolitenessKey) -> LanePolicy {
        self.lanes
            .get(&key.lane)
            .copied()
            .unwrap_or(self.default_policy)
    }

    fn existing_slot(&self, key: &PolitenessKey) -> Option<Arc<KeySlot>> {
        let slots = self
            .slots
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.get(key).cloned()
    }

    fn slot(&self, key: &PolitenessKey) -> Arc<KeySlot> {
        if let Some(slot) = self.existing_slot(key) {
            return slot;
        }

        let mut slots = self
            .slots
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(slots.entry(key.clone()).or_insert_with(|| {
            Arc::new(KeySlot {
                policy: self.policy_for(key),
                state: Mutex::new(SlotState::default()),
            })
        }))
    }
}

impl Default for PolitenessGate {
    fn default() -> Self {
        Self::unrestricted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::RoutingHint;
    use std::thread;
    use url::Url;

    fn task(url: &str, hint: RoutingHint) -> ProcessingTask {
        ProcessingTask::seed(Url::parse(url).unwrap(), hint)
    }

    fn html(path: &str) -> ProcessingTask {
        task(&format!("https://example.com/{}", path), RoutingHint::Html)
    }

    #[test]
    fn test_first_dispatch_is_allowed() {
        let gate = PolitenessGate::new(LanePolicy::new(Duration::from_secs(1)));
        assert_eq!(gate.permit(&html("a"), Instant::now()), PermitDecision::Allow);
    }

    #[test]
    fn test_min_interval_is_enforced() {
        let gate = PolitenessGate::new(LanePolicy::new(Duration::from_millis(100)));
        let start = Instant::now();

        assert!(gate.permit(&html("a"), start).is_allowed());
        assert_eq!(
            gate.permit(&html("b"), start + Duration::from_millis(40)),
            PermitDecision::RetryAfter(Duration::from_millis(60))
        );
        assert!(gate
            .permit(&html("b"), start + Duration::from_millis(100))
            .is_allowed());
    }

    #[test]
    fn test_keys_are_independent() {
        let gate = PolitenessGate::new(LanePolicy::new(Duration::from_secs(10)));
        let now = Instant::now();

        assert!(gate.permit(&html("a"), now).is_allowed());
        assert!(gate
            .permit(&task("https://other.com/a", RoutingHint::Html), now)
            .is_allowed());
        assert!(gate
            .permit(&task("https://example.com/api", RoutingHint::Json), now)
            .is_allowed());
        assert!(!gate.permit(&html("b"), now).is_allowed());
    }

    #[test]
    fn test_lane_override() {
        let gate = PolitenessGate::new(LanePolicy::new(Duration::from_secs(10)))
            .with_lane("asset", LanePolicy::new(Duration::ZERO));
        let now = Instant::now();
        let asset = |p: &str| task(&format!("https://example.com/{}", p), RoutingHint::Asset);

        assert!(gate.permit(&asset("a.png"), now).is_allowed());
        assert!(gate.permit(&asset("b.png"), now).is_allowed());
    }

    #[test]
    fn test_concurrency_cap_and_release() {
        let gate = PolitenessGate::new(LanePolicy::new(Duration::ZERO).with_max_concurrent(2));
        let now = Instant::now();
        let (a, b, c) = (html("a"), html("b"), html("c"));

        assert!(gate.permit(&a, now).is_allowed());
        assert!(gate.permit(&b, now).is_allowed());
        assert_eq!(
            gate.permit(&c, now),
            PermitDecision::RetryAfter(CONCURRENCY_RECHECK)
        );
        assert_eq!(gate.running(&gate.key_for(&a)), 2);

        gate.release(&a);
        assert!(gate.permit(&c, now).is_allowed());
    }

    #[test]
    fn test_release_of_unknown_key_is_noop() {
        let gate = PolitenessGate::unrestricted();
        gate.release(&html("never-permitted"));
        assert_eq!(gate.running(&gate.key_for(&html("x"))), 0);
    }

    #[test]
    fn test_concurrent_callers_respect_spacing() {
        let interval = Duration::from_millis(5);
        let gate = PolitenessGate::new(LanePolicy::new(interval));
        let granted = Mutex::new(Vec::new());

        thread::scope(|s| {
            for worker in 0..8 {
                let gate = &gate;
                let granted = &granted;
                s.spawn(move || {
                    let mut allowed = 0;
                    while allowed < 5 {
                        let t = html(&format!("{}-{}", worker, allowed));
                        let now = Instant::now();
                        match gate.permit(&t, now) {
                            PermitDecision::Allow => {
                                granted.lock().unwrap().push(now);
                                gate.release(&t);
                                allowed += 1;
                            }
                            PermitDecision::RetryAfter(d) => thread::sleep(d),
                        }
                    }
                });
            }
        });

        let mut granted = granted.into_inner().unwrap();
        assert_eq!(granted.len(), 40);
        granted.sort();
        for pair in granted.windows(2) {
            assert!(pair[1] - pair[0] >= interval);
        }
    }
}
