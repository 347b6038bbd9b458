use crate::politeness::PolitenessKey;
use crate::task::ProcessingTask;

/// Maps a task to the key its dispatches are throttled under
pub trait PolitenessKeyResolver: Send + Sync {
    fn resolve(&self, task: &ProcessingTask) -> PolitenessKey;
}

impl<F> PolitenessKeyResolver for F
where
    F: Fn(&ProcessingTask) -> PolitenessKey + Send + Sync,
{
    fn resolve(&self, task: &ProcessingTask) -> PolitenessKey {
        self(task)
    }
}

/// Default resolver: the task's content lane on its URL host
#[derive(Debug, Clone, Copy, Default)]
pub struct LaneHostResolver;

impl PolitenessKeyResolver for LaneHostResolver {
    fn resolve(&self, task: &ProcessingTask) -> PolitenessKey {
        PolitenessKey::new(task.hint().lane(), task.host())
    }
}
