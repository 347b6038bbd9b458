//! Work buffers shared between the engine and its workers
//!
//! A task id lives in at most one of these structures at any instant:
//!
//! - `Frontier`: tasks waiting to be dispatched (FIFO per priority class)
//! - `InFlightBuffer`: tasks currently executing on a worker
//! - `RetryBuffer`: tasks waiting for a future retry attempt
//! - `DeadLetterQueue`: permanently failed tasks (terminal)
//!
//! Every structure takes `&self` and synchronizes internally so it can be
//! shared as `Arc<dyn Trait>` across worker tasks.

mod dead_letter;
mod frontier;
mod in_flight;
mod retry_buffer;

pub use dead_letter::{DeadLetter, DeadLetterQueue, InMemoryDeadLetterQueue};
pub use frontier::{Frontier, InMemoryFrontier};
pub(crate) use frontier::lock;
pub use in_flight::{InFlightBuffer, InMemoryInFlightBuffer};
pub use retry_buffer::{InMemoryRetryBuffer, RetryBuffer};

use crate::persistence::StorageError;

/// Result type for buffer operations
///
/// In-memory buffers never fail; persistent wrappers surface WAL and snapshot
/// failures through this type.
pub type QueueResult<T> = Result<T, StorageError>;
