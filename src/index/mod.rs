//! Priority queue broker: per-kind ordered lanes of task references.
//!
//! The index is deliberately dumb. It owns no task content, only
//! `(priority, id, created_at)` entries, and provides a single atomic
//! pop-max primitive per lane. The queue service revalidates every popped
//! reference against the record store, so a stale entry (cancelled task,
//! crashed cleanup) costs one extra lookup instead of a wrong execution.

use crate::error::QueueResult;
use crate::task::{TaskId, TaskKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod memory;
pub use memory::InMemoryIndex;

#[cfg(feature = "redis-index")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-index")))]
pub mod redis;

#[cfg(feature = "redis-index")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-index")))]
pub use redis::RedisIndex;

/// One lane entry: a task reference with its ordering keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Referenced task id.
    pub task_id: TaskId,
    /// Dequeue priority, 1-10, higher pops first.
    pub priority: u8,
    /// Creation time; earlier pops first within a priority band.
    pub created_at: DateTime<Utc>,
}

impl IndexEntry {
    /// Build an entry for one task.
    pub fn new(task_id: impl Into<TaskId>, priority: u8, created_at: DateTime<Utc>) -> Self {
        Self {
            task_id: task_id.into(),
            priority,
            created_at,
        }
    }
}

/// Trait all priority-index backends implement.
#[async_trait]
pub trait PriorityIndex: Send + Sync {
    /// Insert an entry into the kind's lane.
    async fn insert(&self, kind: TaskKind, entry: IndexEntry) -> QueueResult<()>;

    /// Atomically remove and return the best entry of the kind's lane:
    /// highest priority first, oldest first within a band. `None` on an
    /// empty lane.
    async fn pop(&self, kind: TaskKind) -> QueueResult<Option<IndexEntry>>;

    /// Number of entries currently in the kind's lane.
    async fn depth(&self, kind: TaskKind) -> QueueResult<u64>;
}
