//! Task record store: durable, queryable persistence of every task.
//!
//! The store is one of the two injected seams behind the queue service (the
//! other being [`crate::index::PriorityIndex`]). It owns task content and is
//! the single source of truth for task state; the priority index only orders
//! references to it. The crate ships an in-memory implementation; deployments
//! backed by a document database implement [`TaskStore`] themselves.

use crate::error::QueueResult;
use crate::task::{TaskId, TaskKind, TaskRecord, TaskStatus, TransitionOp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod memory;
pub use memory::InMemoryStore;

/// Filters for owner-scoped task listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Only tasks in this status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    /// Only tasks of this kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TaskKind>,
    /// Page size. Zero means the default of 50.
    #[serde(default)]
    pub limit: usize,
    /// Page offset.
    #[serde(default)]
    pub offset: usize,
}

impl TaskFilter {
    /// Effective page size.
    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 { 50 } else { self.limit }
    }
}

/// Pagination envelope for task listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    /// Total matching tasks, before paging.
    pub total: usize,
    /// Page size used.
    pub limit: usize,
    /// Page offset used.
    pub offset: usize,
    /// Whether another page exists.
    pub has_more: bool,
}

/// One page of tasks, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPage {
    /// The tasks on this page.
    pub tasks: Vec<TaskRecord>,
    /// Paging information.
    pub pagination: Pagination,
}

/// Aggregate per-status record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Tasks waiting to be processed.
    pub pending: u64,
    /// Tasks currently held by workers.
    pub processing: u64,
    /// Tasks finished successfully.
    pub completed: u64,
    /// Tasks that exhausted their retries.
    pub failed: u64,
    /// Tasks cancelled before pickup.
    pub cancelled: u64,
}

impl StatusCounts {
    /// Count for one status.
    pub fn get(&self, status: TaskStatus) -> u64 {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Processing => self.processing,
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
            TaskStatus::Cancelled => self.cancelled,
        }
    }

    /// Bump the count for one status.
    pub fn bump(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Processing => self.processing += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
    }

    /// Total records across all statuses.
    pub fn total(&self) -> u64 {
        TaskStatus::ALL.iter().map(|s| self.get(*s)).sum()
    }
}

/// Trait all task record stores implement.
///
/// Every mutation is a single-record, single-operation update; the lifecycle
/// is independent per task, so no multi-record transactions are required.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new record. The record's id is the return value.
    async fn create(&self, record: TaskRecord) -> QueueResult<TaskId>;

    /// Fetch a record by id.
    async fn get(&self, id: &TaskId) -> QueueResult<Option<TaskRecord>>;

    /// Apply one lifecycle transition atomically and return the updated
    /// record. Fails with `NotFound` for unknown ids; transition violations
    /// (`InvalidTransition`, `NotYetDue`) propagate from
    /// [`TaskRecord::apply`] and leave the record unchanged.
    async fn apply(
        &self,
        id: &TaskId,
        op: TransitionOp,
        now: DateTime<Utc>,
    ) -> QueueResult<TaskRecord>;

    /// List an owner's tasks, newest first, paginated.
    async fn list_by_owner(&self, owner: &str, filter: &TaskFilter) -> QueueResult<TaskPage>;

    /// Aggregate per-status counts across all records.
    async fn count_by_status(&self) -> QueueResult<StatusCounts>;

    /// Delete records in the given statuses whose `completed_at` is before
    /// the cutoff. Returns the number of deleted records.
    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[TaskStatus],
    ) -> QueueResult<u64>;
}
