//! In-memory task record store.
//!
//! Keeps every record in a `HashMap` behind an async `RwLock`. Suited to
//! development, tests, and single-process deployments where records do not
//! need to survive a restart.

use super::{Pagination, StatusCounts, TaskFilter, TaskPage, TaskStore};
use crate::error::{QueueError, QueueResult};
use crate::task::{TaskId, TaskRecord, TaskStatus, TransitionOp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory [`TaskStore`] implementation.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: Arc<RwLock<HashMap<TaskId, TaskRecord>>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held, any status.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn create(&self, record: TaskRecord) -> QueueResult<TaskId> {
        let id = record.id.clone();
        let mut records = self.records.write().await;
        records.insert(id.clone(), record);
        tracing::debug!(task_id = %id, "task record created");
        Ok(id)
    }

    async fn get(&self, id: &TaskId) -> QueueResult<Option<TaskRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn apply(
        &self,
        id: &TaskId,
        op: TransitionOp,
        now: DateTime<Utc>,
    ) -> QueueResult<TaskRecord> {
        let op_name = op.name();
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| QueueError::not_found(id.clone()))?;
        record.apply(op, now)?;
        tracing::debug!(task_id = %id, op = op_name, status = %record.status, "transition applied");
        Ok(record.clone())
    }

    async fn list_by_owner(&self, owner: &str, filter: &TaskFilter) -> QueueResult<TaskPage> {
        let records = self.records.read().await;
        let mut matching: Vec<&TaskRecord> = records
            .values()
            .filter(|r| r.owner == owner)
            .filter(|r| filter.status.is_none_or(|s| r.status == s))
            .filter(|r| filter.kind.is_none_or(|k| r.kind() == k))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len();
        let limit = filter.effective_limit();
        let tasks: Vec<TaskRecord> = matching
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .cloned()
            .collect();
        let has_more = filter.offset + tasks.len() < total;

        Ok(TaskPage {
            tasks,
            pagination: Pagination {
                total,
                limit,
                offset: filter.offset,
                has_more,
            },
        })
    }

    async fn count_by_status(&self) -> QueueResult<StatusCounts> {
        let records = self.records.read().await;
        let mut counts = StatusCounts::default();
        for record in records.values() {
            counts.bump(record.status);
        }
        Ok(counts)
    }

    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[TaskStatus],
    ) -> QueueResult<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| {
            let expired = statuses.contains(&r.status)
                && r.completed_at.is_some_and(|done| done < cutoff);
            !expired
        });
        let deleted = (before - records.len()) as u64;
        if deleted > 0 {
            tracing::info!(deleted, "cleaned up old task records");
        }
        Ok(deleted)
    }
}
