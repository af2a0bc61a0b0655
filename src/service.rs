//! Queue service: the façade over the record store and the priority index.
//!
//! Producers enqueue through it, workers dequeue and report through it, and
//! the administrative surface reads through it. The service owns the
//! coordination rules between the two backends: the store is the source of
//! truth, the index is a disposable ordering hint, and every popped index
//! entry is revalidated against the store before a worker sees it.

use crate::config::{QueueConfig, RetryPolicy};
use crate::error::{QueueError, QueueResult};
use crate::index::{IndexEntry, PriorityIndex};
use crate::store::{StatusCounts, TaskFilter, TaskPage, TaskStore};
use crate::task::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY, TaskError, TaskId, TaskKind, TaskMetadata,
    TaskPayload, TaskRecord, TaskStatus, TransitionOp,
};
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Per-enqueue options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Dequeue priority, 1-10. Defaults to 5.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    /// Attempt budget. Defaults to 3.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Operator-facing labels.
    #[serde(default)]
    pub metadata: TaskMetadata,
}

/// Depth of one lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneStats {
    /// The lane's task kind.
    pub kind: TaskKind,
    /// Entries currently queued in the lane.
    pub depth: u64,
}

/// Snapshot of queue state: lane depths plus per-status record counts.
///
/// Read-only and eventually consistent with the store; two calls without an
/// intervening mutation return identical results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatsReport {
    /// One entry per known kind, in [`TaskKind::ALL`] order.
    pub lanes: Vec<LaneStats>,
    /// Aggregate record counts per status.
    pub statuses: StatusCounts,
}

/// The queue façade.
pub struct QueueService {
    store: Arc<dyn TaskStore>,
    index: Arc<dyn PriorityIndex>,
    retry: RetryPolicy,
    retention_days: u32,
}

impl QueueService {
    /// Build a service over the given backends.
    pub fn new(
        store: Arc<dyn TaskStore>,
        index: Arc<dyn PriorityIndex>,
        config: QueueConfig,
    ) -> Self {
        Self {
            store,
            index,
            retry: config.retry,
            retention_days: config.retention_days,
        }
    }

    /// Enqueue a task and return its id immediately.
    ///
    /// Writes the pending record first, then inserts the lane entry. The two
    /// steps are not transactional: a crash in between leaves an orphaned
    /// pending record with no lane entry, which only an administrative
    /// re-index would recover.
    pub async fn enqueue(
        &self,
        payload: TaskPayload,
        owner: impl Into<String>,
        options: EnqueueOptions,
    ) -> QueueResult<TaskId> {
        let priority = options.priority.unwrap_or(DEFAULT_PRIORITY);
        if !(1..=10).contains(&priority) {
            return Err(QueueError::InvalidPriority { value: priority });
        }
        let max_attempts = options.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1);

        let now = Utc::now();
        let kind = payload.kind();
        let record = TaskRecord::new(payload, owner, priority, max_attempts, options.metadata, now);
        let entry = IndexEntry::new(record.id.clone(), priority, now);

        let id = self.store.create(record).await?;
        self.index.insert(kind, entry).await?;

        tracing::info!(task_id = %id, %kind, priority, "task enqueued");
        Ok(id)
    }

    /// Pop the next eligible task of a kind for a worker.
    ///
    /// Returns `None` on an empty lane. A popped entry whose record is
    /// missing or no longer pending is a leftover from a cancel or cleanup;
    /// it is discarded and the pop retried once. An entry whose retry
    /// backoff has not elapsed goes back into the lane untouched.
    pub async fn dequeue(&self, kind: TaskKind, worker_id: &str) -> QueueResult<Option<TaskRecord>> {
        for _ in 0..2 {
            let Some(entry) = self.index.pop(kind).await? else {
                return Ok(None);
            };

            let op = TransitionOp::Start {
                worker_id: worker_id.to_string(),
            };
            match self.store.apply(&entry.task_id, op, Utc::now()).await {
                Ok(record) => {
                    tracing::info!(
                        task_id = %record.id,
                        %kind,
                        worker_id,
                        attempt = record.attempts,
                        "task dequeued"
                    );
                    return Ok(Some(record));
                }
                Err(QueueError::NotFound { task_id }) => {
                    tracing::warn!(%task_id, %kind, "lane entry references a missing record, discarding");
                }
                Err(QueueError::InvalidTransition { from, .. }) => {
                    tracing::debug!(task_id = %entry.task_id, %from, "stale lane entry, discarding");
                }
                Err(QueueError::NotYetDue { until }) => {
                    self.index.insert(kind, entry).await?;
                    tracing::debug!(%kind, %until, "next task not due yet, requeued entry");
                    return Ok(None);
                }
                Err(other) => return Err(other),
            }
        }
        Ok(None)
    }

    /// Record a successful attempt. Valid only from `Processing`.
    pub async fn complete(&self, id: &TaskId, data: serde_json::Value) -> QueueResult<TaskRecord> {
        let record = self
            .store
            .apply(id, TransitionOp::Complete { data }, Utc::now())
            .await?;
        tracing::info!(task_id = %id, "task completed");
        Ok(record)
    }

    /// Record a failed attempt. Valid only from `Processing`.
    ///
    /// With retry budget left the task returns to the lane with an
    /// exponential backoff; otherwise it terminates as `Failed` with the
    /// error preserved.
    pub async fn fail(&self, id: &TaskId, error: TaskError) -> QueueResult<TaskRecord> {
        let op = TransitionOp::Fail {
            error,
            backoff: self.retry,
        };
        let record = self.store.apply(id, op, Utc::now()).await?;

        if record.status == TaskStatus::Pending {
            let entry = IndexEntry::new(record.id.clone(), record.priority, record.created_at);
            self.index.insert(record.kind(), entry).await?;
            tracing::warn!(
                task_id = %id,
                attempt = record.attempts,
                max_attempts = record.max_attempts,
                next_attempt_at = ?record.next_attempt_at,
                "task failed, retry scheduled"
            );
        } else {
            tracing::error!(
                task_id = %id,
                attempts = record.attempts,
                "task failed permanently"
            );
        }
        Ok(record)
    }

    /// Cancel a pending task.
    ///
    /// The lane entry is left in place; dequeue revalidation discards it.
    /// Cancelling a processing or terminal task fails with
    /// [`QueueError::InvalidTransition`].
    pub async fn cancel(&self, id: &TaskId) -> QueueResult<TaskRecord> {
        let record = self.store.apply(id, TransitionOp::Cancel, Utc::now()).await?;
        tracing::info!(task_id = %id, "task cancelled");
        Ok(record)
    }

    /// Fetch a task by id.
    pub async fn get(&self, id: &TaskId) -> QueueResult<Option<TaskRecord>> {
        self.store.get(id).await
    }

    /// Fetch a task by id, scoped to its owner. A foreign or unknown id is
    /// indistinguishable: both are `NotFound`.
    pub async fn get_for_owner(&self, owner: &str, id: &TaskId) -> QueueResult<TaskRecord> {
        match self.store.get(id).await? {
            Some(record) if record.owner == owner => Ok(record),
            _ => Err(QueueError::not_found(id.clone())),
        }
    }

    /// Cancel a task on behalf of its owner.
    pub async fn cancel_for_owner(&self, owner: &str, id: &TaskId) -> QueueResult<TaskRecord> {
        // Ownership check first so a foreign id reads as missing, not as a
        // transition error.
        self.get_for_owner(owner, id).await?;
        self.cancel(id).await
    }

    /// List an owner's tasks, newest first.
    pub async fn list_tasks(&self, owner: &str, filter: &TaskFilter) -> QueueResult<TaskPage> {
        self.store.list_by_owner(owner, filter).await
    }

    /// Lane depths and per-status counts.
    pub async fn stats(&self) -> QueueResult<QueueStatsReport> {
        let mut lanes = Vec::with_capacity(TaskKind::ALL.len());
        for kind in TaskKind::ALL {
            lanes.push(LaneStats {
                kind,
                depth: self.index.depth(kind).await?,
            });
        }
        let statuses = self.store.count_by_status().await?;
        Ok(QueueStatsReport { lanes, statuses })
    }

    /// Delete terminal-state records older than `days_old` days.
    ///
    /// Lanes are untouched; terminal tasks have no live entries, and any
    /// stale ones die at the next dequeue revalidation.
    pub async fn cleanup(&self, days_old: u32) -> QueueResult<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(days_old as i64);
        let terminal: Vec<TaskStatus> = TaskStatus::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        let deleted = self.store.delete_older_than(cutoff, &terminal).await?;
        tracing::info!(days_old, deleted, "cleanup sweep finished");
        Ok(deleted)
    }

    /// Cleanup with the configured retention window.
    pub async fn cleanup_default(&self) -> QueueResult<u64> {
        self.cleanup(self.retention_days).await
    }

    /// The retry policy in effect.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}
