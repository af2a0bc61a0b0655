//! Administrative surface: the request and response shapes an HTTP or RPC
//! layer would expose, bound to a [`QueueService`].
//!
//! Every task-addressing call is owner-scoped. The transport layer is out of
//! scope here; [`AdminApi`] takes already-authenticated owner ids and speaks
//! JSON-friendly types.

use crate::error::{QueueError, QueueResult};
use crate::service::{EnqueueOptions, QueueService, QueueStatsReport};
use crate::store::{TaskFilter, TaskPage};
use crate::task::{TaskId, TaskKind, TaskPayload, TaskRecord, TaskStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Body of an enqueue call: a typed payload plus optional tuning.
///
/// Wire shape: `{"type": "...", "data": {...}, "options": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct EnqueueRequest {
    #[serde(flatten)]
    pub payload: TaskPayload,
    #[serde(default)]
    pub options: EnqueueOptions,
}

/// Reply to a successful enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnqueueResponse {
    pub task_id: TaskId,
}

/// Query-string shape for task listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskQuery {
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default, rename = "type")]
    pub kind: Option<TaskKind>,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl From<TaskQuery> for TaskFilter {
    fn from(query: TaskQuery) -> Self {
        TaskFilter {
            status: query.status,
            kind: query.kind,
            limit: query.limit,
            offset: query.offset,
        }
    }
}

fn default_days_old() -> u32 {
    7
}

/// Body of a cleanup call.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupRequest {
    #[serde(default = "default_days_old")]
    pub days_old: u32,
}

impl Default for CleanupRequest {
    fn default() -> Self {
        Self {
            days_old: default_days_old(),
        }
    }
}

/// Reply to a cleanup call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupResponse {
    pub deleted: u64,
}

/// Owner-scoped facade over a [`QueueService`].
#[derive(Clone)]
pub struct AdminApi {
    service: Arc<QueueService>,
}

impl AdminApi {
    pub fn new(service: Arc<QueueService>) -> Self {
        Self { service }
    }

    /// Enqueue from an already-parsed request.
    pub async fn enqueue(&self, owner: &str, request: EnqueueRequest) -> QueueResult<EnqueueResponse> {
        let task_id = self
            .service
            .enqueue(request.payload, owner, request.options)
            .await?;
        Ok(EnqueueResponse { task_id })
    }

    /// Enqueue from a raw JSON body.
    ///
    /// An unknown `type`, a malformed or missing `data` block, or any other
    /// shape error is rejected as [`QueueError::InvalidPayload`] before a
    /// record is written.
    pub async fn enqueue_json(
        &self,
        owner: &str,
        body: serde_json::Value,
    ) -> QueueResult<EnqueueResponse> {
        let request: EnqueueRequest =
            serde_json::from_value(body).map_err(|err| QueueError::InvalidPayload {
                message: err.to_string(),
            })?;
        self.enqueue(owner, request).await
    }

    /// List the owner's tasks, newest first.
    pub async fn list_tasks(&self, owner: &str, query: TaskQuery) -> QueueResult<TaskPage> {
        self.service.list_tasks(owner, &query.into()).await
    }

    /// Fetch one of the owner's tasks.
    pub async fn get_task(&self, owner: &str, id: &TaskId) -> QueueResult<TaskRecord> {
        self.service.get_for_owner(owner, id).await
    }

    /// Cancel one of the owner's pending tasks.
    pub async fn cancel_task(&self, owner: &str, id: &TaskId) -> QueueResult<TaskRecord> {
        self.service.cancel_for_owner(owner, id).await
    }

    /// Queue-wide statistics. Not owner-scoped.
    pub async fn stats(&self) -> QueueResult<QueueStatsReport> {
        self.service.stats().await
    }

    /// Delete old terminal-state records, queue-wide.
    pub async fn cleanup(&self, request: CleanupRequest) -> QueueResult<CleanupResponse> {
        let deleted = self.service.cleanup(request.days_old).await?;
        Ok(CleanupResponse { deleted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::index::InMemoryIndex;
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn api() -> AdminApi {
        AdminApi::new(Arc::new(QueueService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryIndex::new()),
            QueueConfig::default(),
        )))
    }

    #[tokio::test]
    async fn enqueue_json_accepts_a_well_formed_body() {
        let api = api();
        let response = api
            .enqueue_json(
                "user-1",
                json!({
                    "type": "MARKET_STOCK_UPDATE",
                    "data": { "cabinet_id": "cab-1" },
                    "options": { "priority": 8, "max_attempts": 5 }
                }),
            )
            .await
            .unwrap();

        let record = api.get_task("user-1", &response.task_id).await.unwrap();
        assert_eq!(record.kind(), TaskKind::MarketStockUpdate);
        assert_eq!(record.priority, 8);
        assert_eq!(record.max_attempts, 5);
    }

    #[tokio::test]
    async fn enqueue_json_defaults_options() {
        let api = api();
        let response = api
            .enqueue_json(
                "user-1",
                json!({
                    "type": "PRODUCT_SYNC",
                    "data": { "integration_id": "int-1" }
                }),
            )
            .await
            .unwrap();

        let record = api.get_task("user-1", &response.task_id).await.unwrap();
        assert_eq!(record.priority, 5);
        assert_eq!(record.max_attempts, 3);
    }

    #[tokio::test]
    async fn enqueue_json_rejects_unknown_type() {
        let api = api();
        let err = api
            .enqueue_json(
                "user-1",
                json!({ "type": "MAKE_COFFEE", "data": {} }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidPayload { .. }));
    }

    #[tokio::test]
    async fn enqueue_json_rejects_malformed_data() {
        let api = api();
        // cabinet_id is required for stock updates
        let err = api
            .enqueue_json(
                "user-1",
                json!({ "type": "MARKET_STOCK_UPDATE", "data": {} }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidPayload { .. }));
    }

    #[tokio::test]
    async fn enqueue_json_propagates_priority_validation() {
        let api = api();
        let err = api
            .enqueue_json(
                "user-1",
                json!({
                    "type": "PRODUCT_SYNC",
                    "data": { "integration_id": "int-1" },
                    "options": { "priority": 42 }
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidPriority { value: 42 }));
    }

    #[tokio::test]
    async fn listing_filters_by_status_and_type() {
        let api = api();
        for cabinet in ["cab-1", "cab-2"] {
            api.enqueue_json(
                "user-1",
                json!({ "type": "MARKET_STOCK_UPDATE", "data": { "cabinet_id": cabinet } }),
            )
            .await
            .unwrap();
        }
        api.enqueue_json(
            "user-1",
            json!({ "type": "PRODUCT_SYNC", "data": { "integration_id": "int-1" } }),
        )
        .await
        .unwrap();

        let query: TaskQuery =
            serde_json::from_value(json!({ "type": "MARKET_STOCK_UPDATE", "status": "PENDING" }))
                .unwrap();
        let page = api.list_tasks("user-1", query).await.unwrap();
        assert_eq!(page.pagination.total, 2);
        assert!(page
            .tasks
            .iter()
            .all(|t| t.kind() == TaskKind::MarketStockUpdate));

        let page = api.list_tasks("user-1", TaskQuery::default()).await.unwrap();
        assert_eq!(page.pagination.total, 3);
    }

    #[tokio::test]
    async fn foreign_tasks_are_invisible() {
        let api = api();
        let response = api
            .enqueue_json(
                "alice",
                json!({ "type": "PRODUCT_SYNC", "data": { "integration_id": "int-1" } }),
            )
            .await
            .unwrap();

        let err = api.get_task("bob", &response.task_id).await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound { .. }));
        let err = api.cancel_task("bob", &response.task_id).await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound { .. }));

        let page = api.list_tasks("bob", TaskQuery::default()).await.unwrap();
        assert_eq!(page.pagination.total, 0);

        api.cancel_task("alice", &response.task_id).await.unwrap();
    }

    #[test]
    fn cleanup_request_defaults_to_a_week() {
        let request: CleanupRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(request.days_old, 7);
        let request: CleanupRequest = serde_json::from_value(json!({ "days_old": 30 })).unwrap();
        assert_eq!(request.days_old, 30);
    }

    #[tokio::test]
    async fn stats_reflect_enqueued_work() {
        let api = api();
        api.enqueue_json(
            "user-1",
            json!({ "type": "MARKET_STOCK_UPDATE", "data": { "cabinet_id": "cab-1" } }),
        )
        .await
        .unwrap();

        let stats = api.stats().await.unwrap();
        assert_eq!(stats.statuses.pending, 1);
        let depth: u64 = stats.lanes.iter().map(|l| l.depth).sum();
        assert_eq!(depth, 1);
    }
}
