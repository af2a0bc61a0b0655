//! Task records, the closed task-kind vocabulary, and the lifecycle state machine.
//!
//! A [`TaskRecord`] is the single source of truth for one unit of queued work.
//! Every status change goes through [`TaskRecord::apply`], so the state machine
//! lives in exactly one place and every store backend enforces the same rules.

use crate::config::RetryPolicy;
use crate::error::{HandlerError, QueueError, QueueResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a task (uuid v4, server generated).
pub type TaskId = String;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting in a lane (or waiting for its retry backoff to elapse).
    Pending,
    /// Held by a worker and being executed.
    Processing,
    /// Finished successfully.
    Completed,
    /// Failed with all retry attempts exhausted.
    Failed,
    /// Cancelled before a worker picked it up.
    Cancelled,
}

impl TaskStatus {
    /// Every status, for stats aggregation.
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Terminal statuses never transition again and are eligible for cleanup.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed vocabulary of task types.
///
/// Each kind has a dedicated lane in the priority index and a matching handler
/// registered with the dispatcher at startup. Adding a kind means adding an
/// enum member here, a payload variant on [`TaskPayload`], and a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    /// Push prices to the marketplace for one cabinet.
    MarketPriceUpdate,
    /// Push warehouse remains to the marketplace for one cabinet.
    MarketStockUpdate,
    /// Ingest the marketplace sales report for one cabinet.
    MarketReportUpdate,
    /// Pull prices from the ERP for one integration.
    ErpPriceUpdate,
    /// Pull stock levels from the ERP for one integration.
    ErpStockUpdate,
    /// Match products between the marketplace and the ERP.
    ProductSync,
}

impl TaskKind {
    /// Every kind, in the fixed order workers poll lanes.
    pub const ALL: [TaskKind; 6] = [
        TaskKind::MarketPriceUpdate,
        TaskKind::MarketStockUpdate,
        TaskKind::MarketReportUpdate,
        TaskKind::ErpPriceUpdate,
        TaskKind::ErpStockUpdate,
        TaskKind::ProductSync,
    ];

    /// Wire name of the kind, also used as the lane key suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::MarketPriceUpdate => "MARKET_PRICE_UPDATE",
            TaskKind::MarketStockUpdate => "MARKET_STOCK_UPDATE",
            TaskKind::MarketReportUpdate => "MARKET_REPORT_UPDATE",
            TaskKind::ErpPriceUpdate => "ERP_PRICE_UPDATE",
            TaskKind::ErpStockUpdate => "ERP_STOCK_UPDATE",
            TaskKind::ProductSync => "PRODUCT_SYNC",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| QueueError::InvalidPayload {
                message: format!("unknown task kind '{s}'"),
            })
    }
}

/// Payload for marketplace price updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPricePayload {
    /// Marketplace cabinet to push prices for.
    pub cabinet_id: String,
    /// Page size for the price upload batches.
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Page offset to resume from.
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    100
}

/// Payload for marketplace stock (remains) updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketStockPayload {
    /// Marketplace cabinet to refresh remains for.
    pub cabinet_id: String,
}

/// Payload for marketplace sales-report ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketReportPayload {
    /// Marketplace cabinet the report belongs to.
    pub cabinet_id: String,
    /// Report window start (inclusive), RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<DateTime<Utc>>,
    /// Report window end (inclusive), RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<DateTime<Utc>>,
}

/// Payload for ERP-side operations scoped to one integration link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationPayload {
    /// Integration link between a storage account and a marketplace cabinet.
    pub integration_id: String,
}

/// Typed task payload, tagged by kind.
///
/// Deserializing this enum is the enqueue-time validation: an unknown `type`
/// tag or a missing required field is rejected before any record is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TaskPayload {
    #[serde(rename = "MARKET_PRICE_UPDATE")]
    MarketPriceUpdate(MarketPricePayload),
    #[serde(rename = "MARKET_STOCK_UPDATE")]
    MarketStockUpdate(MarketStockPayload),
    #[serde(rename = "MARKET_REPORT_UPDATE")]
    MarketReportUpdate(MarketReportPayload),
    #[serde(rename = "ERP_PRICE_UPDATE")]
    ErpPriceUpdate(IntegrationPayload),
    #[serde(rename = "ERP_STOCK_UPDATE")]
    ErpStockUpdate(IntegrationPayload),
    #[serde(rename = "PRODUCT_SYNC")]
    ProductSync(IntegrationPayload),
}

impl TaskPayload {
    /// The lane this payload belongs to.
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::MarketPriceUpdate(_) => TaskKind::MarketPriceUpdate,
            TaskPayload::MarketStockUpdate(_) => TaskKind::MarketStockUpdate,
            TaskPayload::MarketReportUpdate(_) => TaskKind::MarketReportUpdate,
            TaskPayload::ErpPriceUpdate(_) => TaskKind::ErpPriceUpdate,
            TaskPayload::ErpStockUpdate(_) => TaskKind::ErpStockUpdate,
            TaskPayload::ProductSync(_) => TaskKind::ProductSync,
        }
    }
}

/// Free-form descriptive fields attached at enqueue time.
///
/// None of these affect scheduling or execution; they exist for operators
/// reading task lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Human-readable cabinet name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cabinet_name: Option<String>,
    /// Human-readable integration name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_name: Option<String>,
    /// Rough expected duration in seconds, for progress display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_secs: Option<u64>,
    /// Grouping tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Structured error stored on a failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    /// Human-readable failure message.
    pub message: String,
    /// Machine-readable error code.
    pub code: String,
    /// Optional backtrace or remote error detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl From<HandlerError> for TaskError {
    fn from(err: HandlerError) -> Self {
        Self {
            message: err.message,
            code: err.code,
            trace: err.trace,
        }
    }
}

/// Final outcome of a task: a success flag plus data or a structured error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Whether the last attempt succeeded.
    pub success: bool,
    /// Handler result payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Last error on failure, preserved verbatim for diagnosis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl TaskOutcome {
    /// Successful outcome carrying the handler's result.
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed outcome carrying the structured error.
    pub fn failure(error: impl Into<TaskError>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// A state transition request, applied atomically per record by the store.
#[derive(Debug, Clone)]
pub enum TransitionOp {
    /// Worker picked the task up. Increments `attempts`.
    Start {
        /// Identity of the worker taking the task.
        worker_id: String,
    },
    /// Handler finished successfully.
    Complete {
        /// Handler result payload.
        data: serde_json::Value,
    },
    /// Handler failed. Schedules a retry or terminates, depending on attempts.
    Fail {
        /// The failure to record.
        error: TaskError,
        /// Backoff policy used to schedule the next attempt.
        backoff: RetryPolicy,
    },
    /// Caller cancelled a pending task.
    Cancel,
}

impl TransitionOp {
    /// Short name for error messages and logs.
    pub fn name(&self) -> &'static str {
        match self {
            TransitionOp::Start { .. } => "start",
            TransitionOp::Complete { .. } => "complete",
            TransitionOp::Fail { .. } => "fail",
            TransitionOp::Cancel => "cancel",
        }
    }
}

/// Default priority for tasks enqueued without an explicit one.
pub const DEFAULT_PRIORITY: u8 = 5;
/// Default attempt budget.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Durable record of one unit of queued work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Server-generated identity, immutable.
    pub id: TaskId,
    /// Typed payload; its tag determines the lane and the handler.
    pub payload: TaskPayload,
    /// Principal that enqueued the task. Scopes listing and cancellation.
    pub owner: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Dequeue priority, 1-10, higher first.
    pub priority: u8,
    /// Attempts consumed so far. Incremented once per dequeue.
    pub attempts: u32,
    /// Attempt budget.
    pub max_attempts: u32,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the current (or last) attempt started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Earliest time a scheduled retry may be dequeued. Unset otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Last worker to hold the task. Kept as an audit trail, never cleared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// Result of the last attempt, once one finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TaskOutcome>,
    /// Operator-facing labels.
    #[serde(default)]
    pub metadata: TaskMetadata,
}

impl TaskRecord {
    /// Build a fresh pending record. Used by the queue service on enqueue.
    pub fn new(
        payload: TaskPayload,
        owner: impl Into<String>,
        priority: u8,
        max_attempts: u32,
        metadata: TaskMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            owner: owner.into(),
            status: TaskStatus::Pending,
            priority,
            attempts: 0,
            max_attempts,
            created_at: now,
            started_at: None,
            completed_at: None,
            next_attempt_at: None,
            worker_id: None,
            outcome: None,
            metadata,
        }
    }

    /// The lane this record belongs to.
    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }

    /// Whether a failed attempt still has retry budget.
    pub fn is_retryable(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Wall-clock duration of the last attempt, if it finished.
    pub fn duration(&self) -> Option<ChronoDuration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Apply one state transition, enforcing the lifecycle edges.
    ///
    /// Any transition not on an allowed edge fails with
    /// [`QueueError::InvalidTransition`] and leaves the record untouched.
    /// A `Start` on a pending task whose retry backoff has not elapsed fails
    /// with [`QueueError::NotYetDue`].
    pub fn apply(&mut self, op: TransitionOp, now: DateTime<Utc>) -> QueueResult<()> {
        match op {
            TransitionOp::Start { worker_id } => {
                if self.status != TaskStatus::Pending {
                    return Err(self.invalid("start"));
                }
                if let Some(due) = self.next_attempt_at
                    && due > now
                {
                    return Err(QueueError::NotYetDue { until: due });
                }
                self.status = TaskStatus::Processing;
                self.started_at = Some(now);
                self.next_attempt_at = None;
                self.worker_id = Some(worker_id);
                self.attempts += 1;
                Ok(())
            }
            TransitionOp::Complete { data } => {
                if self.status != TaskStatus::Processing {
                    return Err(self.invalid("complete"));
                }
                self.status = TaskStatus::Completed;
                self.completed_at = Some(now);
                self.outcome = Some(TaskOutcome::success(data));
                Ok(())
            }
            TransitionOp::Fail { error, backoff } => {
                if self.status != TaskStatus::Processing {
                    return Err(self.invalid("fail"));
                }
                self.outcome = Some(TaskOutcome::failure(error));
                if self.is_retryable() {
                    self.status = TaskStatus::Pending;
                    self.completed_at = None;
                    self.next_attempt_at = Some(now + backoff.delay(self.attempts));
                } else {
                    self.status = TaskStatus::Failed;
                    self.completed_at = Some(now);
                }
                Ok(())
            }
            TransitionOp::Cancel => {
                if self.status != TaskStatus::Pending {
                    return Err(self.invalid("cancel"));
                }
                self.status = TaskStatus::Cancelled;
                self.completed_at = Some(now);
                Ok(())
            }
        }
    }

    fn invalid(&self, op: &'static str) -> QueueError {
        QueueError::InvalidTransition {
            from: self.status,
            op,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> TaskRecord {
        TaskRecord::new(
            TaskPayload::MarketStockUpdate(MarketStockPayload {
                cabinet_id: "cab-1".into(),
            }),
            "user-1",
            DEFAULT_PRIORITY,
            DEFAULT_MAX_ATTEMPTS,
            TaskMetadata::default(),
            Utc::now(),
        )
    }

    #[test]
    fn start_sets_processing_fields() {
        let mut task = record();
        let now = Utc::now();
        task.apply(
            TransitionOp::Start {
                worker_id: "w-1".into(),
            },
            now,
        )
        .unwrap();

        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.started_at, Some(now));
        assert_eq!(task.worker_id.as_deref(), Some("w-1"));
        assert_eq!(task.attempts, 1);
        assert!(task.next_attempt_at.is_none());
    }

    #[test]
    fn start_rejects_future_retry() {
        let mut task = record();
        task.next_attempt_at = Some(Utc::now() + ChronoDuration::seconds(30));

        let err = task
            .apply(
                TransitionOp::Start {
                    worker_id: "w-1".into(),
                },
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, QueueError::NotYetDue { .. }));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 0);
    }

    #[test]
    fn fail_with_budget_schedules_retry() {
        let mut task = record();
        let now = Utc::now();
        task.apply(
            TransitionOp::Start {
                worker_id: "w-1".into(),
            },
            now,
        )
        .unwrap();
        task.apply(
            TransitionOp::Fail {
                error: TaskError {
                    message: "boom".into(),
                    code: "HANDLER_ERROR".into(),
                    trace: None,
                },
                backoff: RetryPolicy::default(),
            },
            now,
        )
        .unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 1);
        assert!(task.completed_at.is_none());
        // attempts = 1 after the dequeue, so the delay is base * 2^1.
        assert_eq!(task.next_attempt_at, Some(now + ChronoDuration::seconds(2)));
        assert!(!task.outcome.as_ref().unwrap().success);
    }

    #[test]
    fn fail_without_budget_is_terminal() {
        let mut task = record();
        task.max_attempts = 1;
        let now = Utc::now();
        task.apply(
            TransitionOp::Start {
                worker_id: "w-1".into(),
            },
            now,
        )
        .unwrap();
        task.apply(
            TransitionOp::Fail {
                error: TaskError {
                    message: "boom".into(),
                    code: "HANDLER_ERROR".into(),
                    trace: None,
                },
                backoff: RetryPolicy::default(),
            },
            now,
        )
        .unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.next_attempt_at.is_none());
        assert!(task.completed_at.is_some());
        assert_eq!(task.outcome.unwrap().error.unwrap().message, "boom");
    }

    #[test]
    fn cancel_only_from_pending() {
        let mut task = record();
        task.apply(TransitionOp::Cancel, Utc::now()).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.completed_at.is_some());

        let mut running = record();
        running
            .apply(
                TransitionOp::Start {
                    worker_id: "w-1".into(),
                },
                Utc::now(),
            )
            .unwrap();
        let err = running.apply(TransitionOp::Cancel, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            QueueError::InvalidTransition {
                from: TaskStatus::Processing,
                op: "cancel"
            }
        ));
        assert_eq!(running.status, TaskStatus::Processing);
    }

    #[test]
    fn complete_stores_outcome() {
        let mut task = record();
        let now = Utc::now();
        task.apply(
            TransitionOp::Start {
                worker_id: "w-1".into(),
            },
            now,
        )
        .unwrap();
        task.apply(
            TransitionOp::Complete {
                data: json!({"updated": 10}),
            },
            now,
        )
        .unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        let outcome = task.outcome.clone().unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.data, Some(json!({"updated": 10})));
        assert_eq!(task.duration(), Some(ChronoDuration::zero()));
    }

    #[test]
    fn payload_tag_round_trip() {
        let payload = TaskPayload::ErpPriceUpdate(IntegrationPayload {
            integration_id: "int-9".into(),
        });
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["type"], "ERP_PRICE_UPDATE");
        assert_eq!(value["data"]["integration_id"], "int-9");

        let back: TaskPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn unknown_payload_type_is_rejected() {
        let raw = json!({"type": "REINDEX_EVERYTHING", "data": {}});
        assert!(serde_json::from_value::<TaskPayload>(raw).is_err());
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let raw = json!({"type": "MARKET_PRICE_UPDATE", "data": {"limit": 50}});
        assert!(serde_json::from_value::<TaskPayload>(raw).is_err());
    }

    #[test]
    fn market_price_payload_defaults() {
        let raw = json!({"type": "MARKET_PRICE_UPDATE", "data": {"cabinet_id": "cab-2"}});
        let payload: TaskPayload = serde_json::from_value(raw).unwrap();
        match payload {
            TaskPayload::MarketPriceUpdate(p) => {
                assert_eq!(p.limit, 100);
                assert_eq!(p.offset, 0);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn kind_from_str() {
        assert_eq!(
            "PRODUCT_SYNC".parse::<TaskKind>().unwrap(),
            TaskKind::ProductSync
        );
        assert!("NOT_A_KIND".parse::<TaskKind>().is_err());
    }
}
