//! Task dispatcher: routes a dequeued record to its registered handler.
//!
//! Handlers are registered per [`TaskKind`] at startup; the builder refuses
//! to produce a dispatcher with gaps in its routing table, so a worker can
//! never dequeue a task it has no handler for.

use crate::error::{HandlerError, QueueError, QueueResult};
use crate::task::{TaskKind, TaskOutcome, TaskPayload, TaskRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// A unit of task execution logic.
///
/// Implementations receive the typed payload and return either a JSON result
/// document or a [`HandlerError`]. They should be idempotent where possible:
/// a worker crash after execution but before `complete` leads to the same
/// payload being handled again on retry.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: TaskPayload) -> Result<serde_json::Value, HandlerError>;
}

#[async_trait]
impl<F, Fut> TaskHandler for F
where
    F: Fn(TaskPayload) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<serde_json::Value, HandlerError>> + Send,
{
    async fn handle(&self, payload: TaskPayload) -> Result<serde_json::Value, HandlerError> {
        self(payload).await
    }
}

/// Builder for a [`Dispatcher`] routing table.
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a kind, replacing any previous one.
    pub fn register(mut self, kind: TaskKind, handler: impl TaskHandler + 'static) -> Self {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    /// Finish the table, requiring a handler for each of `required_kinds`.
    pub fn build(self, required_kinds: &[TaskKind]) -> QueueResult<Dispatcher> {
        let missing: Vec<&str> = required_kinds
            .iter()
            .filter(|kind| !self.handlers.contains_key(kind))
            .map(|kind| kind.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(QueueError::config(format!(
                "no handler registered for: {}",
                missing.join(", ")
            )));
        }
        Ok(Dispatcher {
            handlers: Arc::new(self.handlers),
        })
    }
}

/// Immutable routing table from task kind to handler.
#[derive(Clone)]
pub struct Dispatcher {
    handlers: Arc<HashMap<TaskKind, Arc<dyn TaskHandler>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Kinds this dispatcher can execute.
    pub fn kinds(&self) -> Vec<TaskKind> {
        // Fixed vocabulary order, not hash order.
        TaskKind::ALL
            .into_iter()
            .filter(|kind| self.handlers.contains_key(kind))
            .collect()
    }

    /// Execute the record's handler and normalize the result.
    ///
    /// Runs the handler on a separate tokio task so a panic is contained:
    /// it surfaces as a failed outcome with code `PANIC` instead of tearing
    /// down the worker loop.
    pub async fn dispatch(&self, record: &TaskRecord) -> TaskOutcome {
        let kind = record.kind();
        let Some(handler) = self.handlers.get(&kind) else {
            // build() makes this unreachable for a worker's own kinds, but a
            // shared lane can still carry kinds this process never registered.
            return TaskOutcome::failure(HandlerError::with_code(
                format!("no handler for task type {kind}"),
                "NO_HANDLER",
            ));
        };

        let handler = Arc::clone(handler);
        let payload = record.payload.clone();
        let joined = tokio::spawn(async move { handler.handle(payload).await }).await;

        match joined {
            Ok(Ok(data)) => TaskOutcome::success(data),
            Ok(Err(error)) => TaskOutcome::failure(error),
            Err(join_error) => TaskOutcome::failure(HandlerError::with_code(
                format!("handler panicked: {join_error}"),
                "PANIC",
            )),
        }
    }
}
