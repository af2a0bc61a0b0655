//! Polling workers and the pool that runs them.
//!
//! Each worker owns one polling loop: sleep, sweep its kinds in a fixed
//! order, execute at most one task, report the outcome, repeat. Horizontal
//! scale comes from running more workers, in-process via [`WorkerPool`] or
//! as extra processes sharing a redis-backed lane.

use crate::config::WorkerConfig;
use crate::dispatch::Dispatcher;
use crate::error::{HandlerError, QueueError, QueueResult};
use crate::service::QueueService;
use crate::task::{TaskError, TaskId, TaskKind, TaskRecord};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Point-in-time view of one worker, for operator surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub running: bool,
    pub current_task: Option<TaskId>,
    pub processed: u64,
    pub failed: u64,
    pub uptime_secs: Option<u64>,
}

/// A single polling worker.
pub struct Worker {
    id: String,
    service: Arc<QueueService>,
    dispatcher: Dispatcher,
    kinds: Vec<TaskKind>,
    poll_interval: Duration,
    running: AtomicBool,
    current: Mutex<Option<TaskId>>,
    started_at: Mutex<Option<std::time::Instant>>,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl Worker {
    /// Build a worker polling the given kinds.
    ///
    /// The id embeds the process id and a random suffix so workers are
    /// distinguishable across a fleet sharing one queue.
    pub fn new(
        service: Arc<QueueService>,
        dispatcher: Dispatcher,
        kinds: Vec<TaskKind>,
        config: &WorkerConfig,
    ) -> Arc<Self> {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let id = format!(
            "{}-{}-{}",
            config.id_prefix,
            std::process::id(),
            &suffix[..8]
        );
        Arc::new(Self {
            id,
            service,
            dispatcher,
            kinds,
            poll_interval: config.poll_interval(),
            running: AtomicBool::new(false),
            current: Mutex::new(None),
            started_at: Mutex::new(None),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run the polling loop until [`Worker::shutdown`] is called.
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        *self.started_at.lock().await = Some(std::time::Instant::now());
        tracing::info!(worker_id = %self.id, kinds = ?self.kinds, "worker started");

        while self.running.load(Ordering::SeqCst) {
            match self.poll_once().await {
                Ok(true) => {
                    // A task was handled; check the lanes again right away.
                    continue;
                }
                Ok(false) => {}
                Err(error) => {
                    tracing::error!(worker_id = %self.id, %error, "poll cycle failed");
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        tracing::info!(worker_id = %self.id, "worker stopped");
    }

    /// Sweep the kinds once; `Ok(true)` if a task was executed.
    async fn poll_once(&self) -> QueueResult<bool> {
        for kind in &self.kinds {
            if let Some(record) = self.service.dequeue(*kind, &self.id).await? {
                self.execute(record).await;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn execute(&self, record: TaskRecord) {
        let task_id = record.id.clone();
        *self.current.lock().await = Some(task_id.clone());

        let outcome = self.dispatcher.dispatch(&record).await;

        let report = if outcome.success {
            self.processed.fetch_add(1, Ordering::Relaxed);
            self.service
                .complete(&task_id, outcome.data.unwrap_or(serde_json::Value::Null))
                .await
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
            let error = outcome
                .error
                .unwrap_or_else(|| TaskError::from(HandlerError::new("handler reported no error")));
            self.service.fail(&task_id, error).await
        };

        match report {
            Ok(_) => {}
            // Shutdown may have already failed this task out from under us.
            Err(QueueError::InvalidTransition { .. }) | Err(QueueError::NotFound { .. }) => {
                tracing::debug!(worker_id = %self.id, %task_id, "outcome report lost a race");
            }
            Err(error) => {
                tracing::error!(worker_id = %self.id, %task_id, %error, "failed to report outcome");
            }
        }

        *self.current.lock().await = None;
    }

    /// Stop the polling loop and fail any in-flight task so it is retried.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);

        let in_flight = self.current.lock().await.take();
        if let Some(task_id) = in_flight {
            let error = TaskError::from(HandlerError::with_code(
                format!("worker {} stopped during execution", self.id),
                "WORKER_STOPPED",
            ));
            match self.service.fail(&task_id, error).await {
                Ok(_) => {
                    tracing::warn!(worker_id = %self.id, %task_id, "failed in-flight task on shutdown")
                }
                Err(QueueError::InvalidTransition { .. }) | Err(QueueError::NotFound { .. }) => {}
                Err(error) => {
                    tracing::error!(worker_id = %self.id, %task_id, %error, "could not fail in-flight task")
                }
            }
        }
    }

    pub async fn status(&self) -> WorkerStatus {
        WorkerStatus {
            worker_id: self.id.clone(),
            running: self.running.load(Ordering::SeqCst),
            current_task: self.current.lock().await.clone(),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            uptime_secs: self
                .started_at
                .lock()
                .await
                .map(|since| since.elapsed().as_secs()),
        }
    }
}

/// A set of workers running on the tokio runtime.
pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
    handles: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Spawn `config.num_workers` workers polling the configured kinds, or
    /// every kind the dispatcher routes when none are configured.
    pub fn start(
        service: Arc<QueueService>,
        dispatcher: Dispatcher,
        config: &WorkerConfig,
    ) -> Self {
        let kinds = config
            .kinds
            .clone()
            .unwrap_or_else(|| dispatcher.kinds());
        let mut workers = Vec::with_capacity(config.num_workers);
        let mut handles = Vec::with_capacity(config.num_workers);
        for _ in 0..config.num_workers {
            let worker = Worker::new(service.clone(), dispatcher.clone(), kinds.clone(), config);
            handles.push(tokio::spawn(worker.clone().run()));
            workers.push(worker);
        }
        tracing::info!(workers = workers.len(), ?kinds, "worker pool started");
        Self {
            workers,
            handles,
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        }
    }

    /// Status of every worker in the pool.
    pub async fn statuses(&self) -> Vec<WorkerStatus> {
        let mut out = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            out.push(worker.status().await);
        }
        out
    }

    /// Stop all workers and wait for their loops to exit, up to the
    /// configured timeout per pool.
    pub async fn shutdown(self) {
        for worker in &self.workers {
            worker.shutdown().await;
        }
        let drain = async {
            for handle in self.handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(self.shutdown_timeout, drain).await.is_err() {
            tracing::warn!("worker pool shutdown timed out, abandoning loops");
        } else {
            tracing::info!("worker pool stopped");
        }
    }

    /// Block until ctrl-c, then shut the pool down.
    pub async fn wait_for_shutdown(self) -> std::io::Result<()> {
        tokio::signal::ctrl_c().await?;
        tracing::info!("shutdown signal received");
        self.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QueueConfig, RetryPolicy};
    use crate::index::InMemoryIndex;
    use crate::service::EnqueueOptions;
    use crate::store::InMemoryStore;
    use crate::task::{MarketStockPayload, TaskPayload, TaskStatus};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn fast_config(workers: usize) -> WorkerConfig {
        WorkerConfig::default()
            .with_poll_interval_ms(10)
            .with_num_workers(workers)
    }

    fn payload(cabinet: &str) -> TaskPayload {
        TaskPayload::MarketStockUpdate(MarketStockPayload {
            cabinet_id: cabinet.into(),
        })
    }

    fn service() -> Arc<QueueService> {
        Arc::new(QueueService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryIndex::new()),
            QueueConfig::default().with_retry(RetryPolicy::immediate()),
        ))
    }

    async fn wait_for_status(
        svc: &QueueService,
        id: &TaskId,
        status: TaskStatus,
    ) -> TaskRecord {
        for _ in 0..200 {
            let record = svc.get(id).await.unwrap().unwrap();
            if record.status == status {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} never reached {status}");
    }

    #[tokio::test]
    async fn worker_processes_an_enqueued_task() {
        let svc = service();
        let dispatcher = Dispatcher::builder()
            .register(TaskKind::MarketStockUpdate, |_: TaskPayload| async {
                Ok(json!({ "updated": 3 }))
            })
            .build(&[TaskKind::MarketStockUpdate])
            .unwrap();

        let worker = Worker::new(
            svc.clone(),
            dispatcher,
            vec![TaskKind::MarketStockUpdate],
            &fast_config(1),
        );
        let handle = tokio::spawn(worker.clone().run());

        let id = svc
            .enqueue(payload("cab-1"), "user-1", EnqueueOptions::default())
            .await
            .unwrap();
        let record = wait_for_status(&svc, &id, TaskStatus::Completed).await;
        assert_eq!(record.outcome.unwrap().data.unwrap()["updated"], 3);
        assert_eq!(record.worker_id.as_deref(), Some(worker.id()));

        worker.shutdown().await;
        handle.await.unwrap();
        let status = worker.status().await;
        assert_eq!(status.processed, 1);
        assert_eq!(status.failed, 0);
        assert!(!status.running);
    }

    #[tokio::test]
    async fn failing_task_is_retried_until_exhausted() {
        let svc = service();
        let attempts_seen = Arc::new(AtomicUsize::new(0));
        let counter = attempts_seen.clone();
        let dispatcher = Dispatcher::builder()
            .register(TaskKind::MarketStockUpdate, move |_: TaskPayload| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(HandlerError::with_code("still broken", "UPSTREAM"))
                }
            })
            .build(&[TaskKind::MarketStockUpdate])
            .unwrap();

        let worker = Worker::new(
            svc.clone(),
            dispatcher,
            vec![TaskKind::MarketStockUpdate],
            &fast_config(1),
        );
        let handle = tokio::spawn(worker.clone().run());

        let id = svc
            .enqueue(payload("cab-1"), "user-1", EnqueueOptions::default())
            .await
            .unwrap();
        let record = wait_for_status(&svc, &id, TaskStatus::Failed).await;
        assert_eq!(record.attempts, 3);
        assert_eq!(attempts_seen.load(Ordering::SeqCst), 3);
        assert_eq!(record.outcome.unwrap().error.unwrap().code, "UPSTREAM");

        worker.shutdown().await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_fails_the_in_flight_task_for_retry() {
        let svc = service();
        let dispatcher = Dispatcher::builder()
            .register(TaskKind::MarketStockUpdate, |_: TaskPayload| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json!(null))
            })
            .build(&[TaskKind::MarketStockUpdate])
            .unwrap();

        let worker = Worker::new(
            svc.clone(),
            dispatcher,
            vec![TaskKind::MarketStockUpdate],
            &fast_config(1),
        );
        let handle = tokio::spawn(worker.clone().run());

        let id = svc
            .enqueue(payload("cab-1"), "user-1", EnqueueOptions::default())
            .await
            .unwrap();
        wait_for_status(&svc, &id, TaskStatus::Processing).await;

        worker.shutdown().await;
        // The loop is pinned inside the stuck handler; abandon it like the
        // pool's shutdown timeout would.
        handle.abort();

        let record = svc.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.attempts, 1);
        assert_eq!(record.outcome.unwrap().error.unwrap().code, "WORKER_STOPPED");
    }

    #[tokio::test]
    async fn worker_sweeps_kinds_in_order() {
        let svc = service();
        let dispatcher = Dispatcher::builder()
            .register(TaskKind::MarketPriceUpdate, |_: TaskPayload| async {
                Ok(json!(null))
            })
            .register(TaskKind::MarketStockUpdate, |_: TaskPayload| async {
                Ok(json!(null))
            })
            .build(&[])
            .unwrap();

        let worker = Worker::new(
            svc.clone(),
            dispatcher,
            vec![TaskKind::MarketPriceUpdate, TaskKind::MarketStockUpdate],
            &fast_config(1),
        );

        let stock = svc
            .enqueue(payload("cab-1"), "user-1", EnqueueOptions::default())
            .await
            .unwrap();
        let price = svc
            .enqueue(
                TaskPayload::MarketPriceUpdate(crate::task::MarketPricePayload {
                    cabinet_id: "cab-1".into(),
                    limit: 100,
                    offset: 0,
                }),
                "user-1",
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        // One sweep takes the price task: its lane is checked first.
        assert!(worker.poll_once().await.unwrap());
        assert_eq!(
            svc.get(&price).await.unwrap().unwrap().status,
            TaskStatus::Completed
        );
        assert_eq!(
            svc.get(&stock).await.unwrap().unwrap().status,
            TaskStatus::Pending
        );

        assert!(worker.poll_once().await.unwrap());
        assert_eq!(
            svc.get(&stock).await.unwrap().unwrap().status,
            TaskStatus::Completed
        );
        assert!(!worker.poll_once().await.unwrap());
    }

    #[tokio::test]
    async fn pool_spawns_distinct_workers_and_shuts_down() {
        let svc = service();
        let dispatcher = Dispatcher::builder()
            .register(TaskKind::MarketStockUpdate, |_: TaskPayload| async {
                Ok(json!(null))
            })
            .build(&[TaskKind::MarketStockUpdate])
            .unwrap();

        let pool = WorkerPool::start(svc.clone(), dispatcher, &fast_config(3));
        let statuses = pool.statuses().await;
        assert_eq!(statuses.len(), 3);
        let mut ids: Vec<_> = statuses.iter().map(|s| s.worker_id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);

        let id = svc
            .enqueue(payload("cab-1"), "user-1", EnqueueOptions::default())
            .await
            .unwrap();
        wait_for_status(&svc, &id, TaskStatus::Completed).await;

        pool.shutdown().await;
    }
}
