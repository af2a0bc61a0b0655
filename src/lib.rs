//! # laneq
//!
//! A durable, retryable, priority-ordered task queue with a polling worker
//! pool.
//!
//! Tasks are typed records with an owner, a priority band (1-10) and a retry
//! budget. A [`service::QueueService`] coordinates two injected backends: a
//! [`store::TaskStore`] holding full records as the source of truth, and a
//! [`index::PriorityIndex`] holding per-kind lanes of lightweight ordering
//! entries. Workers poll their lanes, execute handlers through a
//! [`dispatch::Dispatcher`], and report outcomes back through the service,
//! which schedules exponential-backoff retries until the attempt budget runs
//! out.
//!
//! In-memory backends cover tests and single-process deployments; the
//! `redis-index` feature adds a sorted-set lane implementation shared across
//! processes.
//!
//! ## Quick start
//!
//! ```no_run
//! use laneq::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = Arc::new(QueueService::new(
//!         Arc::new(InMemoryStore::new()),
//!         Arc::new(InMemoryIndex::new()),
//!         QueueConfig::default(),
//!     ));
//!
//!     let dispatcher = Dispatcher::builder()
//!         .register(TaskKind::ProductSync, |_payload: TaskPayload| async move {
//!             // ... sync the integration ...
//!             Ok(json!({ "synced": true }))
//!         })
//!         .build(&[TaskKind::ProductSync])?;
//!
//!     let pool = WorkerPool::start(
//!         service.clone(),
//!         dispatcher,
//!         &WorkerConfig::default().with_num_workers(2),
//!     );
//!
//!     service
//!         .enqueue(
//!             TaskPayload::ProductSync(IntegrationPayload {
//!                 integration_id: "int-1".into(),
//!             }),
//!             "user-1",
//!             EnqueueOptions::default(),
//!         )
//!         .await?;
//!
//!     pool.wait_for_shutdown().await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod admin;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod index;
pub mod service;
pub mod store;
pub mod task;
pub mod worker;

/// Everything most integrations need.
pub mod prelude {
    pub use crate::admin::{AdminApi, CleanupRequest, EnqueueRequest, TaskQuery};
    pub use crate::config::{LoggingConfig, QueueConfig, RetryPolicy, WorkerConfig};
    pub use crate::dispatch::{Dispatcher, TaskHandler};
    pub use crate::error::{HandlerError, QueueError, QueueResult};
    pub use crate::index::{InMemoryIndex, IndexEntry, PriorityIndex};
    #[cfg(feature = "redis-index")]
    pub use crate::index::RedisIndex;
    pub use crate::service::{EnqueueOptions, QueueService, QueueStatsReport};
    pub use crate::store::{InMemoryStore, TaskFilter, TaskStore};
    pub use crate::task::{
        IntegrationPayload, MarketPricePayload, MarketReportPayload, MarketStockPayload,
        TaskKind, TaskPayload, TaskRecord, TaskStatus,
    };
    pub use crate::worker::{Worker, WorkerPool};
}
