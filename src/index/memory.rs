//! In-memory priority index: one binary heap per lane.

use super::{IndexEntry, PriorityIndex};
use crate::error::QueueResult;
use crate::task::TaskKind;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Heap wrapper ordering entries priority-descending, created-at-ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LaneEntry(IndexEntry);

impl Ord for LaneEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.created_at.cmp(&self.0.created_at))
            // id tiebreak keeps the order total and deterministic
            .then_with(|| other.0.task_id.cmp(&self.0.task_id))
    }
}

impl PartialOrd for LaneEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// In-memory [`PriorityIndex`] implementation.
///
/// Per-process only: entries vanish on restart and are not visible to other
/// worker processes. Use the redis backend to share lanes across processes.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    lanes: Arc<Mutex<HashMap<TaskKind, BinaryHeap<LaneEntry>>>>,
}

impl InMemoryIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PriorityIndex for InMemoryIndex {
    async fn insert(&self, kind: TaskKind, entry: IndexEntry) -> QueueResult<()> {
        let mut lanes = self.lanes.lock().await;
        lanes.entry(kind).or_default().push(LaneEntry(entry));
        Ok(())
    }

    async fn pop(&self, kind: TaskKind) -> QueueResult<Option<IndexEntry>> {
        let mut lanes = self.lanes.lock().await;
        Ok(lanes
            .get_mut(&kind)
            .and_then(|lane| lane.pop())
            .map(|entry| entry.0))
    }

    async fn depth(&self, kind: TaskKind) -> QueueResult<u64> {
        let lanes = self.lanes.lock().await;
        Ok(lanes.get(&kind).map_or(0, |lane| lane.len() as u64))
    }
}
