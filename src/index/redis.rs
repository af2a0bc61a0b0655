//! Redis priority index: one sorted set per lane.
//!
//! `ZADD` with the task priority as score, `ZPOPMAX` for dequeue, `ZCARD`
//! for depth. Because
//! `ZPOPMAX` breaks score ties by reverse-lexicographic member order, the
//! member embeds an inverted creation timestamp so that within one priority
//! band the oldest entry sorts highest and pops first.

use super::{IndexEntry, PriorityIndex};
use crate::error::{QueueError, QueueResult};
use crate::task::TaskKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

/// Largest encodable millisecond timestamp (14 digits, good until year 5138).
const STAMP_CEILING: i64 = 99_999_999_999_999;

/// Redis-backed [`PriorityIndex`].
///
/// Lanes are shared across every worker process pointed at the same redis
/// instance and key prefix.
#[derive(Clone)]
pub struct RedisIndex {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisIndex {
    /// Connect to redis and return an index using the given key prefix.
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> QueueResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        let index = Self {
            conn,
            key_prefix: key_prefix.into(),
        };
        tracing::info!(url, "connected to redis priority index");
        Ok(index)
    }

    /// Build an index over an existing connection manager.
    pub fn with_connection(conn: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
        }
    }

    fn lane_key(&self, kind: TaskKind) -> String {
        format!("{}:lane:{}", self.key_prefix, kind.as_str())
    }

    /// Encode an entry as a sorted-set member. The inverted-timestamp prefix
    /// makes older entries sort lexicographically higher.
    fn encode_member(entry: &IndexEntry) -> String {
        let inverted = STAMP_CEILING - entry.created_at.timestamp_millis();
        format!("{inverted:014}:{}", entry.task_id)
    }

    /// Decode a member back into an entry, given the popped score.
    fn decode_member(member: &str, score: f64) -> QueueResult<IndexEntry> {
        let (stamp, task_id) = member.split_once(':').ok_or_else(|| {
            QueueError::IndexUnavailable {
                message: format!("malformed lane member '{member}'"),
                source: None,
            }
        })?;
        let inverted: i64 = stamp.parse().map_err(|_| QueueError::IndexUnavailable {
            message: format!("malformed lane member stamp '{stamp}'"),
            source: None,
        })?;
        let created_at = DateTime::<Utc>::from_timestamp_millis(STAMP_CEILING - inverted)
            .unwrap_or_else(Utc::now);
        Ok(IndexEntry {
            task_id: task_id.to_string(),
            priority: score as u8,
            created_at,
        })
    }
}

#[async_trait]
impl PriorityIndex for RedisIndex {
    async fn insert(&self, kind: TaskKind, entry: IndexEntry) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let member = Self::encode_member(&entry);
        let _: () = conn
            .zadd(self.lane_key(kind), member, entry.priority as f64)
            .await?;
        Ok(())
    }

    async fn pop(&self, kind: TaskKind) -> QueueResult<Option<IndexEntry>> {
        let mut conn = self.conn.clone();
        let popped: Vec<(String, f64)> = conn.zpopmax(self.lane_key(kind), 1).await?;
        match popped.first() {
            Some((member, score)) => Ok(Some(Self::decode_member(member, *score)?)),
            None => Ok(None),
        }
    }

    async fn depth(&self, kind: TaskKind) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        let depth: u64 = conn.zcard(self.lane_key(kind)).await?;
        Ok(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn member_round_trip() {
        let created = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_123).unwrap();
        let entry = IndexEntry::new("task-42", 7, created);
        let member = RedisIndex::encode_member(&entry);

        let decoded = RedisIndex::decode_member(&member, 7.0).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn older_entries_sort_lexicographically_higher() {
        let now = Utc::now();
        let older = RedisIndex::encode_member(&IndexEntry::new("a", 5, now));
        let newer =
            RedisIndex::encode_member(&IndexEntry::new("a", 5, now + ChronoDuration::seconds(1)));
        // ZPOPMAX ties pop the lexicographically greatest member first.
        assert!(older > newer);
    }

    #[test]
    fn malformed_member_is_rejected() {
        assert!(RedisIndex::decode_member("no-separator", 5.0).is_err());
        assert!(RedisIndex::decode_member("notanumber:task-1", 5.0).is_err());
    }
}
