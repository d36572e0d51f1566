//! Persistent execution store
//!
//! The tracker needs string records with a TTL plus sorted sets with
//! score-range and rank-range operations. Sorted-set semantics follow Redis:
//! members are ordered by score then by member, and rank ranges accept
//! negative indices counted from the end.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::errors::StoreError;

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Insert or re-score a member.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;

    /// Members with `min <= score <= max`, ascending.
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64)
        -> Result<Vec<String>, StoreError>;

    async fn zrem_range_by_rank(&self, key: &str, start: isize, stop: isize)
        -> Result<usize, StoreError>;

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64)
        -> Result<usize, StoreError>;

    async fn zcard(&self, key: &str) -> Result<usize, StoreError>;
}

/// Resolve a Redis-style inclusive rank range against `len` members.
fn resolve_rank_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len_i = len as isize;
    let norm = |i: isize| if i < 0 { len_i + i } else { i };
    let start = norm(start).max(0);
    let stop = norm(stop).min(len_i - 1);
    if start > stop || start >= len_i {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Process-local store. TTLs are evaluated against the injected clock.
pub struct InMemoryExecutionStore {
    values: DashMap<String, StoredValue>,
    sorted_sets: DashMap<String, Vec<(f64, String)>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self {
            values: DashMap::new(),
            sorted_sets: DashMap::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Number of live (non-expired) records.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.values.iter().filter(|v| v.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::Backend(format!("invalid ttl: {}", e)))?;
        self.values.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: self.clock.now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let expired = match self.values.get(key) {
            None => return Ok(None),
            Some(stored) if stored.expires_at > now => return Ok(Some(stored.value.clone())),
            Some(_) => true,
        };
        if expired {
            self.values.remove(key);
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.values.remove(key).is_some())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut set = self.sorted_sets.entry(key.to_string()).or_default();
        set.retain(|(_, m)| m != member);
        let pos = set
            .iter()
            .position(|(s, m)| (*s, m.as_str()) > (score, member))
            .unwrap_or(set.len());
        set.insert(pos, (score, member.to_string()));
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .sorted_sets
            .get(key)
            .map(|set| {
                set.iter()
                    .filter(|(s, _)| *s >= min && *s <= max)
                    .map(|(_, m)| m.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn zrem_range_by_rank(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<usize, StoreError> {
        let Some(mut set) = self.sorted_sets.get_mut(key) else {
            return Ok(0);
        };
        match resolve_rank_range(set.len(), start, stop) {
            Some((from, to)) => {
                set.drain(from..=to);
                Ok(to - from + 1)
            }
            None => Ok(0),
        }
    }

    async fn zrem_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<usize, StoreError> {
        let Some(mut set) = self.sorted_sets.get_mut(key) else {
            return Ok(0);
        };
        let before = set.len();
        set.retain(|(s, _)| !(*s >= min && *s <= max));
        Ok(before - set.len())
    }

    async fn zcard(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.sorted_sets.get(key).map(|s| s.len()).unwrap_or(0))
    }
}

#[cfg(feature = "redis-store")]
pub use redis_backend::RedisExecutionStore;

#[cfg(feature = "redis-store")]
mod redis_backend {
    use super::*;
    use redis::aio::ConnectionManager;
    use redis::AsyncCommands;

    /// Redis-backed store using one multiplexed, auto-reconnecting connection.
    #[derive(Clone)]
    pub struct RedisExecutionStore {
        conn: ConnectionManager,
    }

    fn score_arg(score: f64) -> String {
        if score == f64::INFINITY {
            "+inf".to_string()
        } else if score == f64::NEG_INFINITY {
            "-inf".to_string()
        } else {
            score.to_string()
        }
    }

    impl RedisExecutionStore {
        pub async fn connect(url: &str) -> Result<Self, StoreError> {
            let client = redis::Client::open(url)?;
            let conn = ConnectionManager::new(client).await?;
            Ok(Self { conn })
        }
    }

    #[async_trait]
    impl ExecutionStore for RedisExecutionStore {
        async fn set_with_ttl(
            &self,
            key: &str,
            value: &str,
            ttl: Duration,
        ) -> Result<(), StoreError> {
            let mut conn = self.conn.clone();
            let seconds = ttl.as_secs().max(1) as usize;
            conn.set_ex::<_, _, ()>(key, value, seconds).await?;
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            let mut conn = self.conn.clone();
            Ok(conn.get(key).await?)
        }

        async fn delete(&self, key: &str) -> Result<bool, StoreError> {
            let mut conn = self.conn.clone();
            let removed: usize = conn.del(key).await?;
            Ok(removed > 0)
        }

        async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
            let mut conn = self.conn.clone();
            conn.zadd::<_, _, _, ()>(key, member, score).await?;
            Ok(())
        }

        async fn zrange_by_score(
            &self,
            key: &str,
            min: f64,
            max: f64,
        ) -> Result<Vec<String>, StoreError> {
            let mut conn = self.conn.clone();
            Ok(conn
                .zrangebyscore(key, score_arg(min), score_arg(max))
                .await?)
        }

        async fn zrem_range_by_rank(
            &self,
            key: &str,
            start: isize,
            stop: isize,
        ) -> Result<usize, StoreError> {
            let mut conn = self.conn.clone();
            Ok(conn.zremrangebyrank(key, start, stop).await?)
        }

        async fn zrem_range_by_score(
            &self,
            key: &str,
            min: f64,
            max: f64,
        ) -> Result<usize, StoreError> {
            let mut conn = self.conn.clone();
            Ok(conn
                .zrembyscore(key, score_arg(min), score_arg(max))
                .await?)
        }

        async fn zcard(&self, key: &str) -> Result<usize, StoreError> {
            let mut conn = self.conn.clone();
            Ok(conn.zcard(key).await?)
        }
    }
}
