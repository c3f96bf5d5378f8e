//! 有序集合（member -> score）存储。
//!
//! `LimitCookiePool` 的跨线程/跨进程协调全部依赖这里的原子操作：
//! 范围查询 + 条件改分（claim）。除此之外没有额外的锁。

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is closed")]
    Closed,
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub trait ScoredSetStore: Send + Sync {
    /// 写入（或覆盖）成员分数。
    fn add(&self, key: &str, members: &[(String, f64)]) -> Result<(), StoreError>;

    /// 分数落在 `(-inf, max]` 的成员，按分数升序。
    fn range_by_score(&self, key: &str, max: f64) -> Result<Vec<String>, StoreError>;

    /// 原子操作：成员当前分数 `<= max` 时改为 `score` 并返回 `true`，否则不改动。
    fn claim(&self, key: &str, member: &str, max: f64, score: f64) -> Result<bool, StoreError>;

    fn remove(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    fn count(&self, key: &str) -> Result<usize, StoreError>;

    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// 进程内实现，适合单进程多线程共享或测试。
#[derive(Debug, Default)]
pub struct MemoryScoredSet {
    sets: Mutex<HashMap<String, HashMap<String, f64>>>,
}

impl MemoryScoredSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 查看成员当前分数。
    pub fn score(&self, key: &str, member: &str) -> Option<f64> {
        let sets = self.sets.lock().unwrap_or_else(|e| e.into_inner());
        sets.get(key).and_then(|set| set.get(member).copied())
    }
}

impl ScoredSetStore for MemoryScoredSet {
    fn add(&self, key: &str, members: &[(String, f64)]) -> Result<(), StoreError> {
        let mut sets = self.sets.lock().unwrap_or_else(|e| e.into_inner());
        let set = sets.entry(key.to_string()).or_default();
        for (member, score) in members {
            set.insert(member.clone(), *score);
        }
        Ok(())
    }

    fn range_by_score(&self, key: &str, max: f64) -> Result<Vec<String>, StoreError> {
        let sets = self.sets.lock().unwrap_or_else(|e| e.into_inner());
        let Some(set) = sets.get(key) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<(&String, f64)> = set
            .iter()
            .filter(|(_, score)| **score <= max)
            .map(|(m, s)| (m, *s))
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        Ok(hits.into_iter().map(|(m, _)| m.clone()).collect())
    }

    fn claim(&self, key: &str, member: &str, max: f64, score: f64) -> Result<bool, StoreError> {
        let mut sets = self.sets.lock().unwrap_or_else(|e| e.into_inner());
        match sets.get_mut(key).and_then(|set| set.get_mut(member)) {
            Some(current) if *current <= max => {
                *current = score;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut sets = self.sets.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sets
            .get_mut(key)
            .map(|set| set.remove(member).is_some())
            .unwrap_or(false))
    }

    fn count(&self, key: &str) -> Result<usize, StoreError> {
        let sets = self.sets.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sets.get(key).map(HashMap::len).unwrap_or(0))
    }
}

#[cfg(feature = "redis")]
pub use redis_store::RedisScoredSet;

#[cfg(feature = "redis")]
mod redis_store {
    use std::sync::Mutex;

    use redis::{Client, Connection, RedisResult};
    use tracing::debug;

    use super::{ScoredSetStore, StoreError};

    // ZSCORE 与 ZADD 在同一个脚本里执行，Redis 保证其原子性。
    const CLAIM_SCRIPT: &str = r#"
local score = redis.call('ZSCORE', KEYS[1], ARGV[1])
if score and tonumber(score) <= tonumber(ARGV[2]) then
  redis.call('ZADD', KEYS[1], ARGV[3], ARGV[1])
  return 1
end
return 0
"#;

    /// Redis 有序集合实现，多个进程共享同一个 key 即可协调。
    pub struct RedisScoredSet {
        conn: Mutex<Option<Connection>>,
        claim: redis::Script,
    }

    impl RedisScoredSet {
        pub fn open(url: &str) -> Result<Self, StoreError> {
            let client = Client::open(url)?;
            let conn = client.get_connection()?;
            debug!("connected to redis store");
            Ok(Self {
                conn: Mutex::new(Some(conn)),
                claim: redis::Script::new(CLAIM_SCRIPT),
            })
        }

        fn with_conn<T>(
            &self,
            f: impl FnOnce(&mut Connection) -> RedisResult<T>,
        ) -> Result<T, StoreError> {
            let mut guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
            let conn = guard.as_mut().ok_or(StoreError::Closed)?;
            Ok(f(conn)?)
        }
    }

    impl ScoredSetStore for RedisScoredSet {
        fn add(&self, key: &str, members: &[(String, f64)]) -> Result<(), StoreError> {
            if members.is_empty() {
                return Ok(());
            }
            self.with_conn(|conn| {
                let mut cmd = redis::cmd("ZADD");
                cmd.arg(key);
                for (member, score) in members {
                    cmd.arg(*score).arg(member);
                }
                cmd.query::<()>(conn)
            })
        }

        fn range_by_score(&self, key: &str, max: f64) -> Result<Vec<String>, StoreError> {
            self.with_conn(|conn| {
                redis::cmd("ZRANGEBYSCORE")
                    .arg(key)
                    .arg("-inf")
                    .arg(max)
                    .query::<Vec<String>>(conn)
            })
        }

        fn claim(&self, key: &str, member: &str, max: f64, score: f64) -> Result<bool, StoreError> {
            let claimed: i64 = self.with_conn(|conn| {
                self.claim
                    .key(key)
                    .arg(member)
                    .arg(max)
                    .arg(score)
                    .invoke::<i64>(conn)
            })?;
            Ok(claimed == 1)
        }

        fn remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
            let removed: i64 =
                self.with_conn(|conn| redis::cmd("ZREM").arg(key).arg(member).query(conn))?;
            Ok(removed > 0)
        }

        fn count(&self, key: &str) -> Result<usize, StoreError> {
            self.with_conn(|conn| redis::cmd("ZCARD").arg(key).query::<usize>(conn))
        }

        fn close(&self) -> Result<(), StoreError> {
            self.conn.lock().unwrap_or_else(|e| e.into_inner()).take();
            Ok(())
        }
    }
}
