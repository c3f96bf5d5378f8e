//! 限制复用间隔的 Cookie 池。
//!
//! 每个 Cookie 是有序集合里的一个成员，分数是「最近一次派发时间」（Unix 秒）。
//! 只有 `now - score >= limit ± jitter` 的 Cookie 才能被取出；取出时原子地把分数改为 `now`，
//! 所以共享同一个存储的其他线程/进程在窗口期内拿不到它。

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use super::store::ScoredSetStore;
use super::{CookieValue, IdentityPool, PoolError};

const KEY_PREFIX: &str = "LimitRedisCookiePool";
pub const DEFAULT_GET_RETRIES: u32 = 3;

pub trait Clock: Send + Sync {
    /// Unix 时间戳（秒）。
    fn now(&self) -> f64;

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

pub struct LimitCookiePool {
    store: Arc<dyn ScoredSetStore>,
    key: String,
    limit: i64,
    jitter: i64,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl LimitCookiePool {
    /// `namespace` 用来区分不同应用，不能为空；`limit` 为复用间隔（秒），
    /// `jitter` 为每次取值时在 `[-jitter, jitter]` 内随机浮动的秒数。
    pub fn new(
        store: Arc<dyn ScoredSetStore>,
        namespace: &str,
        limit: u64,
        jitter: u64,
    ) -> Result<Self, PoolError> {
        let namespace = namespace.trim();
        if namespace.is_empty() {
            return Err(PoolError::InvalidConfig(
                "namespace must not be empty".to_string(),
            ));
        }
        Ok(Self {
            store,
            key: format!("{KEY_PREFIX}:{namespace}"),
            limit: i64::try_from(limit).unwrap_or(i64::MAX),
            jitter: i64::try_from(jitter).unwrap_or(i64::MAX),
            poll_interval: Duration::from_secs(1),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// 加入 Cookie，`delay` 秒之后才可被取出。
    pub fn add_with_delay<I, S>(&self, cookies: I, delay: f64) -> Result<(), PoolError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let at = self.clock.now() + delay;
        let members: Vec<(String, f64)> = cookies
            .into_iter()
            .map(Into::into)
            .filter(|c: &String| !c.is_empty())
            .map(|c| (c, at))
            .collect();
        if members.is_empty() {
            return Ok(());
        }
        self.store.add(&self.key, &members)?;
        Ok(())
    }

    /// 取一个可用 Cookie。没有可用的会等待 `poll_interval` 后重试，最多 `retries` 次。
    pub fn get_with_retries(&self, retries: u32) -> Result<Option<String>, PoolError> {
        let limit = self.effective_limit();
        for attempt in 1..=retries {
            let now = self.clock.now();
            let threshold = now - limit as f64;
            let mut candidates = self.store.range_by_score(&self.key, threshold)?;
            candidates.shuffle(&mut rand::thread_rng());

            for candidate in candidates {
                if self.store.claim(&self.key, &candidate, threshold, now)? {
                    return Ok(Some(candidate));
                }
                debug!("cookie 已被其他消费者占用，换下一个");
            }

            if attempt < retries {
                debug!(
                    "暂无可用 cookie（limit={}s），第 {} 次等待 {:?}",
                    limit, attempt, self.poll_interval
                );
                self.clock.sleep(self.poll_interval);
            }
        }
        Ok(None)
    }

    /// 永久移除（例如服务端判定该 Cookie 失效）。
    pub fn delete(&self, cookie: &str) -> Result<bool, PoolError> {
        Ok(self.store.remove(&self.key, cookie)?)
    }

    fn effective_limit(&self) -> i64 {
        if self.jitter > 0 {
            self.limit
                .saturating_add(rand::thread_rng().gen_range(-self.jitter..=self.jitter))
        } else {
            self.limit
        }
    }
}

impl IdentityPool for LimitCookiePool {
    type Item = CookieValue;

    fn get(&self) -> Option<CookieValue> {
        match self.get_with_retries(DEFAULT_GET_RETRIES) {
            Ok(cookie) => cookie.map(CookieValue::Header),
            Err(e) => {
                warn!("获取 cookie 失败: {}", e);
                None
            }
        }
    }

    fn add(&self, item: CookieValue) {
        if let Err(e) = self.add_with_delay([item.to_header_string()], 0.0) {
            warn!("写入 cookie 失败: {}", e);
        }
    }

    fn len(&self) -> usize {
        match self.store.count(&self.key) {
            Ok(n) => n,
            Err(e) => {
                warn!("读取 cookie 数量失败: {}", e);
                0
            }
        }
    }

    fn close(&self) -> Result<(), PoolError> {
        Ok(self.store.close()?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::thread;

    use super::*;
    use crate::pool::store::MemoryScoredSet;

    /// 手动推进的时钟；`sleep` 直接把时间往前拨。
    #[derive(Default)]
    struct ManualClock {
        now: Mutex<f64>,
    }

    impl ManualClock {
        fn at(now: f64) -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(now),
            })
        }

        fn advance(&self, secs: f64) {
            *self.now.lock().unwrap() += secs;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> f64 {
            *self.now.lock().unwrap()
        }

        fn sleep(&self, duration: Duration) {
            self.advance(duration.as_secs_f64());
        }
    }

    fn pool(limit: u64, clock: Arc<ManualClock>) -> (Arc<MemoryScoredSet>, LimitCookiePool) {
        let store = Arc::new(MemoryScoredSet::new());
        let pool = LimitCookiePool::new(store.clone(), "test", limit, 0)
            .unwrap()
            .with_clock(clock);
        (store, pool)
    }

    #[test]
    fn empty_namespace_is_rejected() {
        let store = Arc::new(MemoryScoredSet::new());
        assert!(matches!(
            LimitCookiePool::new(store, "  ", 10, 0),
            Err(PoolError::InvalidConfig(_))
        ));
    }

    #[test]
    fn key_is_namespaced() {
        let (_, pool) = pool(10, ManualClock::at(0.0));
        assert_eq!(pool.key(), "LimitRedisCookiePool:test");
    }

    #[test]
    fn delayed_cookie_is_rejected_until_delay_elapses() {
        let clock = ManualClock::at(1_000.0);
        let (_, pool) = pool(0, clock.clone());
        pool.add_with_delay(["sid=1"], 5.0).unwrap();

        for _ in 0..5 {
            assert_eq!(pool.get_with_retries(1).unwrap(), None);
            clock.advance(1.0);
        }
        assert_eq!(pool.get_with_retries(1).unwrap().as_deref(), Some("sid=1"));
    }

    #[test]
    fn used_cookie_waits_for_limit() {
        let clock = ManualClock::at(1_000.0);
        let (store, pool) = pool(10, clock.clone());
        pool.add_with_delay(["sid=1"], -10.0).unwrap();

        assert_eq!(pool.get_with_retries(1).unwrap().as_deref(), Some("sid=1"));
        assert_eq!(store.score(pool.key(), "sid=1"), Some(1_000.0));

        clock.advance(9.0);
        assert_eq!(pool.get_with_retries(1).unwrap(), None);
        clock.advance(1.0);
        assert_eq!(pool.get_with_retries(1).unwrap().as_deref(), Some("sid=1"));
    }

    #[test]
    fn retries_poll_until_cookie_is_eligible() {
        let clock = ManualClock::at(50.0);
        let (_, pool) = pool(0, clock.clone());
        pool.add_with_delay(["sid=1"], 2.0).unwrap();
        // 每次等待推进 1 秒：第 3 次尝试时可用
        assert_eq!(pool.get_with_retries(3).unwrap().as_deref(), Some("sid=1"));
        assert_eq!(clock.now(), 52.0);
    }

    #[test]
    fn exhausted_retries_return_none_without_trailing_sleep() {
        let clock = ManualClock::at(0.0);
        let (_, pool) = pool(0, clock.clone());
        assert_eq!(pool.get_with_retries(3).unwrap(), None);
        assert_eq!(clock.now(), 2.0);
        assert_eq!(pool.get_with_retries(0).unwrap(), None);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let store = Arc::new(MemoryScoredSet::new());
        let pool = LimitCookiePool::new(store, "jitter", 10, 3).unwrap();
        for _ in 0..200 {
            let l = pool.effective_limit();
            assert!((7..=13).contains(&l), "limit {l} out of range");
        }
    }

    #[test]
    fn delete_and_len() {
        let (_, pool) = pool(0, ManualClock::at(0.0));
        pool.add_with_delay(["a=1", "b=2"], 0.0).unwrap();
        assert_eq!(IdentityPool::len(&pool), 2);
        assert!(pool.delete("a=1").unwrap());
        assert_eq!(IdentityPool::len(&pool), 1);
    }

    #[test]
    fn concurrent_consumers_never_share_a_cookie_within_window() {
        let clock = ManualClock::at(10_000.0);
        let store = Arc::new(MemoryScoredSet::new());
        let pool = Arc::new(
            LimitCookiePool::new(store, "concurrent", 60, 0)
                .unwrap()
                .with_clock(clock.clone()),
        );
        let cookies: Vec<String> = (0..8).map(|i| format!("c={i}")).collect();
        pool.add_with_delay(cookies.clone(), -60.0).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || pool.get_with_retries(1).unwrap())
            })
            .collect();
        let got: Vec<String> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(got.len(), cookies.len());
        let unique: HashSet<&String> = got.iter().collect();
        assert_eq!(unique.len(), got.len());
    }
}
