//! 通用重试策略：最大次数 + 可重试判定 + 指数退避（带抖动）。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::network::error::DownloadError;

type Retryable = Arc<dyn Fn(&DownloadError) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter_factor: f64,
    retryable: Retryable,
}

impl Default for RetryPolicy {
    /// 3 次尝试，100ms 起步、翻倍、封顶 2s，10% 抖动；只重试传输层错误。
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            multiplier: 2.0,
            jitter_factor: 0.1,
            // 代理缺失、证书或请求参数错误在同一配置下重试结果不变；
            // 协议翻转那一轮仍会再试一次
            retryable: Arc::new(DownloadError::is_transport),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("multiplier", &self.multiplier)
            .field("jitter_factor", &self.jitter_factor)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// 只执行一次，不重试。
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    /// 自定义哪些错误值得重试。
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&DownloadError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 第 `attempt` 次失败后的等待时长（attempt 从 0 开始）。
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64()
            * self.multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let capped = base.min(self.max_backoff.as_secs_f64());
        let range = capped * self.jitter_factor;
        let jitter = if range > 0.0 {
            rand::thread_rng().gen_range(-range..=range)
        } else {
            0.0
        };
        Duration::from_secs_f64((capped + jitter).max(0.0))
    }

    /// 执行 `op`，失败且可重试时退避后再来；`op` 收到的是从 1 开始的尝试序号。
    pub fn run<T, F>(&self, mut op: F) -> Result<T, DownloadError>
    where
        F: FnMut(u32) -> Result<T, DownloadError>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_attempts && (self.retryable)(&e) => {
                    let wait = self.backoff(attempt - 1);
                    warn!(
                        "第 {}/{} 次尝试失败: {}，{:?} 后重试",
                        attempt, self.max_attempts, e, wait
                    );
                    if !wait.is_zero() {
                        std::thread::sleep(wait);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
