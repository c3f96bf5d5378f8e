//! 全局配置结构（Config）与默认值，以及由配置构造下载器组件。
//!
//! 该模块同时提供生成 `downloader.yml` 的字段元信息。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;
#[cfg(not(feature = "redis"))]
use tracing::warn;

use super::config::{ConfigError, ConfigSpec, FieldMeta};
use super::retry::RetryPolicy;
use crate::network::downloader::DownloaderConfig;
use crate::network::session::ClientOptions;
#[cfg(not(feature = "redis"))]
use crate::pool::store::MemoryScoredSet;
use crate::pool::store::ScoredSetStore;
use crate::pool::{
    CookiePool, DeviceType, IdentityPool, IdentityPools, LimitCookiePool, PoolError, ProxyPool,
    RefererPool, StaticProxyPool, UserAgentPool,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CookiePoolKind {
    #[default]
    None,
    Memory,
    Limit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 代理配置
    #[serde(default = "default_false")]
    pub proxy_enable: bool,
    #[serde(default)]
    pub proxies: Vec<String>,

    // 请求配置
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    #[serde(default = "default_true")]
    pub use_session: bool,
    #[serde(default = "default_false")]
    pub stream: bool,
    #[serde(default = "default_false")]
    pub http2: bool,
    #[serde(default = "default_true")]
    pub use_default_headers: bool,
    #[serde(default = "default_true")]
    pub format_headers: bool,
    #[serde(default = "default_false")]
    pub verify: bool,
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
    #[serde(default = "default_max_keepalive_connections")]
    pub max_keepalive_connections: usize,
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,

    // 重试配置
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_initial_backoff_ms")]
    pub retry_initial_backoff_ms: u64,
    #[serde(default = "default_retry_max_backoff_ms")]
    pub retry_max_backoff_ms: u64,

    // 日志配置
    #[serde(default = "default_false")]
    pub show_error_log: bool,
    #[serde(default = "default_true")]
    pub show_fail_log: bool,

    // UA 配置
    #[serde(default = "default_user_agent_types")]
    pub user_agent_types: Vec<DeviceType>,
    #[serde(default = "default_true")]
    pub with_random_ua: bool,
    #[serde(default)]
    pub ua_dir: String,

    // Referer / Cookie 配置
    #[serde(default)]
    pub referers: Vec<String>,
    #[serde(default)]
    pub cookie_pool: CookiePoolKind,
    #[serde(default)]
    pub cookies: Vec<String>,
    #[serde(default = "default_cookie_capacity")]
    pub cookie_capacity: usize,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_cookie_namespace")]
    pub cookie_namespace: String,
    #[serde(default = "default_cookie_limit")]
    pub cookie_limit: u64,
    #[serde(default)]
    pub cookie_jitter: u64,

    // 并发配置
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_enable: default_false(),
            proxies: Vec::new(),
            timeout: default_timeout(),
            use_session: default_true(),
            stream: default_false(),
            http2: default_false(),
            use_default_headers: default_true(),
            format_headers: default_true(),
            verify: default_false(),
            follow_redirects: default_true(),
            max_keepalive_connections: default_max_keepalive_connections(),
            custom_headers: BTreeMap::new(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_initial_backoff_ms: default_retry_initial_backoff_ms(),
            retry_max_backoff_ms: default_retry_max_backoff_ms(),
            show_error_log: default_false(),
            show_fail_log: default_true(),
            user_agent_types: default_user_agent_types(),
            with_random_ua: default_true(),
            ua_dir: String::new(),
            referers: Vec::new(),
            cookie_pool: CookiePoolKind::None,
            cookies: Vec::new(),
            cookie_capacity: default_cookie_capacity(),
            redis_url: default_redis_url(),
            cookie_namespace: default_cookie_namespace(),
            cookie_limit: default_cookie_limit(),
            cookie_jitter: 0,
            workers: default_workers(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "downloader.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 29] = [
            FieldMeta {
                name: "proxy_enable",
                description: "是否使用代理（启用后代理池为空会直接判定请求失败）",
            },
            FieldMeta {
                name: "proxies",
                description: "代理地址列表，每次请求随机挑选一个",
            },
            FieldMeta {
                name: "timeout",
                description: "请求超时时间（秒）",
            },
            FieldMeta {
                name: "use_session",
                description: "是否复用长连接会话",
            },
            FieldMeta {
                name: "stream",
                description: "默认以流式模式读取响应",
            },
            FieldMeta {
                name: "http2",
                description: "是否允许 HTTP/2",
            },
            FieldMeta {
                name: "use_default_headers",
                description: "是否附带默认请求头（UA / Accept 等）",
            },
            FieldMeta {
                name: "format_headers",
                description: "是否规范化请求头名称",
            },
            FieldMeta {
                name: "verify",
                description: "是否校验 TLS 证书",
            },
            FieldMeta {
                name: "follow_redirects",
                description: "是否跟随重定向",
            },
            FieldMeta {
                name: "max_keepalive_connections",
                description: "每个主机保留的最大空闲连接数",
            },
            FieldMeta {
                name: "custom_headers",
                description: "附加到默认请求头的自定义头",
            },
            FieldMeta {
                name: "retry_max_attempts",
                description: "单次下载的最大尝试次数（不含协议回退）",
            },
            FieldMeta {
                name: "retry_initial_backoff_ms",
                description: "首次重试前的等待（毫秒），之后逐次翻倍",
            },
            FieldMeta {
                name: "retry_max_backoff_ms",
                description: "重试等待上限（毫秒）",
            },
            FieldMeta {
                name: "show_error_log",
                description: "下载异常时输出完整错误链",
            },
            FieldMeta {
                name: "show_fail_log",
                description: "响应状态码 >= 400 时输出日志",
            },
            FieldMeta {
                name: "user_agent_types",
                description: "UA 设备类型：pc / mobile / win / mac / linux / compatible / android / ios",
            },
            FieldMeta {
                name: "with_random_ua",
                description: "是否用内置生成器随机生成 UA（否则从 ua_dir 读取）",
            },
            FieldMeta {
                name: "ua_dir",
                description: "UA 文件目录，留空为 ~/.graper/ua",
            },
            FieldMeta {
                name: "referers",
                description: "Referer 列表，留空则不发送 Referer",
            },
            FieldMeta {
                name: "cookie_pool",
                description: "Cookie 池类型：none / memory / limit",
            },
            FieldMeta {
                name: "cookies",
                description: "启动时写入 Cookie 池的 Cookie（`k=v; k2=v2` 形式）",
            },
            FieldMeta {
                name: "cookie_capacity",
                description: "memory Cookie 池容量",
            },
            FieldMeta {
                name: "redis_url",
                description: "limit Cookie 池使用的 Redis 地址",
            },
            FieldMeta {
                name: "cookie_namespace",
                description: "limit Cookie 池命名空间（区分不同应用）",
            },
            FieldMeta {
                name: "cookie_limit",
                description: "同一 Cookie 两次使用的最小间隔（秒）",
            },
            FieldMeta {
                name: "cookie_jitter",
                description: "间隔随机浮动范围（秒）",
            },
            FieldMeta {
                name: "workers",
                description: "并发下载线程数",
            },
        ];
        &FIELDS
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.timeout.is_finite() || self.timeout <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "timeout must be positive, got {}",
                self.timeout
            )));
        }
        if self.cookie_pool == CookiePoolKind::Limit && self.cookie_namespace.trim().is_empty() {
            return Err(ConfigError::Validation(
                "cookie_namespace must not be empty for limit cookie pool".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn to_downloader_config(&self) -> DownloaderConfig {
        DownloaderConfig {
            proxy_enable: self.proxy_enable,
            timeout: Duration::from_secs_f64(self.timeout.max(0.001)),
            show_error_log: self.show_error_log,
            show_fail_log: self.show_fail_log,
            use_session: self.use_session,
            stream: self.stream,
            use_default_headers: self.use_default_headers,
            format_headers: self.format_headers,
            client: ClientOptions {
                http2: self.http2,
                max_keepalive_connections: self.max_keepalive_connections,
                verify: self.verify,
                follow_redirects: self.follow_redirects,
                proxies: None,
                cert: None,
            },
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_max_attempts)
            .with_initial_backoff(Duration::from_millis(self.retry_initial_backoff_ms))
            .with_max_backoff(Duration::from_millis(self.retry_max_backoff_ms))
    }

    pub fn proxy_pool(&self) -> Option<Arc<dyn ProxyPool>> {
        if self.proxies.is_empty() {
            return None;
        }
        Some(Arc::new(StaticProxyPool::from_urls(self.proxies.iter().cloned())))
    }

    /// 按配置构造身份池；返回的池可在多个 Downloader 之间共享。
    pub fn build_pools(&self) -> Result<IdentityPools, PoolError> {
        let ua_dir = (!self.ua_dir.trim().is_empty()).then(|| PathBuf::from(self.ua_dir.trim()));
        let user_agent = UserAgentPool::new(
            self.user_agent_types.clone(),
            self.with_random_ua,
            ua_dir,
        );

        let referer = (!self.referers.is_empty())
            .then(|| RefererPool::new(self.referers.iter().cloned()));

        let cookie: Option<crate::pool::SharedCookiePool> = match self.cookie_pool {
            CookiePoolKind::None => None,
            CookiePoolKind::Memory => {
                let pool = CookiePool::with_capacity(self.cookie_capacity);
                for c in &self.cookies {
                    pool.add(c.clone().into());
                }
                Some(Arc::new(pool))
            }
            CookiePoolKind::Limit => {
                let store = self.scored_set_store()?;
                let pool = LimitCookiePool::new(
                    store,
                    &self.cookie_namespace,
                    self.cookie_limit,
                    self.cookie_jitter,
                )?;
                if !self.cookies.is_empty() {
                    pool.add_with_delay(self.cookies.iter().cloned(), 0.0)?;
                }
                info!("limit cookie 池已就绪: {}", pool.key());
                Some(Arc::new(pool))
            }
        };

        Ok(IdentityPools {
            user_agent: Some(Arc::new(user_agent)),
            cookie,
            referer: referer.map(|r| Arc::new(r) as crate::pool::SharedRefererPool),
        })
    }

    #[cfg(feature = "redis")]
    fn scored_set_store(&self) -> Result<Arc<dyn ScoredSetStore>, PoolError> {
        use crate::pool::store::RedisScoredSet;
        Ok(Arc::new(RedisScoredSet::open(&self.redis_url)?))
    }

    #[cfg(not(feature = "redis"))]
    fn scored_set_store(&self) -> Result<Arc<dyn ScoredSetStore>, PoolError> {
        warn!(
            "未启用 redis feature，limit cookie 池退化为进程内存储（{} 被忽略）",
            self.redis_url
        );
        Ok(Arc::new(MemoryScoredSet::new()))
    }
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_timeout() -> f64 {
    20.0
}

fn default_max_keepalive_connections() -> usize {
    1000
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_initial_backoff_ms() -> u64 {
    100
}

fn default_retry_max_backoff_ms() -> u64 {
    2000
}

fn default_user_agent_types() -> Vec<DeviceType> {
    vec![DeviceType::Win, DeviceType::Mac]
}

fn default_cookie_capacity() -> usize {
    crate::pool::cookie::DEFAULT_COOKIE_CAPACITY
}

fn default_redis_url() -> String {
    std::env::var("GRAPER_REDIS_URI").unwrap_or_else(|_| "redis://localhost:6379/0".to_string())
}

fn default_cookie_namespace() -> String {
    "default".to_string()
}

fn default_cookie_limit() -> u64 {
    10
}

fn default_workers() -> usize {
    4
}
