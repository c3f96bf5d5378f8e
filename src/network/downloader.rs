//! 下载器：准备请求 → 执行 → 附加元数据，外加通用重试和一次 http/https 协议回退。
//!
//! `download` 永远不会返回错误：要么拿到响应，要么 `None`。需要区分失败原因时用 `try_download`。

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, error, warn};

use super::error::DownloadError;
use super::headers::{Headers, format_headers, merge_headers};
use super::request::{Request, RequestOptions, convert_http_protocol};
use super::response::{Response, ResponseMeta, Timing};
use super::session::{ClientOptions, DEFAULT_TIMEOUT, Session, Transport};
use crate::base_system::retry::RetryPolicy;
use crate::pool::proxy::ProxyPool;
use crate::pool::{
    IdentityPools, PoolError, SharedCookiePool, SharedRefererPool, SharedUserAgentPool,
    UserAgentPool,
};

/// Downloader 的运行参数。
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub proxy_enable: bool,
    pub timeout: Duration,
    /// 失败时输出完整错误链，否则只输出一行。
    pub show_error_log: bool,
    /// 响应状态码 >= 400 时输出一条错误日志。
    pub show_fail_log: bool,
    pub use_session: bool,
    pub stream: bool,
    pub use_default_headers: bool,
    pub format_headers: bool,
    pub client: ClientOptions,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            proxy_enable: false,
            timeout: DEFAULT_TIMEOUT,
            show_error_log: false,
            show_fail_log: true,
            use_session: true,
            stream: false,
            use_default_headers: true,
            format_headers: true,
            client: ClientOptions::default(),
        }
    }
}

/// 两轮（原协议 + 翻转协议）都失败时的结果。
#[derive(Debug)]
pub struct DownloadFailure {
    pub url: String,
    pub first: DownloadError,
    pub last: DownloadError,
}

#[derive(Debug)]
pub enum DownloadOutcome {
    Completed(Response),
    Failed(DownloadFailure),
}

impl DownloadOutcome {
    pub fn response(self) -> Option<Response> {
        match self {
            Self::Completed(resp) => Some(resp),
            Self::Failed(_) => None,
        }
    }
}

/// `close()` 的结果：关闭失败的池及其错误。
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub failures: Vec<(&'static str, PoolError)>,
}

impl ShutdownReport {
    /// 尽力关闭一组身份池，单个池失败只记录。池被多个 Downloader 共享时只应关闭一次。
    pub fn close_pools(pools: &IdentityPools) -> Self {
        let failures = pools.close_all();
        for (name, err) in &failures {
            warn!("关闭 {} 池失败: {}", name, err);
        }
        Self { failures }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct DownloaderBuilder {
    config: DownloaderConfig,
    pools: IdentityPools,
    proxy_pool: Option<Arc<dyn ProxyPool>>,
    retry: RetryPolicy,
    session: Option<Session>,
}

impl Default for DownloaderBuilder {
    fn default() -> Self {
        Self {
            config: DownloaderConfig::default(),
            pools: IdentityPools {
                user_agent: Some(Arc::new(UserAgentPool::default())),
                cookie: None,
                referer: None,
            },
            proxy_pool: None,
            retry: RetryPolicy::default(),
            session: None,
        }
    }
}

impl DownloaderBuilder {
    pub fn config(mut self, config: DownloaderConfig) -> Self {
        self.config = config;
        self
    }

    /// 整组替换身份池（默认只有一个 `UserAgentPool`）。
    pub fn pools(mut self, pools: IdentityPools) -> Self {
        self.pools = pools;
        self
    }

    pub fn user_agent_pool(mut self, pool: Option<SharedUserAgentPool>) -> Self {
        self.pools.user_agent = pool;
        self
    }

    pub fn cookie_pool(mut self, pool: Option<SharedCookiePool>) -> Self {
        self.pools.cookie = pool;
        self
    }

    pub fn referer_pool(mut self, pool: Option<SharedRefererPool>) -> Self {
        self.pools.referer = pool;
        self
    }

    pub fn proxy_pool(mut self, pool: Option<Arc<dyn ProxyPool>>) -> Self {
        self.proxy_pool = pool;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 使用现成的会话（例如带持久化 Cookie 头的会话）代替按配置新建。
    pub fn session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn build(self) -> Result<Downloader, DownloadError> {
        let session = match self.session {
            Some(s) => s,
            None => Session::new(self.config.client.clone())?,
        };
        Ok(Downloader {
            transport: Transport::new(session, self.config.use_session),
            config: self.config,
            pools: self.pools,
            proxy_pool: self.proxy_pool,
            retry: self.retry,
            custom_headers: Headers::new(),
        })
    }
}

pub struct Downloader {
    pub(crate) config: DownloaderConfig,
    pub(crate) pools: IdentityPools,
    pub(crate) proxy_pool: Option<Arc<dyn ProxyPool>>,
    pub(crate) transport: Transport,
    pub(crate) retry: RetryPolicy,
    pub(crate) custom_headers: Headers,
}

impl Downloader {
    pub fn builder() -> DownloaderBuilder {
        DownloaderBuilder::default()
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    pub fn pools(&self) -> &IdentityPools {
        &self.pools
    }

    /// 追加到默认请求头（规范化后覆盖同名项）。
    pub fn add_headers(&mut self, headers: &Headers) {
        merge_headers(&mut self.custom_headers, &format_headers(headers));
    }

    /// 单次派发：准备 + 执行 + 元数据。
    fn attempt(&self, request: &Request, overrides: &RequestOptions) -> Result<Response, DownloadError> {
        let prepared = self.prepare(request, overrides.clone())?;
        let proxies = prepared.proxies.clone();
        let headers = prepared.headers.clone();
        let cookies = prepared.cookies.clone();

        let start = unix_now();
        let mut response = self.transport.execute(prepared)?;
        let end = unix_now();

        response.meta = ResponseMeta {
            proxies,
            headers,
            cookies,
            time: Timing {
                start,
                end,
                duration: end - start,
            },
        };
        Ok(response)
    }

    fn dispatch(&self, request: &Request, overrides: &RequestOptions) -> Result<Response, DownloadError> {
        self.retry.run(|attempt| {
            debug!("下载尝试 #{}: {}", attempt, request.url());
            self.attempt(request, overrides)
        })
    }

    /// 下载并返回明确的结果；不输出失败日志。
    pub fn try_download(&self, request: impl Into<Request>, overrides: RequestOptions) -> DownloadOutcome {
        let request = request.into();
        let first = match self.dispatch(&request, &overrides) {
            Ok(resp) => return DownloadOutcome::Completed(resp),
            Err(e) => e,
        };

        let flipped = convert_http_protocol(&request);
        debug!("下载失败（{}），切换协议重试: {}", first, flipped.url());
        match self.dispatch(&flipped, &overrides) {
            Ok(mut resp) => {
                resp.exception = Some(first);
                DownloadOutcome::Completed(resp)
            }
            Err(last) => DownloadOutcome::Failed(DownloadFailure {
                url: request.url().to_string(),
                first,
                last,
            }),
        }
    }

    /// 下载；失败时按配置记录日志并返回 `None`，不会向调用方抛出错误。
    pub fn download(&self, request: impl Into<Request>, overrides: RequestOptions) -> Option<Response> {
        match self.try_download(request, overrides) {
            DownloadOutcome::Completed(resp) => {
                if !resp.is_ok() && self.config.show_fail_log {
                    error!("download failed: {} {}", resp.status().as_u16(), resp.url());
                }
                Some(resp)
            }
            DownloadOutcome::Failed(failure) => {
                self.log_failure(&failure);
                None
            }
        }
    }

    fn log_failure(&self, failure: &DownloadFailure) {
        if self.config.show_error_log {
            error!(
                "download exception: {} {}\n  fallback: {}",
                failure.url,
                failure.first.chain(),
                failure.last.chain()
            );
        } else {
            error!("download exception: {}", failure.first);
        }
    }

    /// 释放会话并尽力关闭所有身份池；单个池失败只记录，不影响其他池。
    pub fn close(self) -> ShutdownReport {
        let report = ShutdownReport::close_pools(&self.pools);
        drop(self.transport);
        report
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
