//! 身份素材池（User-Agent / Cookie / Referer）与代理池接口。
//!
//! 子模块：
//! - `user_agent`：按设备类型加载/生成 UA
//! - `cookie`：进程内有界 Cookie 池
//! - `limit_cookie`：基于共享有序集合、限制复用间隔的 Cookie 池
//! - `referer`：Referer 池
//! - `store`：有序集合存储（内存 / Redis）
//! - `proxy`：代理池接口

use std::sync::Arc;

use thiserror::Error;

use crate::network::headers::{Cookies, build_cookie_header};

pub mod cookie;
pub mod limit_cookie;
pub mod proxy;
pub mod referer;
pub mod store;
pub mod user_agent;

pub use cookie::CookiePool;
pub use limit_cookie::{Clock, LimitCookiePool, SystemClock};
pub use proxy::{ProxyPool, ProxySpec, StaticProxyPool};
pub use referer::RefererPool;
pub use store::{MemoryScoredSet, ScoredSetStore, StoreError};
pub use user_agent::{DeviceType, OsType, TemplateUserAgentGenerator, UserAgentGenerator, UserAgentPool};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid pool config: {0}")]
    InvalidConfig(String),
}

/// 所有身份池共享的能力集合。
///
/// 池通常被多个 Downloader / 线程共享，因此方法都只取 `&self`。
pub trait IdentityPool: Send + Sync {
    type Item;

    fn get(&self) -> Option<Self::Item>;

    fn add(&self, item: Self::Item);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 释放池持有的资源；没有可释放资源的池直接返回 `Ok`。
    fn close(&self) -> Result<(), PoolError> {
        Ok(())
    }
}

/// 池里取出的 Cookie：原始 `Cookie` 头字符串，或已拆好的键值对。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieValue {
    Header(String),
    Jar(Cookies),
}

impl CookieValue {
    pub fn to_header_string(&self) -> String {
        match self {
            Self::Header(raw) => raw.clone(),
            Self::Jar(jar) => build_cookie_header(jar),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Header(raw) => raw.trim().is_empty(),
            Self::Jar(jar) => jar.is_empty(),
        }
    }
}

impl From<&str> for CookieValue {
    fn from(value: &str) -> Self {
        Self::Header(value.to_string())
    }
}

impl From<String> for CookieValue {
    fn from(value: String) -> Self {
        Self::Header(value)
    }
}

impl From<Cookies> for CookieValue {
    fn from(value: Cookies) -> Self {
        Self::Jar(value)
    }
}

pub type SharedUserAgentPool = Arc<dyn IdentityPool<Item = String>>;
pub type SharedCookiePool = Arc<dyn IdentityPool<Item = CookieValue>>;
pub type SharedRefererPool = Arc<dyn IdentityPool<Item = String>>;

/// Downloader 使用的一组身份池；每一项都可以为空。
#[derive(Clone, Default)]
pub struct IdentityPools {
    pub user_agent: Option<SharedUserAgentPool>,
    pub cookie: Option<SharedCookiePool>,
    pub referer: Option<SharedRefererPool>,
}

impl IdentityPools {
    /// 尽力关闭每个池，单个池失败不影响其他池；返回失败列表。
    pub fn close_all(&self) -> Vec<(&'static str, PoolError)> {
        let mut failures = Vec::new();
        if let Some(pool) = &self.cookie
            && let Err(e) = pool.close()
        {
            failures.push(("cookie", e));
        }
        if let Some(pool) = &self.referer
            && let Err(e) = pool.close()
        {
            failures.push(("referer", e));
        }
        if let Some(pool) = &self.user_agent
            && let Err(e) = pool.close()
        {
            failures.push(("user_agent", e));
        }
        failures
    }
}

impl std::fmt::Debug for IdentityPools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityPools")
            .field("user_agent", &self.user_agent.as_ref().map(|p| p.len()))
            .field("cookie", &self.cookie.as_ref().map(|p| p.len()))
            .field("referer", &self.referer.as_ref().map(|p| p.len()))
            .finish()
    }
}
