//! 代理池接口与静态代理列表实现。
//!
//! 代理池本身的获取/健康检查逻辑不在本 crate 范围内，这里只约定 `get()` 接口。

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// 按 scheme 分组的代理配置，例如 `{"http": "http://10.0.0.1:8080"}`。
///
/// 键可以是裸 scheme（`http`）、带分隔符的 scheme（`https://`）、
/// `all://`，或限定主机的 `http://example.com`。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProxySpec(pub BTreeMap<String, String>);

impl ProxySpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// 所有请求都走同一个代理。
    pub fn all(proxy_url: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert("all://".to_string(), proxy_url.into());
        Self(map)
    }

    pub fn with(mut self, key: impl Into<String>, proxy_url: impl Into<String>) -> Self {
        self.0.insert(key.into(), proxy_url.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 裸 scheme 补齐 `://`，使 `http` 与 `http://` 等价。
    pub fn normalized(&self) -> Self {
        Self(
            self.0
                .iter()
                .map(|(k, v)| {
                    let key = if k.contains("://") {
                        k.clone()
                    } else {
                        format!("{k}://")
                    };
                    (key, v.clone())
                })
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

pub trait ProxyPool: Send + Sync {
    /// 返回一个代理配置；没有可用代理时返回 `None`。
    fn get(&self) -> Option<ProxySpec>;
}

/// 从固定列表中均匀随机挑选代理。
#[derive(Debug, Clone, Default)]
pub struct StaticProxyPool {
    proxies: Vec<ProxySpec>,
}

impl StaticProxyPool {
    pub fn new(proxies: Vec<ProxySpec>) -> Self {
        Self { proxies }
    }

    /// 每个代理 URL 对所有 scheme 生效。
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(urls.into_iter().map(ProxySpec::all).collect())
    }
}

impl ProxyPool for StaticProxyPool {
    fn get(&self) -> Option<ProxySpec> {
        self.proxies
            .choose(&mut rand::thread_rng())
            .filter(|p| !p.is_empty())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_scheme_keys_are_normalized() {
        let spec = ProxySpec::new()
            .with("http", "http://p:1")
            .with("https://", "http://p:2")
            .with("all://example.com", "http://p:3");
        let n = spec.normalized();
        let keys: Vec<&str> = n.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["all://example.com", "http://", "https://"]);
    }

    #[test]
    fn empty_pool_yields_nothing() {
        assert!(StaticProxyPool::default().get().is_none());
        let pool = StaticProxyPool::from_urls(["http://127.0.0.1:3128"]);
        assert_eq!(pool.get(), Some(ProxySpec::all("http://127.0.0.1:3128")));
    }
}
