//! 请求准备：把 `Request` + 调用参数 + 身份池合成为可直接执行的 `PreparedRequest`。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use super::downloader::Downloader;
use super::error::DownloadError;
use super::headers::{
    Cookies, Headers, format_headers, get_header, merge_headers, parse_cookie_header, set_header,
};
use super::request::{BasicAuth, Request, RequestBody, RequestOptions};
use super::session::Session;
use crate::pool::CookieValue;
use crate::pool::proxy::ProxySpec;

#[derive(Debug)]
pub struct PreparedRequest {
    /// 调用方指定的会话；`None` 表示使用 Downloader 的共享会话。
    pub session: Option<Arc<Session>>,
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub cookies: Cookies,
    pub proxies: Option<ProxySpec>,
    pub timeout: Duration,
    pub stream: bool,
    pub verify: bool,
    pub cert: Option<PathBuf>,
    pub data: Option<RequestBody>,
    pub json: Option<Value>,
    pub params: Option<BTreeMap<String, String>>,
    pub auth: Option<BasicAuth>,
    pub follow_redirects: Option<bool>,
}

impl Downloader {
    /// 默认请求头：UA 池取 UA，固定的 Accept 系列，再叠加 `add_headers` 注册的自定义头。
    pub fn default_headers(&self) -> Headers {
        let ua = self
            .pools
            .user_agent
            .as_ref()
            .and_then(|pool| pool.get())
            .unwrap_or_default();
        let mut headers = Headers::new();
        headers.insert("User-Agent".into(), ua);
        headers.insert("Accept".into(), "*/*".into());
        headers.insert("Accept-Encoding".into(), "gzip, deflate".into());
        headers.insert("Connection".into(), "keep-alive".into());
        merge_headers(&mut headers, &self.custom_headers);
        headers
    }

    pub fn prepare(
        &self,
        request: &Request,
        overrides: RequestOptions,
    ) -> Result<PreparedRequest, DownloadError> {
        // 结构化请求的字段优先于调用参数
        let mut opts = overrides;
        let url = match request {
            Request::Url(url) => url.clone(),
            Request::Structured(spec) => {
                opts.overlay(spec.options.clone());
                spec.url.clone()
            }
        };
        if url.trim().is_empty() {
            return Err(DownloadError::InvalidRequest("empty url".to_string()));
        }

        let mut method = match opts.method.as_deref() {
            Some(m) => Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
                .map_err(|e| DownloadError::InvalidRequest(format!("method {m:?}: {e}")))?,
            None => Method::GET,
        };

        let mut headers = if self.config.use_default_headers {
            self.default_headers()
        } else {
            Headers::new()
        };

        let mut pool_jar = Cookies::new();
        if let Some(pool) = &self.pools.cookie
            && let Some(cookie) = pool.get()
            && !cookie.is_empty()
        {
            match cookie {
                CookieValue::Jar(jar) => pool_jar = jar,
                CookieValue::Header(raw) => set_header(&mut headers, "Cookie", &raw),
            }
        }

        if let Some(pool) = &self.pools.referer
            && let Some(referer) = pool.get()
        {
            set_header(&mut headers, "Referer", &referer);
        }

        if let Some(extra) = opts.headers.take() {
            merge_headers(&mut headers, &extra);
        }
        if self.config.format_headers {
            headers = format_headers(&headers);
        }

        let proxies = match opts.proxies.take() {
            Some(p) => Some(p),
            None if self.config.proxy_enable => {
                let proxy = self
                    .proxy_pool
                    .as_ref()
                    .and_then(|pool| pool.get())
                    .filter(|p| !p.is_empty());
                Some(proxy.ok_or(DownloadError::ProxyUnavailable)?)
            }
            None => None,
        };

        let stream = opts.stream.unwrap_or(self.config.stream);
        let timeout = opts.timeout.unwrap_or(self.config.timeout);
        let session = opts.session.take();

        let mut cookies = Cookies::new();
        if let Some(raw) = get_header(&headers, "Cookie") {
            cookies.extend(parse_cookie_header(raw));
        }
        let shared = session.as_ref().unwrap_or_else(|| self.transport.session());
        // 未指定时沿用会话的校验设置，避免无谓地创建临时客户端
        let verify = opts.verify.unwrap_or(shared.options().verify);
        if let Some(raw) = shared.cookie_header() {
            cookies.extend(parse_cookie_header(raw));
        }
        cookies.extend(pool_jar);
        if let Some(explicit) = opts.cookies.take() {
            cookies.extend(explicit);
        }

        if opts.has_body() && method == Method::GET {
            debug!("GET 请求携带了 body，改为 POST: {}", url);
            method = Method::POST;
        }

        Ok(PreparedRequest {
            session,
            method,
            url,
            headers,
            cookies,
            proxies,
            timeout,
            stream,
            verify,
            cert: opts.cert,
            data: opts.data,
            json: opts.json,
            params: opts.params,
            auth: opts.auth,
            follow_redirects: opts.follow_redirects,
        })
    }
}
