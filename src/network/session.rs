//! HTTP 会话与请求执行。
//!
//! 共享会话复用连接池；一旦调用方给出了代理、客户端证书、或与会话不同的 TLS 校验/重定向策略，
//! 就为这一次调用单独建一个临时客户端，避免这些设置污染共享会话。

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Proxy, Url};
use tracing::debug;

use super::error::DownloadError;
use super::headers::{Headers, build_cookie_header, get_header, remove_header};
use super::prepare::PreparedRequest;
use super::request::RequestBody;
use super::response::Response;
use crate::pool::proxy::ProxySpec;

/// 构造 reqwest 客户端所需的参数。
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub http2: bool,
    pub max_keepalive_connections: usize,
    pub verify: bool,
    pub follow_redirects: bool,
    pub proxies: Option<ProxySpec>,
    pub cert: Option<PathBuf>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            http2: false,
            max_keepalive_connections: 1000,
            verify: false,
            follow_redirects: true,
            proxies: None,
            cert: None,
        }
    }
}

pub fn make_client(opts: &ClientOptions, default_headers: HeaderMap) -> Result<Client, DownloadError> {
    let redirect = if opts.follow_redirects {
        Policy::default()
    } else {
        Policy::none()
    };
    let mut builder = Client::builder()
        .default_headers(default_headers)
        .danger_accept_invalid_certs(!opts.verify)
        .pool_max_idle_per_host(opts.max_keepalive_connections)
        .redirect(redirect);
    if !opts.http2 {
        builder = builder.http1_only();
    }
    if let Some(proxies) = &opts.proxies {
        for proxy in build_proxies(proxies)? {
            builder = builder.proxy(proxy);
        }
    }
    if let Some(path) = &opts.cert {
        let pem = fs::read(path).map_err(|source| DownloadError::Certificate {
            path: path.clone(),
            source,
        })?;
        builder = builder.identity(reqwest::Identity::from_pem(&pem)?);
    }
    Ok(builder.build()?)
}

/// 代理键按 scheme 归一化后转成 reqwest 代理；限定主机的键优先于 scheme 键，`all://` 最后。
fn build_proxies(spec: &ProxySpec) -> Result<Vec<Proxy>, DownloadError> {
    let spec = spec.normalized();
    let mut scoped = Vec::new();
    let mut by_scheme = Vec::new();
    let mut fallback = Vec::new();

    for (key, target) in spec.iter() {
        let invalid = |e: reqwest::Error| {
            DownloadError::InvalidRequest(format!("invalid proxy {key} => {target}: {e}"))
        };
        match key {
            "all://" => fallback.push(Proxy::all(target).map_err(invalid)?),
            "http://" => by_scheme.push(Proxy::http(target).map_err(invalid)?),
            "https://" => by_scheme.push(Proxy::https(target).map_err(invalid)?),
            pattern => {
                let Some((scheme, host)) = pattern.split_once("://") else {
                    continue;
                };
                let proxy_url = Url::parse(target).map_err(|e| {
                    DownloadError::InvalidRequest(format!("invalid proxy {key} => {target}: {e}"))
                })?;
                let scheme = scheme.to_string();
                let host = host.trim_end_matches('/').to_string();
                scoped.push(Proxy::custom(move |url| {
                    let scheme_ok = scheme == "all" || url.scheme() == scheme;
                    let host_ok = url.host_str() == Some(host.as_str());
                    (scheme_ok && host_ok).then(|| proxy_url.clone())
                }));
            }
        }
    }
    scoped.extend(by_scheme);
    scoped.extend(fallback);
    Ok(scoped)
}

fn to_header_map(headers: &Headers) -> Result<HeaderMap, DownloadError> {
    let mut map = HeaderMap::new();
    for (k, v) in headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .map_err(|e| DownloadError::InvalidRequest(format!("header name {k:?}: {e}")))?;
        let value = HeaderValue::from_str(v)
            .map_err(|e| DownloadError::InvalidRequest(format!("header {k}: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// 长连接会话：reqwest 客户端 + 会话级 header（含持久化的 `Cookie`）。
#[derive(Debug, Clone)]
pub struct Session {
    client: Client,
    headers: Headers,
    options: ClientOptions,
}

impl Session {
    pub fn new(options: ClientOptions) -> Result<Self, DownloadError> {
        Self::with_headers(options, Headers::new())
    }

    /// 会话级 header 会附加到每个请求上；其中的 `Cookie` 在准备请求时并入 cookie 映射。
    pub fn with_headers(options: ClientOptions, headers: Headers) -> Result<Self, DownloadError> {
        let mut defaults = headers.clone();
        remove_header(&mut defaults, "Cookie");
        let client = make_client(&options, to_header_map(&defaults)?)?;
        Ok(Self {
            client,
            headers,
            options,
        })
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn cookie_header(&self) -> Option<&str> {
        get_header(&self.headers, "Cookie")
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// 执行已准备好的请求。
#[derive(Debug)]
pub struct Transport {
    session: Arc<Session>,
    use_session: bool,
}

impl Transport {
    pub fn new(session: Session, use_session: bool) -> Self {
        Self {
            session: Arc::new(session),
            use_session,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn needs_ephemeral(&self, active: &Session, req: &PreparedRequest) -> bool {
        let opts = active.options();
        !self.use_session
            || req.proxies.is_some()
            || req.cert.is_some()
            || req.verify != opts.verify
            || req.follow_redirects.is_some_and(|f| f != opts.follow_redirects)
    }

    pub fn execute(&self, req: PreparedRequest) -> Result<Response, DownloadError> {
        let active = req.session.clone().unwrap_or_else(|| Arc::clone(&self.session));

        let ephemeral;
        let client = if self.needs_ephemeral(&active, &req) {
            let opts = ClientOptions {
                verify: req.verify,
                follow_redirects: req.follow_redirects.unwrap_or(active.options().follow_redirects),
                proxies: req.proxies.clone(),
                cert: req.cert.clone(),
                ..active.options().clone()
            };
            debug!("为本次请求创建临时客户端: {}", req.url);
            ephemeral = make_client(&opts, HeaderMap::new())?;
            &ephemeral
        } else {
            active.client()
        };

        let stream = req.stream;
        let builder = build_request(client, req)?;
        let resp = builder.send()?;
        if stream {
            Ok(Response::streaming(resp))
        } else {
            Response::buffered(resp)
        }
    }
}

fn build_request(client: &Client, req: PreparedRequest) -> Result<RequestBuilder, DownloadError> {
    let mut headers = req.headers;
    remove_header(&mut headers, "Cookie");

    let mut builder = client
        .request(req.method, req.url.as_str())
        .timeout(req.timeout)
        .headers(to_header_map(&headers)?);

    if !req.cookies.is_empty() {
        let value = HeaderValue::from_str(&build_cookie_header(&req.cookies))
            .map_err(|e| DownloadError::InvalidRequest(format!("cookie: {e}")))?;
        builder = builder.header(COOKIE, value);
    }
    if let Some(params) = &req.params {
        builder = builder.query(params);
    }
    if let Some(auth) = &req.auth {
        builder = builder.basic_auth(&auth.username, auth.password.as_ref());
    }
    match req.data {
        Some(RequestBody::Form(form)) => builder = builder.form(&form),
        Some(RequestBody::Raw(raw)) => builder = builder.body(raw),
        None => {}
    }
    if let Some(json) = &req.json {
        builder = builder.json(json);
    }
    Ok(builder)
}

/// 每次请求耗时上限的默认值。
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::downloader::{Downloader, DownloaderConfig};
    use crate::network::request::RequestOptions;

    fn downloader_with(config: DownloaderConfig) -> Downloader {
        Downloader::builder()
            .config(config)
            .user_agent_pool(None)
            .build()
            .unwrap()
    }

    fn prepared(d: &Downloader, opts: RequestOptions) -> PreparedRequest {
        d.prepare(&"https://tls.example/".into(), opts).unwrap()
    }

    #[test]
    fn configured_verify_reaches_shared_client() {
        for verify in [false, true] {
            let d = downloader_with(DownloaderConfig {
                client: ClientOptions {
                    verify,
                    ..ClientOptions::default()
                },
                ..DownloaderConfig::default()
            });
            let p = prepared(&d, RequestOptions::default());
            assert_eq!(p.verify, verify);
            assert!(!d.transport.needs_ephemeral(d.transport.session(), &p));
        }
    }

    #[test]
    fn override_session_supplies_verify() {
        let d = downloader_with(DownloaderConfig::default());
        let session = Session::new(ClientOptions {
            verify: true,
            ..ClientOptions::default()
        })
        .unwrap();
        let p = prepared(&d, RequestOptions::default().session(Arc::new(session)));
        assert!(p.verify);
        let active = p.session.clone().unwrap();
        assert!(!d.transport.needs_ephemeral(&active, &p));
    }

    #[test]
    fn per_call_settings_use_ephemeral_client() {
        let d = downloader_with(DownloaderConfig::default());
        let shared = d.transport.session();

        let p = prepared(&d, RequestOptions::default().verify(true));
        assert!(d.transport.needs_ephemeral(shared, &p));

        let mut opts = RequestOptions::default();
        opts.follow_redirects = Some(true);
        assert!(!d.transport.needs_ephemeral(shared, &prepared(&d, opts)));
        let mut opts = RequestOptions::default();
        opts.follow_redirects = Some(false);
        assert!(d.transport.needs_ephemeral(shared, &prepared(&d, opts)));

        let mut opts = RequestOptions::default();
        opts.cert = Some(PathBuf::from("client.pem"));
        assert!(d.transport.needs_ephemeral(shared, &prepared(&d, opts)));

        let opts = RequestOptions::default().proxies(ProxySpec::all("http://127.0.0.1:9"));
        assert!(d.transport.needs_ephemeral(shared, &prepared(&d, opts)));
    }

    #[test]
    fn disabled_session_always_uses_ephemeral_client() {
        let d = downloader_with(DownloaderConfig {
            use_session: false,
            ..DownloaderConfig::default()
        });
        let p = prepared(&d, RequestOptions::default());
        assert!(d.transport.needs_ephemeral(d.transport.session(), &p));
    }

    #[test]
    fn proxies_are_ordered_scoped_first() {
        let spec = ProxySpec::new()
            .with("all", "http://p:1")
            .with("http", "http://p:2")
            .with("https://example.com", "http://p:3");
        assert_eq!(build_proxies(&spec).unwrap().len(), 3);
    }

    #[test]
    fn invalid_header_is_rejected() {
        let mut h = Headers::new();
        h.insert("Bad Header".into(), "x".into());
        assert!(matches!(
            to_header_map(&h),
            Err(DownloadError::InvalidRequest(_))
        ));
    }

    #[test]
    fn missing_cert_is_reported() {
        let opts = ClientOptions {
            cert: Some(PathBuf::from("/nonexistent/client.pem")),
            ..ClientOptions::default()
        };
        assert!(matches!(
            make_client(&opts, HeaderMap::new()),
            Err(DownloadError::Certificate { .. })
        ));
    }

    #[test]
    fn session_keeps_cookie_header() {
        let mut headers = Headers::new();
        headers.insert("Cookie".into(), "sid=1".into());
        headers.insert("X-Env".into(), "test".into());
        let session = Session::with_headers(ClientOptions::default(), headers).unwrap();
        assert_eq!(session.cookie_header(), Some("sid=1"));
    }
}
