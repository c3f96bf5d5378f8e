//! 请求描述：裸 URL 或结构化请求，以及调用时的覆盖参数。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::headers::{Cookies, Headers, set_header};
use super::session::Session;
use crate::pool::proxy::ProxySpec;

#[derive(Debug, Clone)]
pub enum Request {
    Url(String),
    Structured(RequestSpec),
}

impl Request {
    pub fn url(&self) -> &str {
        match self {
            Self::Url(url) => url,
            Self::Structured(spec) => &spec.url,
        }
    }
}

impl From<&str> for Request {
    fn from(value: &str) -> Self {
        Self::Url(value.to_string())
    }
}

impl From<String> for Request {
    fn from(value: String) -> Self {
        Self::Url(value)
    }
}

impl From<RequestSpec> for Request {
    fn from(value: RequestSpec) -> Self {
        Self::Structured(value)
    }
}

/// 结构化请求：`url` 必填，其余字段同 [`RequestOptions`]。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestSpec {
    pub url: String,
    #[serde(flatten)]
    pub options: RequestOptions,
}

impl RequestSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: RequestOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestBody {
    Form(BTreeMap<String, String>),
    Raw(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// 可选请求参数；`None` 表示「未显式指定」，由 Downloader 的默认值补齐。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    pub method: Option<String>,
    pub headers: Option<Headers>,
    pub cookies: Option<Cookies>,
    pub proxies: Option<ProxySpec>,
    #[serde(with = "secs_f64_opt")]
    pub timeout: Option<Duration>,
    pub stream: Option<bool>,
    pub verify: Option<bool>,
    pub cert: Option<PathBuf>,
    pub data: Option<RequestBody>,
    pub json: Option<Value>,
    pub params: Option<BTreeMap<String, String>>,
    pub auth: Option<BasicAuth>,
    pub follow_redirects: Option<bool>,
    #[serde(skip)]
    pub session: Option<Arc<Session>>,
}

macro_rules! overlay_fields {
    ($dst:expr, $src:expr, $($field:ident),+ $(,)?) => {
        $(
            if $src.$field.is_some() {
                $dst.$field = $src.$field;
            }
        )+
    };
}

impl RequestOptions {
    /// 用 `other` 中显式给出的字段覆盖自身。
    pub fn overlay(&mut self, other: RequestOptions) {
        overlay_fields!(
            self,
            other,
            method,
            headers,
            cookies,
            proxies,
            timeout,
            stream,
            verify,
            cert,
            data,
            json,
            params,
            auth,
            follow_redirects,
            session,
        );
    }

    pub fn has_body(&self) -> bool {
        self.data.is_some() || self.json.is_some()
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        set_header(self.headers.get_or_insert_with(Headers::new), name, value);
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies
            .get_or_insert_with(Cookies::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn proxies(mut self, proxies: ProxySpec) -> Self {
        self.proxies = Some(proxies);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = Some(verify);
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn form(mut self, form: BTreeMap<String, String>) -> Self {
        self.data = Some(RequestBody::Form(form));
        self
    }

    pub fn session(mut self, session: Arc<Session>) -> Self {
        self.session = Some(session);
        self
    }
}

/// http => https, https => http；其他 scheme 原样返回。
pub fn flip_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https") {
        format!("http{rest}")
    } else if let Some(rest) = url.strip_prefix("http:") {
        format!("https:{rest}")
    } else {
        url.to_string()
    }
}

/// 翻转请求 URL 的协议；结构化请求只改 `url` 字段。
pub fn convert_http_protocol(request: &Request) -> Request {
    match request {
        Request::Url(url) => Request::Url(flip_scheme(url)),
        Request::Structured(spec) => {
            let mut spec = spec.clone();
            spec.url = flip_scheme(&spec.url);
            Request::Structured(spec)
        }
    }
}

mod secs_f64_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(d)?;
        match secs {
            Some(s) if s.is_finite() && s >= 0.0 => Ok(Some(Duration::from_secs_f64(s))),
            Some(s) => Err(serde::de::Error::custom(format!("invalid timeout: {s}"))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flips_between_http_and_https() {
        assert_eq!(flip_scheme("https://a.com/x"), "http://a.com/x");
        assert_eq!(flip_scheme("http://a.com/x"), "https://a.com/x");
        assert_eq!(flip_scheme("ftp://a.com/x"), "ftp://a.com/x");
    }

    #[test]
    fn structured_request_only_changes_url() {
        let spec = RequestSpec::new("https://a.com/x").with_options(
            RequestOptions::default()
                .method("PUT")
                .header("X-Token", "t"),
        );
        let flipped = convert_http_protocol(&Request::Structured(spec));
        let Request::Structured(spec) = flipped else {
            panic!("expected structured request");
        };
        assert_eq!(spec.url, "http://a.com/x");
        assert_eq!(spec.options.method.as_deref(), Some("PUT"));
        assert_eq!(
            spec.options
                .headers
                .as_ref()
                .and_then(|h| h.get("X-Token"))
                .map(String::as_str),
            Some("t")
        );
    }

    #[test]
    fn overlay_keeps_unset_fields() {
        let mut base = RequestOptions::default()
            .method("GET")
            .timeout(Duration::from_secs(3));
        base.overlay(RequestOptions::default().method("DELETE"));
        assert_eq!(base.method.as_deref(), Some("DELETE"));
        assert_eq!(base.timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn structured_request_from_json() {
        let spec: RequestSpec = serde_json::from_str(
            r#"{"url":"http://x","json":{"a":1},"timeout":1.5,"headers":{"X-A":"1"}}"#,
        )
        .unwrap();
        assert_eq!(spec.url, "http://x");
        assert!(spec.options.has_body());
        assert_eq!(spec.options.timeout, Some(Duration::from_millis(1500)));
        assert!(spec.options.method.is_none());
    }
}
