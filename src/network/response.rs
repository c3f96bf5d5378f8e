//! 下载结果：状态/头/正文 + 本次派发的元数据。

use std::io::{self, Cursor, Read};

use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Url, Version};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::error::DownloadError;
use super::headers::{Cookies, Headers};
use crate::pool::proxy::ProxySpec;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Timing {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

/// 本次请求实际使用的身份素材与耗时。
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResponseMeta {
    pub proxies: Option<ProxySpec>,
    pub headers: Headers,
    pub cookies: Cookies,
    pub time: Timing,
}

pub enum Body {
    /// 已完整读取，连接已归还。
    Buffered(Cursor<Vec<u8>>),
    /// 流式读取中，读完后需调用 [`Response::close`]。
    Streaming(reqwest::blocking::Response),
    Closed,
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffered(c) => write!(f, "Buffered({} bytes)", c.get_ref().len()),
            Self::Streaming(_) => f.write_str("Streaming"),
            Self::Closed => f.write_str("Closed"),
        }
    }
}

#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    url: Url,
    version: Version,
    headers: HeaderMap,
    body: Body,
    pub meta: ResponseMeta,
    /// 协议回退成功之前遇到的错误（仅用于诊断）。
    pub exception: Option<DownloadError>,
}

impl Response {
    pub(crate) fn buffered(resp: reqwest::blocking::Response) -> Result<Self, DownloadError> {
        let (status, url, version, headers) = parts(&resp);
        let bytes = resp.bytes()?.to_vec();
        Ok(Self::new(status, url, version, headers, Body::Buffered(Cursor::new(bytes))))
    }

    pub(crate) fn streaming(resp: reqwest::blocking::Response) -> Self {
        let (status, url, version, headers) = parts(&resp);
        Self::new(status, url, version, headers, Body::Streaming(resp))
    }

    fn new(status: StatusCode, url: Url, version: Version, headers: HeaderMap, body: Body) -> Self {
        Self {
            status,
            url,
            version,
            headers,
            body,
            meta: ResponseMeta::default(),
            exception: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// 状态码 < 400 视为成功。
    pub fn is_ok(&self) -> bool {
        self.status.as_u16() < 400
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.body, Body::Streaming(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.body, Body::Closed)
    }

    /// 已缓冲的正文；流式响应需先 [`Response::read_all`]。
    pub fn body(&self) -> Option<&[u8]> {
        match &self.body {
            Body::Buffered(c) => Some(c.get_ref().as_slice()),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<String> {
        self.body().map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(self.body().unwrap_or_default())
    }

    /// 把流式正文读完并转成缓冲模式，随后释放连接。
    pub fn read_all(&mut self) -> io::Result<&[u8]> {
        if let Body::Streaming(resp) = &mut self.body {
            let mut buf = Vec::new();
            resp.read_to_end(&mut buf)?;
            self.body = Body::Buffered(Cursor::new(buf));
        }
        Ok(self.body().unwrap_or_default())
    }

    /// 释放底层连接；缓冲正文仍可读取。
    pub fn close(&mut self) {
        if matches!(self.body, Body::Streaming(_)) {
            self.body = Body::Closed;
        }
    }
}

impl Read for Response {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.body {
            Body::Buffered(c) => c.read(buf),
            Body::Streaming(resp) => resp.read(buf),
            Body::Closed => Ok(0),
        }
    }
}

fn parts(resp: &reqwest::blocking::Response) -> (StatusCode, Url, Version, HeaderMap) {
    (
        resp.status(),
        resp.url().clone(),
        resp.version(),
        resp.headers().clone(),
    )
}
