//! 下载链路的错误类型。

use std::error::Error as _;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    /// 启用了代理，但代理池没有给出可用代理。
    #[error("no valid proxy")]
    ProxyUnavailable,
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("failed to load client certificate {path}: {source}")]
    Certificate { path: PathBuf, source: io::Error },
}

impl DownloadError {
    /// 是否属于传输层失败（连接、TLS、超时、DNS 等）。
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// 单行描述，附带完整的 source 链（用于 `show_error_log`）。
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = self.source();
        while let Some(err) = source {
            out.push_str("\n  caused by: ");
            out.push_str(&err.to_string());
            source = err.source();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_includes_sources() {
        let err = DownloadError::Certificate {
            path: PathBuf::from("client.pem"),
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        };
        let text = err.chain();
        assert!(text.starts_with("failed to load client certificate client.pem"));
        assert!(text.contains("caused by: missing"));
        assert!(!err.is_transport());
    }

    #[test]
    fn proxy_unavailable_message() {
        assert_eq!(DownloadError::ProxyUnavailable.to_string(), "no valid proxy");
    }
}
