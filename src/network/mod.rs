//! 请求派发层。
//!
//! - `request` / `prepare`：描述请求并结合身份池合成最终参数
//! - `session`：HTTP 客户端与执行
//! - `downloader`：重试 + 协议回退 + 失败日志

pub mod downloader;
pub mod error;
pub mod headers;
pub mod prepare;
pub mod request;
pub mod response;
pub mod session;

pub use downloader::{
    DownloadFailure, DownloadOutcome, Downloader, DownloaderBuilder, DownloaderConfig,
    ShutdownReport,
};
pub use error::DownloadError;
pub use headers::{Cookies, Headers};
pub use prepare::PreparedRequest;
pub use request::{BasicAuth, Request, RequestBody, RequestOptions, RequestSpec, convert_http_protocol};
pub use response::{Response, ResponseMeta, Timing};
pub use session::{ClientOptions, Session, Transport};
