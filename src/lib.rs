//! 爬虫请求派发库：身份池（UA / Cookie / Referer / 代理）+ 带重试与协议回退的下载器。
//!
//! 代码结构：
//! - `base_system`：配置/日志/重试
//! - `pool`：身份素材池与代理池
//! - `network`：请求准备、执行与下载编排

pub mod base_system;
pub mod network;
pub mod pool;

pub use network::{
    DownloadError, DownloadOutcome, Downloader, DownloaderConfig, Request, RequestOptions,
    RequestSpec, Response,
};
pub use pool::{CookieValue, IdentityPool, IdentityPools};
