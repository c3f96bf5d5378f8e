//! scrape-dispatch 命令行：按配置构造身份池与下载器，并发下载给定的 URL / 结构化请求，
//! 每个结果输出一行 JSON。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use crossbeam_channel as channel;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use tracing::{debug, info, warn};

use scrape_dispatch::base_system::config::load_or_create;
use scrape_dispatch::base_system::context::Config;
use scrape_dispatch::base_system::logging::{LogOptions, LogSystem};
use scrape_dispatch::network::{
    Downloader, Request, RequestOptions, RequestSpec, Response, ResponseMeta, ShutdownReport,
};
use scrape_dispatch::pool::IdentityPools;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "scrape-dispatch", version = VERSION)]
#[command(about = "Scraping request dispatcher with identity pools and retry")]
struct Cli {
    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 数据目录路径（存放 downloader.yml 和 logs）
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 配置文件路径（优先于 data_dir）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 并发线程数（覆盖配置文件）
    #[arg(long)]
    workers: Option<usize>,

    /// 以流式模式读取响应
    #[arg(long, default_value_t = false)]
    stream: bool,

    /// HTTP 方法（默认 GET，有请求体时 POST）
    #[arg(long)]
    method: Option<String>,

    /// 附加请求头，形如 `Name: value`，可重复
    #[arg(long = "header", value_name = "K:V", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// URL，或 `@requests.json`（单个结构化请求或其数组）
    #[arg(required = true)]
    targets: Vec<String>,
}

/// 每个下载结果输出的 JSON 行。
#[derive(Debug, Serialize)]
struct Report {
    index: usize,
    request: String,
    ok: bool,
    status: Option<u16>,
    url: Option<String>,
    bytes: Option<usize>,
    meta: Option<ResponseMeta>,
    exception: Option<String>,
}

impl Report {
    fn from_response(index: usize, request: &Request, mut resp: Response) -> Self {
        let bytes = match resp.read_all().map(|body| body.len()) {
            Ok(n) => Some(n),
            Err(err) => {
                warn!("读取响应正文失败 {}: {}", resp.url(), err);
                None
            }
        };
        resp.close();
        Self {
            index,
            request: request.url().to_string(),
            ok: resp.is_ok(),
            status: Some(resp.status().as_u16()),
            url: Some(resp.url().to_string()),
            bytes,
            meta: Some(resp.meta.clone()),
            exception: resp.exception.as_ref().map(|e| e.to_string()),
        }
    }

    fn failed(index: usize, request: &Request) -> Self {
        Self {
            index,
            request: request.url().to_string(),
            ok: false,
            status: None,
            url: None,
            bytes: None,
            meta: None,
            exception: None,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = cli.data_dir.as_deref();
    let log = init_logging(cli.debug, data_dir)?;

    let mut config = load_or_create::<Config>(cli.config.as_deref(), data_dir)
        .map_err(|e| anyhow!(e.to_string()))?;
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if cli.stream {
        config.stream = true;
    }

    let requests = collect_requests(&cli.targets)?;
    if requests.is_empty() {
        bail!("没有可下载的请求");
    }

    let mut overrides = RequestOptions::default();
    if let Some(method) = &cli.method {
        overrides = overrides.method(method.clone());
    }
    for (name, value) in &cli.headers {
        overrides = overrides.header(name, value);
    }

    info!(
        "scrape-dispatch v{}：{} 个请求，{} 个线程",
        VERSION,
        requests.len(),
        config.workers.max(1)
    );
    let report = run(&config, requests, overrides)?;
    if !report.is_clean() {
        warn!("{} 个身份池未能正常关闭", report.failures.len());
    }

    log.safe_exit();
    Ok(())
}

fn init_logging(debug: bool, base_dir: Option<&Path>) -> Result<LogSystem> {
    let logs_dir = base_dir
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let opts = LogOptions {
        debug,
        use_color: true,
        console: true,
        logs_dir,
    };
    LogSystem::init(opts).map_err(|e| anyhow!(e))
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("header must look like `Name: value`, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in `{raw}`"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn collect_requests(targets: &[String]) -> Result<Vec<Request>> {
    let mut out = Vec::new();
    for target in targets {
        match target.strip_prefix('@') {
            Some(path) => out.extend(read_request_file(Path::new(path))?),
            None => out.push(Request::from(target.as_str())),
        }
    }
    Ok(out)
}

fn read_request_file(path: &Path) -> Result<Vec<Request>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("读取请求文件失败: {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("请求文件不是合法 JSON: {}", path.display()))?;
    let specs: Vec<RequestSpec> = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    debug!("从 {} 读取 {} 个请求", path.display(), specs.len());
    Ok(specs.into_iter().map(Request::from).collect())
}

fn run(config: &Config, requests: Vec<Request>, overrides: RequestOptions) -> Result<ShutdownReport> {
    let pools = config.build_pools().map_err(|e| anyhow!(e))?;
    run_with_pools(config, pools, requests, overrides)
}

fn run_with_pools(
    config: &Config,
    pools: IdentityPools,
    requests: Vec<Request>,
    overrides: RequestOptions,
) -> Result<ShutdownReport> {
    let proxy_pool = config.proxy_pool();
    let downloader_config = config.to_downloader_config();
    let retry = config.retry_policy();
    let workers = config.workers.clamp(1, requests.len().max(1));

    let bar = ProgressBar::with_draw_target(
        Some(requests.len() as u64),
        ProgressDrawTarget::stderr(),
    );
    let style = ProgressStyle::with_template("{prefix} [{elapsed_precise}] {wide_bar} {pos}/{len} ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
    bar.set_style(style);
    bar.set_prefix("下载");

    let (job_tx, job_rx) = channel::unbounded::<(usize, Request)>();
    let (res_tx, res_rx) = channel::unbounded::<Report>();
    let overrides = Arc::new(overrides);

    let mut handles = Vec::with_capacity(workers);
    for id in 0..workers {
        let mut downloader = Downloader::builder()
            .config(downloader_config.clone())
            .pools(pools.clone())
            .proxy_pool(proxy_pool.clone())
            .retry_policy(retry.clone())
            .build()
            .map_err(|e| anyhow!(e))?;
        downloader.add_headers(&config.custom_headers);

        let job_rx = job_rx.clone();
        let res_tx = res_tx.clone();
        let overrides = Arc::clone(&overrides);
        let handle = thread::Builder::new()
            .name(format!("worker-{id}"))
            .spawn(move || {
                for (index, request) in job_rx.iter() {
                    let report = match downloader.download(request.clone(), (*overrides).clone()) {
                        Some(resp) => Report::from_response(index, &request, resp),
                        None => Report::failed(index, &request),
                    };
                    if res_tx.send(report).is_err() {
                        break;
                    }
                }
                // 只释放本线程的会话，共享的池由主线程统一关闭
                drop(downloader);
            })?;
        handles.push(handle);
    }
    drop(job_rx);
    drop(res_tx);

    for job in requests.into_iter().enumerate() {
        job_tx.send(job).map_err(|_| anyhow!("所有下载线程都已退出"))?;
    }
    drop(job_tx);

    for report in res_rx.iter() {
        let line = serde_json::to_string(&report)?;
        bar.suspend(|| println!("{line}"));
        bar.inc(1);
    }
    bar.finish_and_clear();

    for handle in handles {
        if handle.join().is_err() {
            warn!("下载线程异常退出");
        }
    }
    // 池在各 Downloader 之间共享，全部线程结束后关闭一次
    Ok(ShutdownReport::close_pools(&pools))
}
