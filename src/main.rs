//! # Pagewire 命令行入口
//!
//! 打开一个页面会话，导航到给定 URL，按需等待，然后输出页面 HTML。
//!
//! ## 用法
//! ```text
//! pagewire <url> [wait]
//! ```
//! `wait` 可以是毫秒数、生命周期名称（`dom-ready` / `fully-loaded` / `all-settled`）或 CSS 选择器，省略时等待 `all-settled`。
//!
//! ## 环境变量
//! - `PAGEWIRE_CONFIG`: TOML 配置文件路径（可选）
//! - `PAGEWIRE_CDP_ENDPOINT`: CDP WebSocket 端点（默认: ws://localhost:9222）
//! - `RUST_LOG`: 日志过滤器（未设置时使用配置中的 `log_level`）

use anyhow::{bail, Context};
use pagewire::{
    cdp::CdpHost,
    config::{Config, SessionOptions},
    session::{Runtime, WaitRequest},
};
use std::sync::Arc;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::var("PAGEWIRE_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => Config::from_env().context("loading configuration from environment")?,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Pagewire v{}", pagewire::VERSION);

    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        bail!("usage: pagewire <url> [wait]");
    };
    let wait = match args.next() {
        Some(arg) => match arg.parse::<u64>() {
            Ok(ms) => WaitRequest::from(ms),
            Err(_) => WaitRequest::from(arg),
        },
        None => WaitRequest::default(),
    };

    let runtime = Runtime::new(Arc::new(CdpHost::from_config(&config)));
    let session = runtime
        .create(SessionOptions::from(&config))
        .await
        .context("opening session")?;
    info!("Session {} opened", session.id());

    let mut console = BroadcastStream::new(session.console());
    let console_task = tokio::spawn(async move {
        while let Some(message) = console.next().await {
            match message {
                Ok(message) => info!(target: "pagewire::console", "{}", message.args.join(" ")),
                Err(e) => warn!("Console stream lagged: {}", e),
            }
        }
    });

    let result = async {
        session.goto(&url).await?.wait(wait).await?;
        session.content().await
    }
    .await;

    if let Err(e) = session.end().await {
        warn!("Failed to close session: {}", e);
    }
    console_task.abort();

    println!("{}", result.context("loading page")?);
    Ok(())
}
