//! # Chrome DevTools Protocol (CDP) 宿主层
//!
//! 基于 Chrome DevTools Protocol 的真实宿主实现，通过 WebSocket 驱动 Chrome/Chromium 页面。
//!
//! ## 主要功能
//! - **WebSocket 连接管理**: 建立 CDP 连接，按 id 关联命令与响应
//! - **事件翻译**: 将页面加载、网络失败等协议事件转换为宿主导航事件
//! - **消息通道**: 通过 `Runtime.addBinding` 将页面上下文中的消息送回控制端
//! - **会话隔离**: 每个窗口使用独立的浏览器上下文
//!
//! ## 模块结构
//! - `types`: CDP 协议相关的数据类型
//! - `connection`: WebSocket 连接实现
//! - `window`: 单个页面目标上的 `HostWindow` 实现
//! - `browser`: 就绪探测与窗口创建（`HostFactory` 实现）
//!
//! ## 使用示例
//! ```rust,no_run
//! use pagewire::cdp::CdpHost;
//! use pagewire::config::SessionOptions;
//! use pagewire::session::Runtime;
//! use std::sync::Arc;
//!
//! # async fn example() -> pagewire::Result<()> {
//! let runtime = Runtime::new(Arc::new(CdpHost::new("ws://localhost:9222", 20)));
//! let session = runtime.create(SessionOptions::default()).await?;
//! session.goto("https://example.com").await?;
//! println!("Loaded: {}", session.url().await?);
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod connection;
pub mod types;
pub mod window;

pub use browser::CdpHost;
pub use connection::CdpConnection;
pub use types::{BrowserVersion, CdpEvent};
pub use window::{CdpWindow, BINDING_NAME};
