//! # 会话层
//!
//! 控制单个浏览器页面的异步协调核心：导航、在页面上下文中执行脚本、等待页面生命周期或 DOM 条件，并读回结果。
//!
//! ## 主要功能
//! - **生命周期跟踪**: 根据宿主导航事件维护 DOM 就绪、加载完成和致命错误状态
//! - **脚本桥接**: 将脚本注入页面上下文，通过按调用区分的消息通道取回返回值、异常和控制台输出
//! - **等待引擎**: 固定延迟、页面谓词、生命周期事件和选择器存在性四种等待方式共享同一超时约定
//! - **导航控制**: 发起导航并在完成事件与失败事件之间竞争，忽略代码 -3 的中止
//!
//! ## 模块结构
//! - `lifecycle`: 生命周期状态机
//! - `script`: 注入脚本的渲染、参数编码与真值判断
//! - `bridge`: 页面脚本执行桥
//! - `wait`: 等待引擎
//! - `navigation`: 导航控制器
//! - `page`: 会话门面 `Session`
//! - `runtime`: 等待宿主就绪后创建会话的 `Runtime`
//!
//! ## 使用示例
//! ```rust,no_run
//! use pagewire::config::SessionOptions;
//! use pagewire::host::mock::MockHost;
//! use pagewire::session::Runtime;
//! use std::sync::Arc;
//!
//! # async fn example() -> pagewire::Result<()> {
//! let runtime = Runtime::new(Arc::new(MockHost::new()));
//! let session = runtime.create(SessionOptions::default()).await?;
//!
//! session.goto("https://example.com").await?;
//! session.wait("#app").await?;
//! let html = session.content().await?;
//! println!("{}", html);
//!
//! session.end().await?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod lifecycle;
pub mod navigation;
pub mod page;
pub mod runtime;
pub mod script;
pub mod wait;


pub use bridge::{ConsoleMessage, EvalBridge};
pub use lifecycle::{LifecycleRecord, LifecycleTracker};
pub use navigation::{NavigationController, NavigationWait};
pub use page::{Screenshot, Session};
pub use runtime::Runtime;
pub use script::{ChannelKind, InjectedScript};
pub use wait::{LifecycleToken, Predicate, WaitEngine, WaitRequest, WaitTarget};
