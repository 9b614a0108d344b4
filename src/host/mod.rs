//! # 宿主引擎接口层
//!
//! 定义会话与真正承载页面的浏览器引擎之间的契约。宿主负责发出导航事件和页面消息，并执行脚本、导航、截图和输入请求。
//!
//! ## 模块结构
//! - `traits`: `HostWindow` / `HostFactory` trait 及事件、消息类型
//! - `mock`: 可编排的进程内宿主，供测试及下游 crate 使用

pub mod mock;
pub mod traits;

pub use traits::{
    HostEvent, HostFactory, HostWindow, ImageFormat, KeyInput, PageMessage, Rect,
};
