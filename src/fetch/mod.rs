//! 抓取策略抽象 (Fetch Strategy)
//!
//! 两种可互换的获取实现：直连 HTTP 与自动化浏览器渲染。
//! 策略由站点配置静态选定；适配器在反爬拦截信号上允许
//! 用备选策略做一次同周期重试。

use async_trait::async_trait;

use crate::core::error::Result;

pub mod browser;
pub mod http;
pub mod middleware;

pub use browser::BrowserFetcher;
pub use http::DirectFetcher;

/// 抓取策略接口
///
/// 输入列表页 URL，输出渲染完成的 HTML 文本。
/// 实现方负责自身的超时控制；反爬拦截以 `AntiBotBlocked` 上报。
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// 策略名称（日志用）
    fn name(&self) -> &'static str;

    /// 获取页面 HTML
    async fn fetch(&self, url: &str) -> Result<String>;
}
