//! 浏览器抓取 (Browser Fetch)
//!
//! 驱动真实浏览器引擎渲染页面（执行脚本、等待动态内容），
//! 用于直连策略已知或被检测到失效的反爬站点。
//! 延迟与资源开销高，仅在配置指定或降级重试时使用。

use std::path::Path;
use std::time::Duration;

use chromiumoxide::{
    Page,
    browser::{Browser, BrowserConfig as ChromeConfig},
    cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams,
};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::core::config::BrowserConfig;
use crate::core::error::{MonitorError, Result};
use crate::fetch::FetchStrategy;
use crate::fetch::middleware::random_user_agent;

/// 隐藏 webdriver 特征的注入脚本
static HIDE_WEBDRIVER_JS: &str =
    "Object.defineProperty(navigator, 'webdriver', { get: () => undefined })";

/// 浏览器会话
///
/// 采用显式的所有权管理，确保关闭逻辑的确定性。
pub struct BrowserSession {
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
}

impl BrowserSession {
    /// 启动浏览器会话
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let chrome_config = build_chrome_config(config)?;

        let (browser, mut handler) = Browser::launch(chrome_config)
            .await
            .map_err(|e| MonitorError::Browser(e.to_string()))?;

        // 启动事件循环
        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser: Some(browser),
            handler: Some(handle),
        })
    }

    /// 创建新页面
    pub async fn new_page(&self) -> Result<Page> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| MonitorError::Browser("Browser already closed".into()))?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| MonitorError::Browser(e.to_string()))?;

        if let Err(e) = page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(
                HIDE_WEBDRIVER_JS.to_string(),
            ))
            .await
        {
            debug!("webdriver 特征隐藏注入失败: {}", e);
        }

        Ok(page)
    }

    /// 优雅关闭浏览器，并等待事件循环结束
    pub async fn close(&mut self) -> Result<()> {
        let browser = self.browser.take();
        let handler = self.handler.take();

        if let Some(mut b) = browser {
            let _ = b.close().await;
            if let Some(h) = handler {
                let _ = h.await;
            }
        }
        Ok(())
    }
}

// 在 Drop 时尝试最后一次清理
impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            let handler = self.handler.take();
            tokio::spawn(async move {
                let _ = browser.close().await;
                if let Some(h) = handler {
                    let _ = h.await;
                }
            });
        }
    }
}

/// 构建浏览器配置
fn build_chrome_config(config: &BrowserConfig) -> Result<ChromeConfig> {
    let mut builder = ChromeConfig::builder()
        .arg("--disable-blink-features=AutomationControlled")
        .arg(format!("--user-agent={}", random_user_agent()))
        .arg("--disable-infobars")
        .arg("--no-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-gpu")
        .arg("--window-size=1920,1080")
        .arg("--disable-extensions")
        .arg("--ignore-certificate-errors");

    if config.headless {
        builder = builder.arg("--headless=new");
    } else {
        builder = builder.with_head();
    }

    let chrome_path = if let Some(path) = &config.chrome_path {
        Some(path.clone())
    } else {
        [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
        ]
        .iter()
        .find(|p| Path::new(p).exists())
        .map(|p| p.to_string())
    };

    if let Some(path) = chrome_path {
        builder = builder.chrome_executable(path);
    }

    builder.build().map_err(MonitorError::Browser)
}

/// 浏览器抓取器
///
/// 每次抓取启动独立会话，用完即关，避免长驻进程累积状态。
pub struct BrowserFetcher {
    config: BrowserConfig,
}

impl BrowserFetcher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    async fn render_page(&self, session: &BrowserSession, url: &str) -> Result<String> {
        let page = session.new_page().await?;

        page.goto(url)
            .await
            .map_err(|e| MonitorError::Browser(e.to_string()))?;

        // 等待导航完成后再留出动态内容渲染时间
        let _ = page.wait_for_navigation().await;
        tokio::time::sleep(Duration::from_secs(self.config.render_wait_secs)).await;

        page.content()
            .await
            .map_err(|e| MonitorError::Browser(e.to_string()))
    }
}

#[async_trait::async_trait]
impl FetchStrategy for BrowserFetcher {
    fn name(&self) -> &'static str {
        "browser"
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        debug!("浏览器渲染请求: {}", url);
        let mut session = BrowserSession::launch(&self.config).await?;

        let result = self.render_page(&session, url).await;

        // 显式关闭并等待资源释放
        if let Err(e) = session.close().await {
            debug!("关闭浏览器时发生非致命错误: {}", e);
        }

        result
    }
}
