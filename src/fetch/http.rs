//! 直连抓取 (Direct Fetch)
//!
//! 发起普通 HTTP 请求获取列表页，速度快、资源开销低。
//! 对有反爬保护的站点会以 `AntiBotBlocked` 失败，由适配器决定是否降级。

use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use tracing::debug;

use crate::core::config::CrawlerConfig;
use crate::core::error::{MonitorError, Result};
use crate::fetch::FetchStrategy;
use crate::fetch::middleware::{AntiBotMiddleware, DisguiseMiddleware};

/// 页面内容中的反爬拦截特征
static BLOCK_MARKERS: &[&str] = &[
    "访问频繁",
    "请求过于频繁",
    "验证码",
    "captcha",
    "请稍后重试",
    "访问被拒绝",
    "access denied",
    "403 forbidden",
    "请求被禁止",
    "ip被封",
];

/// 直连抓取器
pub struct DirectFetcher {
    client: ClientWithMiddleware,
    /// 请求间礼貌延迟基准（毫秒），实际附加 0~50% 抖动
    delay_ms: u64,
}

impl DirectFetcher {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        let client = Self::build_client(config)?;
        Ok(Self {
            client,
            delay_ms: config.request_delay_ms,
        })
    }

    /// 构建底层的 HTTP 客户端
    fn build_client(config: &CrawlerConfig) -> Result<ClientWithMiddleware> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Accept",
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
            ),
        );
        headers.insert(
            "Accept-Language",
            HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8,en-GB;q=0.7,en-US;q=0.6"),
        );
        headers.insert("Cache-Control", HeaderValue::from_static("max-age=0"));
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
        headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("document"));
        headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
        headers.insert("Sec-Fetch-Site", HeaderValue::from_static("none"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(true)
            .pool_max_idle_per_host(8)
            .tcp_nodelay(true)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(MonitorError::Network)?;

        Ok(ClientBuilder::new(client)
            .with(DisguiseMiddleware)
            .with(AntiBotMiddleware)
            .build())
    }

    /// 礼貌延迟：基准值加随机抖动，避免固定节奏触发限流
    async fn polite_delay(&self) {
        if self.delay_ms == 0 {
            return;
        }
        let jitter = rand::rng().random_range(0..=self.delay_ms / 2);
        tokio::time::sleep(Duration::from_millis(self.delay_ms + jitter)).await;
    }

    /// 检查页面内容是否命中反爬拦截特征
    fn body_blocked(html: &str) -> Option<&'static str> {
        let lower = html.to_lowercase();
        BLOCK_MARKERS.iter().copied().find(|m| lower.contains(*m))
    }
}

#[async_trait::async_trait]
impl FetchStrategy for DirectFetcher {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        self.polite_delay().await;
        debug!("直连请求: {}", url);

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(MonitorError::Middleware)?;

        let resp = resp.error_for_status().map_err(MonitorError::Network)?;
        let html = resp.text().await.map_err(MonitorError::Network)?;

        if let Some(marker) = Self::body_blocked(&html) {
            return Err(MonitorError::AntiBotBlocked(format!(
                "页面包含拦截特征: {}",
                marker
            )));
        }

        Ok(html)
    }
}
