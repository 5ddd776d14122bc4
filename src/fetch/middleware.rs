//! 请求中间件
//!
//! 1. 请求前动态注入随机 User-Agent 与浏览器特征头
//! 2. 响应后识别基础设施层反爬封禁 (403/429) 并上报

use rand::prelude::IndexedRandom;
use reqwest::header::{HeaderValue, USER_AGENT};
use reqwest::{Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next, Result};
use tracing::warn;

use crate::core::error::MonitorError;

/// User-Agent 池，保持较新的浏览器版本
static USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

/// 随机取一个 UA
pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// 伪装头注入中间件
///
/// 每次请求随机轮换 UA，降低单一指纹被限流的概率。
pub struct DisguiseMiddleware;

#[async_trait::async_trait]
impl Middleware for DisguiseMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if let Ok(val) = HeaderValue::from_str(random_user_agent()) {
            req.headers_mut().insert(USER_AGENT, val);
        }
        next.run(req, extensions).await
    }
}

/// 反爬监测中间件
///
/// 纯粹的监测哨：发现 403/429 只管上报 `AntiBotBlocked`，
/// 具体的策略降级（切换浏览器抓取）交给上层适配器调度。
pub struct AntiBotMiddleware;

#[async_trait::async_trait]
impl Middleware for AntiBotMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let url = req.url().to_string();
        let resp = next.run(req, extensions).await?;

        let status = resp.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            warn!("检测到反爬拦截 HTTP {}: {}", status, url);
            return Err(reqwest_middleware::Error::from(anyhow::Error::new(
                MonitorError::AntiBotBlocked(format!("HTTP {}", status)),
            )));
        }

        Ok(resp)
    }
}
