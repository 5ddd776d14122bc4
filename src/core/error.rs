//! 错误处理体系 (Error Handling System)
//!
//! 定义监控引擎的领域错误类型与全局 Result 别名。
//! 站点级与渠道级错误在周期内被隔离聚合，只有配置错误是周期致命的。

use thiserror::Error;

/// 全局错误定义 (Monitor Domain Errors)
#[derive(Error, Debug)]
pub enum MonitorError {
    /// 站点不可达（网络失败、超时或整页解析失败），仅影响该站点
    #[error("Site unreachable [{site}]: {reason}")]
    SiteUnreachable { site: String, reason: String },

    /// 触发反爬拦截（403/429 或页面包含拦截特征）
    #[error("Anti-bot blocked: {0}")]
    AntiBotBlocked(String),

    /// 单条列表行解析失败（跳过，不致使适配器失败）
    #[error("Parsing error: {0}")]
    Parse(String),

    /// AI 判定服务调用失败
    #[error("AI service error: {0}")]
    AiService(String),

    /// AI 判定超时
    #[error("AI judgement timed out after {0}s")]
    AiTimeout(u64),

    /// 单渠道投递失败（重试耗尽后上报）
    #[error("Channel delivery failed [{channel}]: {reason}")]
    ChannelDelivery { channel: String, reason: String },

    /// 已有周期在运行，拒绝并发触发
    #[error("A crawl cycle is already in progress")]
    CycleInProgress,

    /// 配置无效（周期致命）
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Other error: {0}")]
    Custom(String),
}

/// 全局 Result 别名
pub type Result<T> = std::result::Result<T, MonitorError>;

impl MonitorError {
    /// 判断错误是否为反爬拦截信号
    ///
    /// 支持中间件嵌套错误的分层解包 (Downcasting)：
    /// `AntiBotBlocked` 可能被 `reqwest_middleware` 包装为 anyhow 错误。
    pub fn is_anti_bot(&self) -> bool {
        match self {
            MonitorError::AntiBotBlocked(_) => true,
            MonitorError::Middleware(reqwest_middleware::Error::Middleware(anyhow_err)) => {
                anyhow_err
                    .downcast_ref::<MonitorError>()
                    .is_some_and(|e| e.is_anti_bot())
            }
            MonitorError::Network(e) => e.status().is_some_and(|s| {
                s == reqwest::StatusCode::FORBIDDEN || s == reqwest::StatusCode::TOO_MANY_REQUESTS
            }),
            _ => false,
        }
    }
}
