//! 配置管理系统 (Configuration Management)
//!
//! 负责 `config.toml` / `config.yaml` 的反序列化及其层级结构映射，
//! 支持默认值回退。配置在进程启动时加载一次，周期运行期间只读。

use std::path::Path;

use bon::Builder;
use config::{Config, File};
use serde::Deserialize;
use strum::Display;

use crate::core::error::{MonitorError, Result};
use crate::core::model::ChannelKind;

/// 全局应用配置
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct AppConfig {
    /// 调度参数
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// 抓取引擎通用参数
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// 自动化浏览器 (Chromium) 相关配置
    #[serde(default)]
    pub browser: BrowserConfig,

    /// 关键字过滤规则
    #[serde(default)]
    pub keywords: KeywordRules,

    /// AI 相关性判定配置
    #[serde(default)]
    pub ai: AiConfig,

    /// 通知渠道配置
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// 持久化目录与保留策略
    #[serde(default)]
    pub storage: StorageConfig,

    /// 监控站点列表
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

/// 调度参数
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct ScheduleConfig {
    /// 周期间隔（分钟）
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    /// 启动后是否立即执行一次
    #[serde(default = "default_true")]
    pub run_immediately: bool,
}

/// 抓取引擎参数
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct CrawlerConfig {
    /// 站点抓取并行度上限
    #[serde(default = "default_site_concurrency")]
    pub concurrency: usize,
    /// 单站点整体超时（秒）
    #[serde(default = "default_site_timeout")]
    pub site_timeout_secs: u64,
    /// 单请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// 直连请求间的礼貌延迟（毫秒，加抖动）
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,
}

/// 浏览器引擎配置
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct BrowserConfig {
    /// 是否以无头模式 (Headless) 运行
    #[serde(default = "default_true")]
    pub headless: bool,
    /// 自定义可执行文件路径
    pub chrome_path: Option<String>,
    /// 页面渲染等待（秒）
    #[serde(default = "default_render_wait")]
    pub render_wait_secs: u64,
}

/// 关键字规则
///
/// include 为空时所有候选默认通过包含检查。
#[derive(Debug, Deserialize, Builder, Clone, Default)]
pub struct KeywordRules {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub must_contain: Vec<String>,
}

/// AI 相关性判定配置
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct AiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    /// 自定义系统提示词（为空使用内置提示词）
    pub prompt: Option<String>,
    /// 单条判定超时（秒）
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
    /// 判定并行度上限
    #[serde(default = "default_ai_concurrency")]
    pub concurrency: usize,
}

/// 通知渠道集合（未配置的渠道不参与分发）
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct ChannelsConfig {
    pub email: Option<EmailConfig>,
    pub sms: Option<SmsConfig>,
    pub voice: Option<VoiceConfig>,
    pub chat: Option<ChatConfig>,

    /// 单渠道投递重试上限
    #[serde(default = "default_notify_attempts")]
    pub max_attempts: u32,
    /// 通知分发并行度上限
    #[serde(default = "default_notify_concurrency")]
    pub concurrency: usize,
}

/// 邮件渠道 (SMTP)
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct EmailConfig {
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub sender: String,
    pub password: String,
    pub receivers: Vec<String>,
}

/// 短信渠道（阿里云 SendSms）
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct SmsConfig {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub sign_name: String,
    pub template_code: String,
    pub phones: Vec<String>,
}

/// 语音渠道（阿里云 SingleCallByTts）
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct VoiceConfig {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub tts_code: String,
    pub phones: Vec<String>,
}

/// 聊天推送渠道（群机器人 Webhook）
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct ChatConfig {
    pub webhook_url: String,
}

/// 持久化配置
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct StorageConfig {
    /// 数据目录（已见记录与周期报告）
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// 已见记录保留窗口（天）
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

/// 抓取策略选择
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FetchKind {
    /// 直连 HTTP 请求
    Direct,
    /// 自动化浏览器渲染
    Browser,
}

impl Default for FetchKind {
    fn default() -> Self {
        Self::Direct
    }
}

/// 站点配置（数据描述的适配器）
///
/// 每个站点共享同一套抓取/解析逻辑，差异由 URL 模板与选择器数据表达。
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct SiteConfig {
    /// 站点唯一标识
    pub id: String,
    /// 展示名称（通知中的"来源"）
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 抓取策略
    #[serde(default)]
    pub strategy: FetchKind,
    /// 列表页 URL 模板，`{page}` 占位符代表页码（从 1 开始）
    pub list_url: String,
    /// 抓取的列表页数上限
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// 相对链接补全基准（缺省从 list_url 推导）
    pub base_url: Option<String>,
    /// 行选择器
    pub selectors: SelectorSpec,
}

impl SiteConfig {
    /// 通知展示名
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }

    /// 渲染第 `page` 页的列表 URL
    pub fn page_url(&self, page: u32) -> String {
        self.list_url.replace("{page}", &page.to_string())
    }

    /// 模板是否含分页占位符（不含时只抓首页）
    pub fn paginated(&self) -> bool {
        self.list_url.contains("{page}")
    }
}

/// CSS 选择器数据
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct SelectorSpec {
    /// 列表行选择器
    pub item: String,
    /// 行内标题链接选择器
    #[serde(default = "default_title_selector")]
    pub title: String,
    /// 行内日期选择器（可选）
    pub date: Option<String>,
    /// 行内摘要选择器（可选）
    pub excerpt: Option<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            run_immediately: true,
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_site_concurrency(),
            site_timeout_secs: default_site_timeout(),
            request_timeout_secs: default_request_timeout(),
            request_delay_ms: default_request_delay(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            render_wait_secs: default_render_wait(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            api_key: String::new(),
            model: default_ai_model(),
            prompt: None,
            timeout_secs: default_ai_timeout(),
            concurrency: default_ai_concurrency(),
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            email: None,
            sms: None,
            voice: None,
            chat: None,
            max_attempts: default_notify_attempts(),
            concurrency: default_notify_concurrency(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_interval_minutes() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_site_concurrency() -> usize {
    5
}
fn default_site_timeout() -> u64 {
    180
}
fn default_request_timeout() -> u64 {
    30
}
fn default_request_delay() -> u64 {
    1000
}
fn default_render_wait() -> u64 {
    5
}
fn default_ai_model() -> String {
    "deepseek-chat".to_string()
}
fn default_ai_timeout() -> u64 {
    60
}
fn default_ai_concurrency() -> usize {
    4
}
fn default_notify_attempts() -> u32 {
    3
}
fn default_notify_concurrency() -> usize {
    8
}
fn default_smtp_port() -> u16 {
    465
}
fn default_data_dir() -> String {
    directories::ProjectDirs::from("", "", "bidwatch")
        .map(|d| d.data_dir().display().to_string())
        .unwrap_or_else(|| "data".to_string())
}
fn default_retention_days() -> u32 {
    90
}
fn default_max_pages() -> u32 {
    1
}
fn default_title_selector() -> String {
    "a".to_string()
}

impl ChannelsConfig {
    /// 已配置的渠道类型集合
    pub fn configured(&self) -> Vec<ChannelKind> {
        let mut kinds = Vec::new();
        if self.email.is_some() {
            kinds.push(ChannelKind::Email);
        }
        if self.sms.is_some() {
            kinds.push(ChannelKind::Sms);
        }
        if self.voice.is_some() {
            kinds.push(ChannelKind::Voice);
        }
        if self.chat.is_some() {
            kinds.push(ChannelKind::Chat);
        }
        kinds
    }
}

impl AppConfig {
    /// 从文件系统中加载并解析配置
    pub fn load() -> Result<Self> {
        let builder = ["config.toml", "config.yaml"]
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
            .map(|p| Config::builder().add_source(File::from(p)))
            .unwrap_or_else(Config::builder);

        let settings = builder.build().map_err(MonitorError::Config)?;
        let cfg: AppConfig = settings.try_deserialize().map_err(MonitorError::Config)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 结构化校验（周期致命）
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for site in &self.sites {
            if site.id.trim().is_empty() {
                return Err(MonitorError::ConfigInvalid("site id 不能为空".into()));
            }
            if !seen.insert(site.id.as_str()) {
                return Err(MonitorError::ConfigInvalid(format!(
                    "重复的 site id: {}",
                    site.id
                )));
            }
            if site.list_url.trim().is_empty() {
                return Err(MonitorError::ConfigInvalid(format!(
                    "站点 {} 缺少 list_url",
                    site.id
                )));
            }
            if site.max_pages == 0 {
                return Err(MonitorError::ConfigInvalid(format!(
                    "站点 {} 的 max_pages 必须 >= 1",
                    site.id
                )));
            }
        }
        if self.schedule.interval_minutes == 0 {
            return Err(MonitorError::ConfigInvalid(
                "schedule.interval_minutes 必须 >= 1".into(),
            ));
        }
        if self.ai.enabled && self.ai.base_url.trim().is_empty() {
            return Err(MonitorError::ConfigInvalid(
                "ai.enabled 但未配置 ai.base_url".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(id: &str) -> SiteConfig {
        SiteConfig::builder()
            .id(id.to_string())
            .name(String::new())
            .enabled(true)
            .strategy(FetchKind::Direct)
            .list_url("http://example.com/list?page={page}".to_string())
            .max_pages(2)
            .selectors(
                SelectorSpec::builder()
                    .item("ul li".to_string())
                    .title("a".to_string())
                    .build(),
            )
            .build()
    }

    #[test]
    fn duplicate_site_ids_are_fatal() {
        let cfg = AppConfig::builder()
            .schedule(ScheduleConfig::default())
            .crawler(CrawlerConfig::default())
            .browser(BrowserConfig::default())
            .keywords(KeywordRules::default())
            .ai(AiConfig::default())
            .channels(ChannelsConfig::default())
            .storage(StorageConfig::default())
            .sites(vec![site("ccgp"), site("ccgp")])
            .build();
        assert!(matches!(
            cfg.validate(),
            Err(crate::core::error::MonitorError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn page_url_substitutes_placeholder() {
        let s = site("ccgp");
        assert_eq!(s.page_url(3), "http://example.com/list?page=3");
        assert!(s.paginated());
    }
}
