//! 站点适配器 (Site Adapter)
//!
//! 每个站点是一个"数据描述"的适配器：URL 模板、分页上限与选择器
//! 来自配置，抓取与解析逻辑全站点共享，避免一站点一子类的继承层级。
//! 注册表在启动时由配置构建 `site_id -> adapter` 映射。

use std::sync::Arc;

use indexmap::IndexMap;
use scraper::Html;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::config::{AppConfig, FetchKind, SiteConfig};
use crate::core::error::{MonitorError, Result};
use crate::core::model::Candidate;
use crate::fetch::{BrowserFetcher, DirectFetcher, FetchStrategy};

pub mod selectors;

pub use selectors::CompiledSelectors;

/// 站点适配器
///
/// 约定：适配器只有在整站（所有列表页）都不可达或不可解析时才算失败；
/// 单行解析失败仅告警跳过。
pub struct SiteAdapter {
    config: SiteConfig,
    selectors: CompiledSelectors,
    base: Url,
    primary: Arc<dyn FetchStrategy>,
    /// 反爬拦截时允许用备选策略做一次同周期重试
    fallback: Option<Arc<dyn FetchStrategy>>,
}

impl SiteAdapter {
    pub fn new(
        config: SiteConfig,
        primary: Arc<dyn FetchStrategy>,
        fallback: Option<Arc<dyn FetchStrategy>>,
    ) -> Result<Self> {
        let selectors = CompiledSelectors::compile(&config.id, &config.selectors)?;
        let base_raw = config
            .base_url
            .clone()
            .unwrap_or_else(|| config.page_url(1));
        let base = Url::parse(&base_raw).map_err(|e| {
            MonitorError::ConfigInvalid(format!("站点 {} 的 URL 无效 ({}): {}", config.id, base_raw, e))
        })?;

        Ok(Self {
            config,
            selectors,
            base,
            primary,
            fallback,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    /// 抓取全部配置页并解析为候选列表
    ///
    /// 部分页失败不影响其余页；全部页失败时以 `SiteUnreachable` 上报。
    pub async fn crawl(&self, cancel: &CancellationToken) -> Result<Vec<Candidate>> {
        let pages = if self.config.paginated() {
            self.config.max_pages
        } else {
            1
        };

        let mut candidates = Vec::new();
        let mut attempted = 0usize;
        let mut failed = 0usize;
        let mut last_reason = String::new();

        for page in 1..=pages {
            if cancel.is_cancelled() {
                info!("[{}] 抓取被停止信号中断", self.config.id);
                break;
            }

            let url = self.config.page_url(page);
            attempted += 1;

            match self.fetch_page(&url).await {
                Ok(html) => {
                    let found = self.parse_page(&html);
                    info!("[{}] 第 {} 页解析出 {} 条", self.config.id, page, found.len());
                    candidates.extend(found);
                }
                Err(e) => {
                    warn!("[{}] 第 {} 页抓取失败: {}", self.config.id, page, e);
                    last_reason = e.to_string();
                    failed += 1;
                }
            }
        }

        // 全部页失败说明站点本身有问题（封禁、宕机或结构大改）
        if attempted > 0 && failed == attempted {
            return Err(MonitorError::SiteUnreachable {
                site: self.config.id.clone(),
                reason: last_reason,
            });
        }

        Ok(candidates)
    }

    /// 抓取单页，反爬拦截时降级到备选策略重试一次
    async fn fetch_page(&self, url: &str) -> Result<String> {
        match self.primary.fetch(url).await {
            Ok(html) => Ok(html),
            Err(e) if e.is_anti_bot() => {
                let Some(fallback) = &self.fallback else {
                    return Err(e);
                };
                warn!(
                    "[{}] {} 策略被反爬拦截 ({})，降级到 {} 重试",
                    self.config.id,
                    self.primary.name(),
                    e,
                    fallback.name()
                );
                fallback.fetch(url).await
            }
            Err(e) => Err(e),
        }
    }

    /// 解析列表页：逐行提取，单行失败跳过
    fn parse_page(&self, html: &str) -> Vec<Candidate> {
        let doc = Html::parse_document(html);
        let mut out = Vec::new();

        for row in doc.select(&self.selectors.item) {
            match self.parse_row(&row) {
                Ok(Some(candidate)) => out.push(candidate),
                Ok(None) => {}
                Err(e) => {
                    warn!("[{}] 跳过无法解析的列表行: {}", self.config.id, e);
                }
            }
        }

        if out.is_empty() {
            debug!("[{}] 页面未匹配到任何列表行", self.config.id);
        }

        out
    }

    /// 解析单行，返回 None 表示该行不是有效条目（标题过短等）
    fn parse_row(&self, row: &scraper::ElementRef<'_>) -> Result<Option<Candidate>> {
        let link = row
            .select(&self.selectors.title)
            .next()
            .ok_or_else(|| MonitorError::Parse("行内未找到标题元素".into()))?;

        let title = link.text().collect::<String>().trim().to_string();
        // 过短的链接文本通常是分页按钮或目录导航
        if title.chars().count() < 4 {
            return Ok(None);
        }

        let url = link
            .value()
            .attr("href")
            .filter(|h| {
                let lower = h.to_lowercase();
                !lower.starts_with("javascript:")
                    && !lower.starts_with("mailto:")
                    && !lower.starts_with('#')
            })
            .map(|href| self.absolute_url(href))
            .unwrap_or_default();

        let published_at = self
            .selectors
            .date
            .as_ref()
            .and_then(|sel| row.select(sel).next())
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty());

        let excerpt = self
            .selectors
            .excerpt
            .as_ref()
            .and_then(|sel| row.select(sel).next())
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        Ok(Some(Candidate {
            site_id: self.config.id.clone(),
            title,
            url,
            published_at,
            excerpt,
        }))
    }

    /// 补全相对链接
    fn absolute_url(&self, href: &str) -> String {
        if href.is_empty() {
            return String::new();
        }
        if let Some(rest) = href.strip_prefix("//") {
            return format!("{}://{}", self.base.scheme(), rest);
        }
        if href.starts_with("http://") || href.starts_with("https://") {
            return href.to_string();
        }
        self.base
            .join(href)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string())
    }
}

/// 站点注册表
///
/// 启动时由配置构建；周期运行期间只读。
pub struct SiteRegistry {
    adapters: IndexMap<String, Arc<SiteAdapter>>,
}

impl SiteRegistry {
    /// 由配置构建注册表（仅启用的站点）
    pub fn build(config: &AppConfig) -> Result<Self> {
        let direct: Arc<dyn FetchStrategy> = Arc::new(DirectFetcher::new(&config.crawler)?);
        let browser: Arc<dyn FetchStrategy> = Arc::new(BrowserFetcher::new(config.browser.clone()));

        let mut adapters = IndexMap::new();
        for site in config.sites.iter().filter(|s| s.enabled) {
            let (primary, fallback) = match site.strategy {
                // 直连被拦截时可降级到浏览器渲染
                FetchKind::Direct => (direct.clone(), Some(browser.clone())),
                // 浏览器策略本身就是兜底，无更高一级降级
                FetchKind::Browser => (browser.clone(), None),
            };
            let adapter = SiteAdapter::new(site.clone(), primary, fallback)?;
            adapters.insert(site.id.clone(), Arc::new(adapter));
        }

        Ok(Self { adapters })
    }

    /// 测试/嵌入场景：直接由适配器集合构建
    pub fn from_adapters(list: Vec<SiteAdapter>) -> Self {
        let adapters = list
            .into_iter()
            .map(|a| (a.id().to_string(), Arc::new(a)))
            .collect();
        Self { adapters }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<SiteAdapter>> {
        self.adapters.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SiteAdapter>> {
        self.adapters.values()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
