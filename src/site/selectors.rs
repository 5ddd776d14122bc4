//! 站点选择器
//!
//! 由配置字符串编译而来的 CSS 选择器集合。
//! 选择器是数据而非代码：40+ 个站点共享同一套解析逻辑，
//! 差异由每个站点配置中的选择器表达。

use scraper::Selector;

use crate::core::config::SelectorSpec;
use crate::core::error::{MonitorError, Result};

/// 站点选择器集合（预编译）
pub struct CompiledSelectors {
    /// 列表行
    pub item: Selector,
    /// 行内标题链接
    pub title: Selector,
    /// 行内日期（可选）
    pub date: Option<Selector>,
    /// 行内摘要（可选）
    pub excerpt: Option<Selector>,
}

impl CompiledSelectors {
    /// 编译配置中的选择器字符串，失败视为配置错误（周期致命）
    pub fn compile(site_id: &str, spec: &SelectorSpec) -> Result<Self> {
        let parse = |field: &str, raw: &str| {
            Selector::parse(raw).map_err(|e| {
                MonitorError::ConfigInvalid(format!(
                    "站点 {} 的 {} 选择器无效 ({}): {}",
                    site_id, field, raw, e
                ))
            })
        };

        Ok(Self {
            item: parse("item", &spec.item)?,
            title: parse("title", &spec.title)?,
            date: spec.date.as_deref().map(|s| parse("date", s)).transpose()?,
            excerpt: spec
                .excerpt
                .as_deref()
                .map(|s| parse("excerpt", s))
                .transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SelectorSpec;

    #[test]
    fn invalid_selector_is_config_fatal() {
        let spec = SelectorSpec {
            item: "ul li".into(),
            title: ":::".into(),
            date: None,
            excerpt: None,
        };
        assert!(matches!(
            CompiledSelectors::compile("ccgp", &spec),
            Err(MonitorError::ConfigInvalid(_))
        ));
    }
}
