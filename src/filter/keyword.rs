//! 关键字匹配引擎 (Keyword Filter)
//!
//! 纯函数、无状态的逐条裁决。大小写不敏感的子串匹配，无词干化或模糊逻辑。
//!
//! 判定顺序（任一拒绝即短路）：
//! 1. must_contain：必须包含全部必含词
//! 2. exclude：命中任一排除词即拒绝（优先于 include）
//! 3. include：命中任一包含词即通过；包含词表为空时默认通过

use crate::core::config::KeywordRules;
use crate::core::model::{Candidate, FilterVerdict};

/// 关键字过滤器
///
/// 规则在构造时统一小写，匹配时只小写一次候选文本。
pub struct KeywordFilter {
    include: Vec<String>,
    exclude: Vec<String>,
    must_contain: Vec<String>,
}

impl KeywordFilter {
    pub fn new(rules: &KeywordRules) -> Self {
        let lower = |v: &[String]| {
            v.iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        };
        Self {
            include: lower(&rules.include),
            exclude: lower(&rules.exclude),
            must_contain: lower(&rules.must_contain),
        }
    }

    /// 对单个候选做裁决
    pub fn evaluate(&self, candidate: &Candidate) -> FilterVerdict {
        let text = candidate.match_text().to_lowercase();

        // 1. 必含词：缺任何一个即拒绝
        if let Some(missing) = self.must_contain.iter().find(|kw| !text.contains(*kw)) {
            return FilterVerdict {
                candidate: candidate.clone(),
                passed_keyword: false,
                matched_keywords: Vec::new(),
                passed_ai: None,
                reason: Some(format!("缺少必含关键字: {}", missing)),
            };
        }

        // 2. 排除词：优先于包含词
        if let Some(hit) = self.exclude.iter().find(|kw| text.contains(*kw)) {
            return FilterVerdict {
                candidate: candidate.clone(),
                passed_keyword: false,
                matched_keywords: Vec::new(),
                passed_ai: None,
                reason: Some(format!("命中排除关键字: {}", hit)),
            };
        }

        // 3. 包含词：空表默认通过
        let matched: Vec<String> = self
            .include
            .iter()
            .filter(|kw| text.contains(*kw))
            .cloned()
            .collect();

        if self.include.is_empty() || !matched.is_empty() {
            FilterVerdict {
                candidate: candidate.clone(),
                passed_keyword: true,
                matched_keywords: matched,
                passed_ai: None,
                reason: None,
            }
        } else {
            FilterVerdict {
                candidate: candidate.clone(),
                passed_keyword: false,
                matched_keywords: Vec::new(),
                passed_ai: None,
                reason: Some("未命中任何包含关键字".into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(include: &[&str], exclude: &[&str], must: &[&str]) -> KeywordRules {
        KeywordRules {
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
            must_contain: must.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn candidate(title: &str) -> Candidate {
        Candidate {
            site_id: "demo".into(),
            title: title.into(),
            url: "http://example.com/1".into(),
            published_at: None,
            excerpt: String::new(),
        }
    }

    #[test]
    fn include_matches_and_exclude_takes_precedence() {
        let f = KeywordFilter::new(&rules(&["电力"], &["测试"], &[]));

        assert!(f.evaluate(&candidate("电力招标公告")).passed_keyword);

        let rejected = f.evaluate(&candidate("电力测试公告"));
        assert!(!rejected.passed_keyword);
        assert!(rejected.reason.unwrap().contains("排除"));
    }

    #[test]
    fn must_contain_requires_every_term() {
        let f = KeywordFilter::new(&rules(&["招标"], &[], &["采购", "公告"]));

        // 缺"采购"，即使命中包含词也拒绝
        assert!(!f.evaluate(&candidate("招标公告")).passed_keyword);
        assert!(f.evaluate(&candidate("采购招标公告")).passed_keyword);
    }

    #[test]
    fn empty_include_passes_everything_not_excluded() {
        let f = KeywordFilter::new(&rules(&[], &["废标"], &[]));
        assert!(f.evaluate(&candidate("随便什么公告")).passed_keyword);
        assert!(!f.evaluate(&candidate("废标公告")).passed_keyword);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let f = KeywordFilter::new(&rules(&["uav"], &[], &[]));
        let verdict = f.evaluate(&candidate("UAV巡检服务采购"));
        assert!(verdict.passed_keyword);
        assert_eq!(verdict.matched_keywords, vec!["uav"]);
    }

    #[test]
    fn excerpt_participates_in_matching() {
        let f = KeywordFilter::new(&rules(&["巡检"], &[], &[]));
        let mut c = candidate("某项目采购公告");
        c.excerpt = "无人机巡检服务".into();
        assert!(f.evaluate(&c).passed_keyword);
    }
}
