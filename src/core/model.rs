//! 领域数据模型 (Domain Models)
//!
//! 候选招标条目、去重指纹、过滤裁决与周期报告。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use url::Url;

/// 一条抓取到的招标候选信息
///
/// 每次抓取新建，创建后不可变，本身不持久化。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// 来源站点标识
    pub site_id: String,
    pub title: String,
    pub url: String,
    /// 来源站点报告的发布日期（原样字符串，不解析）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    /// 列表行附带的摘要文本
    #[serde(default)]
    pub excerpt: String,
}

impl Candidate {
    /// 计算去重指纹
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }

    /// 参与关键字匹配的全部文本（标题 + 摘要）
    pub fn match_text(&self) -> String {
        if self.excerpt.is_empty() {
            self.title.clone()
        } else {
            format!("{} {}", self.title, self.excerpt)
        }
    }
}

/// 去重指纹
///
/// `site_id + 规范化(url 或 title)` 的 blake3 摘要。
/// 两个指纹相同的候选视为同一条信息，即使排版不同。
/// 指纹带站点域：同一公告出现在镜像站点上会产生不同指纹。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(candidate: &Candidate) -> Self {
        // URL 为空的站点（少数纯文本列表）退回标题
        let identity = if candidate.url.trim().is_empty() {
            normalize_title(&candidate.title)
        } else {
            normalize_url(&candidate.url)
        };
        let digest = blake3::hash(format!("{}\n{}", candidate.site_id, identity).as_bytes());
        Self(digest.to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 规范化 URL：去锚点与末尾斜杠
///
/// 经 `Url` 解析后 scheme 与 host 已统一小写；路径和查询串保持原大小写，
/// 路径大小写不同的两条公告是不同条目。
fn normalize_url(raw: &str) -> String {
    let mut s = match Url::parse(raw.trim()) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => {
            // 无法解析的相对/残缺链接原样参与指纹
            let mut s = raw.trim().to_string();
            if let Some(idx) = s.find('#') {
                s.truncate(idx);
            }
            s
        }
    };
    while s.ends_with('/') {
        s.pop();
    }
    s
}

/// 规范化标题退路：小写、去首尾空白
fn normalize_title(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// 已见记录
///
/// 由去重存储独占写入；创建后不再更新，超过保留窗口后可被清理。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeenRecord {
    pub fingerprint: Fingerprint,
    pub first_seen_at: DateTime<Utc>,
}

/// 过滤裁决（周期内瞬态，不持久化）
#[derive(Debug, Clone)]
pub struct FilterVerdict {
    pub candidate: Candidate,
    pub passed_keyword: bool,
    /// 命中的关键字（用于通知内容与日志）
    pub matched_keywords: Vec<String>,
    /// AI 裁决：None = 未启用/未判定
    pub passed_ai: Option<bool>,
    /// 拒绝原因或 AI 失败降级原因
    pub reason: Option<String>,
}

/// 通知渠道类型
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Sms,
    Voice,
    Chat,
}

/// 单站点抓取结果
#[derive(Debug)]
pub enum SiteOutcome {
    /// 抓取成功，携带候选列表
    Fetched {
        site_id: String,
        candidates: Vec<Candidate>,
    },
    /// 站点失败（网络/反爬/整页解析），不影响其他站点
    Failed { site_id: String, reason: String },
    /// 周期被取消，该站点未实际抓取
    Skipped { site_id: String },
}

/// 站点失败摘要（写入周期报告）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteFailure {
    pub site_id: String,
    pub reason: String,
}

/// 渠道投递失败摘要（重试耗尽后记录）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelFailure {
    pub channel: ChannelKind,
    pub candidate_url: String,
    pub reason: String,
}

/// 周期报告
///
/// 每次调度运行生成一条，追加写入报告日志，供外部状态 API 消费。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub sites_attempted: usize,
    pub sites_failed: Vec<SiteFailure>,
    pub candidates_found: usize,
    /// 通过关键字 + AI 过滤的数量
    pub candidates_matched: usize,
    /// 去重后判定为新条目的数量
    pub candidates_admitted: usize,
    /// 至少在一个渠道投递成功的数量
    pub candidates_notified: usize,
    pub channel_failures: Vec<ChannelFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(site: &str, title: &str, url: &str) -> Candidate {
        Candidate {
            site_id: site.to_string(),
            title: title.to_string(),
            url: url.to_string(),
            published_at: None,
            excerpt: String::new(),
        }
    }

    #[test]
    fn fingerprint_ignores_formatting_differences() {
        let a = candidate("ccgp", "电力招标公告", "http://example.com/bid/1/");
        let b = candidate("ccgp", "电力招标公告(转载)", "HTTP://EXAMPLE.COM/bid/1#anchor");
        // 归一化后 URL 相同，标题差异不影响指纹
        let b = Candidate {
            url: "  http://Example.com/bid/1/  ".to_string(),
            ..b
        };
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_keeps_path_case_but_not_host_case() {
        // 路径大小写有区分意义，host 与 scheme 没有
        let a = candidate("ccgp", "t", "http://example.com/Bid/ABC");
        let b = candidate("ccgp", "t", "http://example.com/bid/abc");
        assert_ne!(a.fingerprint(), b.fingerprint());

        let c = candidate("ccgp", "t", "HTTP://EXAMPLE.COM/Bid/ABC");
        assert_eq!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn fingerprint_is_site_scoped() {
        let a = candidate("ccgp", "t", "http://example.com/bid/1");
        let b = candidate("ggzy", "t", "http://example.com/bid/1");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_falls_back_to_title_without_url() {
        let a = candidate("ccgp", "无人机巡检服务采购", "");
        let b = candidate("ccgp", "  无人机巡检服务采购  ", "   ");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
