//! AI 相关性判定 (AI Filter Gate)
//!
//! 可选的二次过滤：调用外部大模型判断候选是否是真正相关的招标项目。
//! 失败策略为 fail-open：超时或服务异常时按通过处理并记录原因，
//! 绝不因 AI 服务故障静默丢弃真实公告。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::AiConfig;
use crate::core::error::{MonitorError, Result};
use crate::core::event::{EventSender, MonitorEvent};
use crate::core::model::FilterVerdict;

/// 内置系统提示词（可被配置覆盖）
static DEFAULT_PROMPT: &str = "你是一个专业的招投标项目筛选专家。我们公司是做【光伏巡检无人机】和【风电巡检无人机】的，\
产品主要用于光伏发电板巡检（含红外热斑检测）和风力发电设施巡检（含叶片检测）。\n\n\
请判断该项目是否适合我们公司投标。\n\n\
【符合条件】：\n\
- 光伏电站/光伏发电项目的无人机巡检服务采购\n\
- 风电场/风力发电项目的无人机巡检服务采购\n\
- 光伏组件红外检测、热斑检测服务\n\
- 风机叶片无人机检测服务\n\
- 新能源电站无人机运维服务\n\n\
【排除条件】：\n\
- 单纯采购无人机设备（非服务）\n\
- 测绘、航拍、农业植保、消防等其他领域无人机\n\
- 光伏/风电的工程建设、设备安装（无巡检需求）\n\
- 清洗、清洁、运输等非巡检服务\n\
- 监理、咨询、设计类服务\n\n\
返回JSON: {\"relevant\": true/false, \"reason\": \"50字以内的判断理由\"}";

/// 相关性判定接口
///
/// 抽出接口是为了让闸门逻辑（超时、并发、fail-open）可脱离网络测试。
#[async_trait]
pub trait RelevanceJudge: Send + Sync {
    /// 判定候选相关性，返回 (是否相关, 理由)
    async fn judge(&self, title: &str, excerpt: &str) -> Result<(bool, String)>;
}

/// HTTP 实现：OpenAI 兼容的 chat 接口
pub struct HttpRelevanceJudge {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    prompt: String,
}

impl HttpRelevanceJudge {
    pub fn new(config: &AiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            prompt: config
                .prompt
                .clone()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
        }
    }

    /// 从模型回复中提取 JSON 片段
    ///
    /// 模型经常把 JSON 包在 ``` 围栏里，或者前后加说明文字。
    fn extract_json(content: &str) -> &str {
        if let Some(rest) = content.split("```json").nth(1)
            && let Some(body) = rest.split("```").next()
        {
            return body.trim();
        }
        if let Some(body) = content.split("```").nth(1) {
            return body.trim();
        }
        if let (Some(start), Some(end)) = (content.find('{'), content.rfind('}'))
            && start < end
        {
            return &content[start..=end];
        }
        content
    }

    /// 解析判定结果，无法解析为 JSON 时退回文本猜测
    fn parse_verdict(content: &str) -> (bool, String) {
        let fragment = Self::extract_json(content);
        match serde_json::from_str::<serde_json::Value>(fragment) {
            Ok(v) => {
                let relevant = v.get("relevant").and_then(|r| r.as_bool()).unwrap_or(false);
                let reason = v
                    .get("reason")
                    .and_then(|r| r.as_str())
                    .unwrap_or("AI未提供理由")
                    .to_string();
                (relevant, reason)
            }
            Err(_) => {
                debug!("AI 返回非标准 JSON，退回文本分析");
                let head: String = content.chars().take(20).collect();
                let relevant =
                    content.to_lowercase().contains("true") || content.contains("相关") || head.contains('是');
                (relevant, content.chars().take(80).collect())
            }
        }
    }
}

#[async_trait]
impl RelevanceJudge for HttpRelevanceJudge {
    async fn judge(&self, title: &str, excerpt: &str) -> Result<(bool, String)> {
        let excerpt: String = excerpt.chars().take(800).collect();
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": self.prompt },
                { "role": "user", "content": format!("项目标题: {}\n项目内容: {}", title, excerpt) }
            ],
            "temperature": 0.1,
            "max_tokens": 300,
        });

        let resp = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MonitorError::AiService(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail: String = resp
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            return Err(MonitorError::AiService(format!("HTTP {}: {}", status, detail)));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MonitorError::AiService(e.to_string()))?;

        let content = body
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| MonitorError::AiService("响应中缺少 message content".into()))?;

        Ok(Self::parse_verdict(content))
    }
}

/// AI 过滤闸门
///
/// 候选彼此独立判定，可并发至配置上限；单条判定受超时约束，
/// 闸门绝不阻塞流水线超过配置的超时。
pub struct AiGate {
    judge: Arc<dyn RelevanceJudge>,
    enabled: bool,
    timeout_secs: u64,
    concurrency: usize,
    events: Option<EventSender>,
}

impl AiGate {
    pub fn new(config: &AiConfig, events: Option<EventSender>) -> Self {
        Self {
            judge: Arc::new(HttpRelevanceJudge::new(config)),
            enabled: config.enabled && !config.base_url.trim().is_empty(),
            timeout_secs: config.timeout_secs,
            concurrency: config.concurrency.max(1),
            events,
        }
    }

    /// 测试/嵌入场景：注入自定义判定实现
    pub fn with_judge(
        judge: Arc<dyn RelevanceJudge>,
        timeout_secs: u64,
        concurrency: usize,
        events: Option<EventSender>,
    ) -> Self {
        Self {
            judge,
            enabled: true,
            timeout_secs,
            concurrency: concurrency.max(1),
            events,
        }
    }

    /// 对通过关键字过滤的候选做并发 AI 判定
    ///
    /// 返回更新了 `passed_ai` / `reason` 的裁决列表。
    /// 未启用时原样返回（`passed_ai` 保持 None）。
    pub async fn screen(
        &self,
        verdicts: Vec<FilterVerdict>,
        cancel: &CancellationToken,
    ) -> Vec<FilterVerdict> {
        if !self.enabled || verdicts.is_empty() {
            return verdicts;
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();

        for verdict in verdicts {
            let judge = self.judge.clone();
            let semaphore = semaphore.clone();
            let timeout = Duration::from_secs(self.timeout_secs);
            let timeout_secs = self.timeout_secs;
            let cancel = cancel.clone();

            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return verdict;
                };
                if cancel.is_cancelled() {
                    return verdict;
                }

                let outcome = tokio::time::timeout(
                    timeout,
                    judge.judge(&verdict.candidate.title, &verdict.candidate.excerpt),
                )
                .await;

                Self::apply_outcome(verdict, outcome, timeout_secs)
            });
        }

        let mut screened = Vec::new();
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok(v) => {
                    if let (Some(false), Some(reason)) = (v.passed_ai, v.reason.as_deref()) {
                        info!("AI 判定不相关: {} ({})", v.candidate.title, reason);
                    }
                    self.emit_fell_open(&v);
                    screened.push(v);
                }
                Err(e) => warn!("AI 判定任务调度失败: {}", e),
            }
        }
        screened
    }

    /// 合并判定结果：成功采信，失败 fail-open
    fn apply_outcome(
        mut verdict: FilterVerdict,
        outcome: std::result::Result<Result<(bool, String)>, tokio::time::error::Elapsed>,
        timeout_secs: u64,
    ) -> FilterVerdict {
        match outcome {
            Ok(Ok((relevant, reason))) => {
                verdict.passed_ai = Some(relevant);
                verdict.reason = Some(reason);
            }
            Ok(Err(e)) => {
                verdict.passed_ai = Some(true);
                verdict.reason = Some(format!("AI判定失败，按通过处理: {}", e));
            }
            Err(_) => {
                let e = MonitorError::AiTimeout(timeout_secs);
                verdict.passed_ai = Some(true);
                verdict.reason = Some(format!("AI判定超时，按通过处理: {}", e));
            }
        }
        verdict
    }

    fn emit_fell_open(&self, verdict: &FilterVerdict) {
        if verdict.passed_ai == Some(true)
            && let Some(reason) = verdict.reason.as_deref()
            && reason.starts_with("AI判定")
            && let Some(events) = &self.events
        {
            events.emit(MonitorEvent::AiFellOpen {
                title: verdict.candidate.title.clone(),
                reason: reason.to_string(),
            });
        }
    }
}
