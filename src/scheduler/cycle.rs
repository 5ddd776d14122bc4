//! 单个抓取周期的执行流水线
//!
//! 抓取 → 关键字过滤 → AI 判定 → 去重入库 → 通知分发 → 周期报告。
//! 站点之间并发且互相隔离，单站点失败只记入报告不中断周期。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::CrawlerConfig;
use crate::core::error::Result;
use crate::core::event::{EventSender, MonitorEvent};
use crate::core::model::{Candidate, CycleReport, FilterVerdict, SiteFailure, SiteOutcome};
use crate::filter::ai::AiGate;
use crate::filter::keyword::KeywordFilter;
use crate::notify::{DispatchSummary, Dispatcher};
use crate::report::ReportLog;
use crate::site::SiteRegistry;
use crate::store::SeenStore;

/// 周期执行器
pub struct CycleRunner {
    registry: Arc<SiteRegistry>,
    keyword: KeywordFilter,
    ai: AiGate,
    store: Arc<SeenStore>,
    dispatcher: Arc<Dispatcher>,
    reports: ReportLog,
    crawler: CrawlerConfig,
    retention_days: u32,
    events: Option<EventSender>,
}

impl CycleRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<SiteRegistry>,
        keyword: KeywordFilter,
        ai: AiGate,
        store: Arc<SeenStore>,
        dispatcher: Arc<Dispatcher>,
        reports: ReportLog,
        crawler: CrawlerConfig,
        retention_days: u32,
        events: Option<EventSender>,
    ) -> Self {
        Self {
            registry,
            keyword,
            ai,
            store,
            dispatcher,
            reports,
            crawler,
            retention_days,
            events,
        }
    }

    fn emit(&self, event: MonitorEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    /// 执行一个完整周期
    pub async fn run(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        self.emit(MonitorEvent::CycleStarted {
            sites: self.registry.len(),
        });

        // 周期开始时清理过期记录
        let pruned = self.store.prune(self.retention_days).await?;
        if pruned > 0 {
            info!(pruned, "已清理过期去重记录");
        }

        let (candidates, sites_failed) = self.crawl_all(cancel).await;
        let candidates_found = candidates.len();

        // 取消后不再启动后续阶段。入库与通知必须成对发生：
        // 只写已见记录不通知会让该条目在之后的周期里被永久抑制
        let matched = if cancel.is_cancelled() {
            Vec::new()
        } else {
            self.filter(candidates, cancel).await
        };
        let candidates_matched = matched.len();

        let (candidates_admitted, summary) = if cancel.is_cancelled() {
            (0, DispatchSummary::default())
        } else {
            let admitted = self.admit(matched).await?;
            let summary = self.dispatcher.dispatch(&admitted, cancel).await;
            (admitted.len(), summary)
        };

        if cancel.is_cancelled() {
            self.emit(MonitorEvent::CycleCancelled);
        }

        let report = CycleReport {
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            sites_attempted: self.registry.len(),
            sites_failed,
            candidates_found,
            candidates_matched,
            candidates_admitted,
            candidates_notified: summary.notified,
            channel_failures: summary.failures,
        };

        self.reports.append(&report).await?;
        self.emit(MonitorEvent::CycleFinished(Box::new(report.clone())));
        Ok(report)
    }

    /// 并发抓取全部站点，收集候选与失败摘要
    async fn crawl_all(
        &self,
        cancel: &CancellationToken,
    ) -> (Vec<Candidate>, Vec<SiteFailure>) {
        let semaphore = Arc::new(Semaphore::new(self.crawler.concurrency.max(1)));
        let site_timeout = Duration::from_secs(self.crawler.site_timeout_secs);
        let mut tasks = JoinSet::new();

        for adapter in self.registry.iter() {
            let adapter = Arc::clone(adapter);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let events = self.events.clone();
            tasks.spawn(async move {
                let site_id = adapter.id().to_string();
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return SiteOutcome::Skipped { site_id };
                };
                if cancel.is_cancelled() {
                    return SiteOutcome::Skipped { site_id };
                }
                if let Some(events) = &events {
                    events.emit(MonitorEvent::SiteStarted {
                        site_id: site_id.clone(),
                    });
                }
                match tokio::time::timeout(site_timeout, adapter.crawl(&cancel)).await {
                    Ok(Ok(candidates)) => SiteOutcome::Fetched {
                        site_id,
                        candidates,
                    },
                    Ok(Err(e)) => SiteOutcome::Failed {
                        site_id,
                        reason: e.to_string(),
                    },
                    Err(_) => SiteOutcome::Failed {
                        site_id,
                        reason: format!("站点处理超时 ({}s)", site_timeout.as_secs()),
                    },
                }
            });
        }

        let mut candidates = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok(outcome) = joined else { continue };
            match outcome {
                SiteOutcome::Fetched {
                    site_id,
                    candidates: found,
                } => {
                    self.emit(MonitorEvent::SiteCompleted {
                        site_id: site_id.clone(),
                        candidates: found.len(),
                    });
                    info!(site_id = %site_id, count = found.len(), "站点抓取完成");
                    candidates.extend(found);
                }
                SiteOutcome::Failed { site_id, reason } => {
                    self.emit(MonitorEvent::SiteFailed {
                        site_id: site_id.clone(),
                        reason: reason.clone(),
                    });
                    warn!(site_id = %site_id, reason = %reason, "站点抓取失败");
                    failures.push(SiteFailure { site_id, reason });
                }
                SiteOutcome::Skipped { site_id } => {
                    debug!(site_id = %site_id, "周期已取消，站点未抓取");
                }
            }
        }
        (candidates, failures)
    }

    /// 关键字初筛后交给 AI 闸门复核
    async fn filter(
        &self,
        candidates: Vec<Candidate>,
        cancel: &CancellationToken,
    ) -> Vec<Candidate> {
        let keyword_passed: Vec<FilterVerdict> = candidates
            .into_iter()
            .map(|c| self.keyword.evaluate(&c))
            .filter(|v| v.passed_keyword)
            .collect();

        self.ai
            .screen(keyword_passed, cancel)
            .await
            .into_iter()
            .filter(|v| v.passed_ai != Some(false))
            .map(|v| v.candidate)
            .collect()
    }

    /// 去重：只有首次见到的候选进入通知阶段
    async fn admit(&self, candidates: Vec<Candidate>) -> Result<Vec<Candidate>> {
        let mut admitted = Vec::new();
        for candidate in candidates {
            if self.store.admit(&candidate).await? {
                self.emit(MonitorEvent::CandidateAdmitted {
                    site_id: candidate.site_id.clone(),
                    title: candidate.title.clone(),
                });
                admitted.push(candidate);
            }
        }
        Ok(admitted)
    }
}
