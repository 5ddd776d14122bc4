//! 周期级集成测试
//!
//! 用桩抓取策略与桩通知渠道驱动完整流水线，
//! 验证站点隔离、并发互斥、跨周期去重与渠道独立性。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use bidwatch::core::config::{
    AiConfig, ChannelsConfig, CrawlerConfig, FetchKind, KeywordRules, SelectorSpec, SiteConfig,
};
use bidwatch::core::error::{MonitorError, Result};
use bidwatch::core::model::{Candidate, ChannelKind};
use bidwatch::fetch::FetchStrategy;
use bidwatch::filter::ai::AiGate;
use bidwatch::filter::keyword::KeywordFilter;
use bidwatch::notify::{Channel, Dispatcher};
use bidwatch::report::ReportLog;
use bidwatch::scheduler::{CycleRunner, ScheduleController};
use bidwatch::site::{SiteAdapter, SiteRegistry};
use bidwatch::store::SeenStore;

/// 固定应答的抓取桩
struct FixedFetcher {
    html: Option<String>,
}

#[async_trait]
impl FetchStrategy for FixedFetcher {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn fetch(&self, _url: &str) -> Result<String> {
        match &self.html {
            Some(html) => Ok(html.clone()),
            None => Err(MonitorError::Custom("connection refused".into())),
        }
    }
}

/// 在信号量上阻塞的抓取桩（用于制造在途周期）
struct BlockingFetcher {
    gate: Arc<Semaphore>,
    html: String,
}

#[async_trait]
impl FetchStrategy for BlockingFetcher {
    fn name(&self) -> &'static str {
        "blocking"
    }

    async fn fetch(&self, _url: &str) -> Result<String> {
        let _permit = self.gate.acquire().await.expect("gate stays open");
        Ok(self.html.clone())
    }
}

/// 返回页面的同时触发停机信号的抓取桩
struct CancellingFetcher {
    cancel: CancellationToken,
    html: String,
}

#[async_trait]
impl FetchStrategy for CancellingFetcher {
    fn name(&self) -> &'static str {
        "cancelling"
    }

    async fn fetch(&self, _url: &str) -> Result<String> {
        self.cancel.cancel();
        Ok(self.html.clone())
    }
}

/// 记录投递的渠道桩
struct RecordingChannel {
    kind: ChannelKind,
    fail: bool,
    calls: AtomicUsize,
    sent: Mutex<Vec<String>>,
}

impl RecordingChannel {
    fn new(kind: ChannelKind, fail: bool) -> Self {
        Self {
            kind,
            fail,
            calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, candidate: &Candidate) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MonitorError::ChannelDelivery {
                channel: self.kind.to_string(),
                reason: "stub failure".into(),
            });
        }
        self.sent.lock().push(candidate.url.clone());
        Ok(())
    }
}

fn list_html(site: &str) -> String {
    format!(
        r#"<ul>
            <li class="row"><a href="/notice/{site}-1">{site} 设备采购招标公告</a><span class="date">2026-08-01</span></li>
        </ul>"#
    )
}

fn site_config(id: &str) -> SiteConfig {
    SiteConfig::builder()
        .id(id.to_string())
        .name(String::new())
        .enabled(true)
        .strategy(FetchKind::Direct)
        .list_url(format!("https://{id}.example/list"))
        .max_pages(1)
        .selectors(
            SelectorSpec::builder()
                .item("li.row".to_string())
                .title("a".to_string())
                .date("span.date".to_string())
                .build(),
        )
        .build()
}

fn adapter(id: &str, fetcher: Arc<dyn FetchStrategy>) -> SiteAdapter {
    SiteAdapter::new(site_config(id), fetcher, None).expect("adapter builds")
}

struct Harness {
    runner: Arc<CycleRunner>,
    channels: Vec<Arc<RecordingChannel>>,
    _dir: TempDir,
}

async fn harness(adapters: Vec<SiteAdapter>, channels: Vec<Arc<RecordingChannel>>) -> Harness {
    harness_with(adapters, channels, CrawlerConfig::default()).await
}

async fn harness_with(
    adapters: Vec<SiteAdapter>,
    channels: Vec<Arc<RecordingChannel>>,
    crawler: CrawlerConfig,
) -> Harness {
    let dir = TempDir::new().expect("tempdir");
    let store = Arc::new(
        SeenStore::open(dir.path().join("seen.jsonl"))
            .await
            .expect("store opens"),
    );
    let reports = ReportLog::new(dir.path().join("reports.jsonl"));

    let dyn_channels: Vec<Arc<dyn Channel>> = channels
        .iter()
        .map(|c| Arc::clone(c) as Arc<dyn Channel>)
        .collect();
    let channels_config = ChannelsConfig {
        max_attempts: 1,
        concurrency: 4,
        ..Default::default()
    };
    let dispatcher = Arc::new(Dispatcher::new(dyn_channels, &channels_config));

    let runner = Arc::new(CycleRunner::new(
        Arc::new(SiteRegistry::from_adapters(adapters)),
        KeywordFilter::new(&KeywordRules::default()),
        AiGate::new(&AiConfig::default(), None),
        store,
        dispatcher,
        reports,
        crawler,
        90,
        None,
    ));
    Harness {
        runner,
        channels,
        _dir: dir,
    }
}

#[tokio::test]
async fn failing_sites_are_isolated_from_healthy_ones() {
    let healthy: Arc<dyn FetchStrategy> = Arc::new(FixedFetcher {
        html: Some(list_html("ok")),
    });
    let broken: Arc<dyn FetchStrategy> = Arc::new(FixedFetcher { html: None });

    let adapters = vec![
        adapter("site-a", Arc::clone(&healthy)),
        adapter("site-b", Arc::clone(&broken)),
        adapter("site-c", Arc::clone(&healthy)),
        adapter("site-d", Arc::clone(&broken)),
        adapter("site-e", Arc::clone(&healthy)),
    ];
    let chat = Arc::new(RecordingChannel::new(ChannelKind::Chat, false));
    let h = harness(adapters, vec![chat.clone()]).await;

    let report = h
        .runner
        .run(&CancellationToken::new())
        .await
        .expect("cycle completes");

    assert_eq!(report.sites_attempted, 5);
    let mut failed: Vec<&str> = report
        .sites_failed
        .iter()
        .map(|f| f.site_id.as_str())
        .collect();
    failed.sort();
    assert_eq!(failed, ["site-b", "site-d"]);
    assert_eq!(report.candidates_found, 3);
    assert_eq!(report.candidates_admitted, 3);
    assert_eq!(report.candidates_notified, 3);
    assert_eq!(chat.sent.lock().len(), 3);
}

#[tokio::test]
async fn concurrent_trigger_is_rejected_while_cycle_runs() {
    let gate = Arc::new(Semaphore::new(0));
    let blocking: Arc<dyn FetchStrategy> = Arc::new(BlockingFetcher {
        gate: Arc::clone(&gate),
        html: list_html("slow"),
    });
    let h = harness(
        vec![adapter("site-slow", blocking)],
        vec![Arc::new(RecordingChannel::new(ChannelKind::Chat, false))],
    )
    .await;

    let controller = Arc::new(ScheduleController::new(
        Arc::clone(&h.runner),
        Default::default(),
    ));

    let first = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.try_run_once(&CancellationToken::new()).await })
    };

    // 等首个周期进入抓取阶段
    while !controller.is_running() {
        tokio::task::yield_now().await;
    }

    let second = controller.try_run_once(&CancellationToken::new()).await;
    assert!(matches!(second, Err(MonitorError::CycleInProgress)));

    gate.add_permits(1);
    let report = first.await.expect("join").expect("first cycle completes");
    assert_eq!(report.candidates_found, 1);

    // 周期结束后运行标志已释放，可再次触发
    gate.add_permits(1);
    assert!(
        controller
            .try_run_once(&CancellationToken::new())
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn cancellation_skips_admission_so_listings_are_not_lost() {
    let cancel = CancellationToken::new();
    let cancelling: Arc<dyn FetchStrategy> = Arc::new(CancellingFetcher {
        cancel: cancel.clone(),
        html: list_html("late"),
    });
    let healthy: Arc<dyn FetchStrategy> = Arc::new(FixedFetcher {
        html: Some(list_html("other")),
    });
    let chat = Arc::new(RecordingChannel::new(ChannelKind::Chat, false));
    let h = harness_with(
        vec![
            adapter("site-late", cancelling),
            adapter("site-other", healthy),
        ],
        vec![chat.clone()],
        CrawlerConfig {
            concurrency: 1,
            ..Default::default()
        },
    )
    .await;

    // 第一轮：抓取途中触发停机，已抓到的候选不得写入已见记录
    let first = h.runner.run(&cancel).await.expect("first cycle completes");
    assert_eq!(first.candidates_found, 1);
    assert_eq!(first.candidates_matched, 0);
    assert_eq!(first.candidates_admitted, 0);
    assert_eq!(first.candidates_notified, 0);
    // 因取消未抓取的站点不算失败
    assert!(first.sites_failed.is_empty());
    assert_eq!(chat.calls.load(Ordering::SeqCst), 0);

    // 第二轮：同一条公告重新出现，正常入库并通知
    let second = h
        .runner
        .run(&CancellationToken::new())
        .await
        .expect("second cycle completes");
    assert_eq!(second.candidates_found, 2);
    assert_eq!(second.candidates_admitted, 2);
    assert_eq!(second.candidates_notified, 2);
    assert!(
        chat.sent
            .lock()
            .iter()
            .any(|url| url.contains("late-1"))
    );
}

#[tokio::test]
async fn duplicates_are_suppressed_across_cycles() {
    let fetcher: Arc<dyn FetchStrategy> = Arc::new(FixedFetcher {
        html: Some(list_html("rep")),
    });
    let chat = Arc::new(RecordingChannel::new(ChannelKind::Chat, false));
    let h = harness(vec![adapter("site-a", fetcher)], vec![chat.clone()]).await;
    let cancel = CancellationToken::new();

    let first = h.runner.run(&cancel).await.expect("first cycle");
    assert_eq!(first.candidates_admitted, 1);
    assert_eq!(first.candidates_notified, 1);

    let second = h.runner.run(&cancel).await.expect("second cycle");
    assert_eq!(second.candidates_found, 1);
    assert_eq!(second.candidates_admitted, 0);
    assert_eq!(second.candidates_notified, 0);

    // 通知只发出一次
    assert_eq!(chat.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn channel_failures_reported_without_blocking_other_channels() {
    let fetcher: Arc<dyn FetchStrategy> = Arc::new(FixedFetcher {
        html: Some(list_html("mix")),
    });
    let broken = Arc::new(RecordingChannel::new(ChannelKind::Sms, true));
    let healthy = Arc::new(RecordingChannel::new(ChannelKind::Chat, false));
    let h = harness(
        vec![adapter("site-a", fetcher)],
        vec![broken.clone(), healthy.clone()],
    )
    .await;

    let report = h
        .runner
        .run(&CancellationToken::new())
        .await
        .expect("cycle completes");

    assert_eq!(report.candidates_notified, 1);
    assert_eq!(report.channel_failures.len(), 1);
    assert_eq!(report.channel_failures[0].channel, ChannelKind::Sms);
    assert_eq!(healthy.sent.lock().len(), 1);
    assert!(!h.channels.is_empty());
}
