//! 应用程序入口 (Application Entrypoint)
//!
//! 负责 CLI 指令解析、遥测层初始化、依赖注入及系统生命周期管理。

use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bidwatch::core::config::AppConfig;
use bidwatch::core::event::{EventReceiver, MonitorEvent, create_event_channel};
use bidwatch::core::model::Candidate;
use bidwatch::filter::ai::AiGate;
use bidwatch::filter::keyword::KeywordFilter;
use bidwatch::notify::Dispatcher;
use bidwatch::report::ReportLog;
use bidwatch::scheduler::{CycleRunner, ScheduleController};
use bidwatch::site::SiteRegistry;
use bidwatch::store::SeenStore;

/// 命令行界面脚手架 (CLI Scaffolding)
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 按配置的间隔持续监控
    Run,
    /// 立即执行单个周期后退出
    Once,
    /// 列出配置中的站点
    Sites,
    /// 向所有已配置渠道发送测试通知
    TestNotify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 遥测层初始化 (Telemetry Layer Initialization)
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_ansi(true)
        .init();

    let cli = Cli::parse();
    let config = Arc::new(AppConfig::load()?);

    match cli.command {
        Commands::Run => {
            let (controller, cancel, events_handle) = build_controller(&config).await?;

            // 信号处理与优雅退出 (Signal Handling)
            let cancel_clone = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("收到停止信号，等待当前周期完成");
                    cancel_clone.cancel();
                }
            });

            controller.run_forever(&cancel).await;
            drop(controller);
            let _ = events_handle.await;
        }
        Commands::Once => {
            let (controller, cancel, events_handle) = build_controller(&config).await?;
            match controller.try_run_once(&cancel).await {
                Ok(report) => {
                    info!(
                        found = report.candidates_found,
                        matched = report.candidates_matched,
                        admitted = report.candidates_admitted,
                        notified = report.candidates_notified,
                        "周期完成"
                    );
                }
                Err(e) => error!("周期执行失败: {e}"),
            }
            drop(controller);
            let _ = events_handle.await;
        }
        Commands::Sites => {
            for site in &config.sites {
                let status = if site.enabled { "启用" } else { "禁用" };
                println!(
                    "{:<24} {:<8} {:<8} {}",
                    site.id,
                    status,
                    site.strategy,
                    site.display_name()
                );
            }
        }
        Commands::TestNotify => {
            let dispatcher = Dispatcher::from_config(&config.channels)?;
            if dispatcher.channel_count() == 0 {
                warn!("未配置任何通知渠道");
                return Ok(());
            }
            let probe = Candidate {
                site_id: "bidwatch".into(),
                title: "通知渠道连通性测试".into(),
                url: "https://example.com/test".into(),
                published_at: None,
                excerpt: String::new(),
            };
            let summary = dispatcher.dispatch(&[probe], &CancellationToken::new()).await;
            info!(
                notified = summary.notified,
                failures = summary.failures.len(),
                "测试通知完成"
            );
            for failure in &summary.failures {
                warn!(channel = %failure.channel, reason = %failure.reason, "渠道失败");
            }
        }
    }

    Ok(())
}

/// 依赖项初始化与注入 (Dependency Injection)
async fn build_controller(
    config: &Arc<AppConfig>,
) -> anyhow::Result<(ScheduleController, CancellationToken, tokio::task::JoinHandle<()>)> {
    let data_dir = Path::new(&config.storage.data_dir);
    tokio::fs::create_dir_all(data_dir).await?;

    let (event_sender, event_receiver) = create_event_channel();
    let events_handle = spawn_event_logger(event_receiver);

    let registry = Arc::new(SiteRegistry::build(config)?);
    let keyword = KeywordFilter::new(&config.keywords);
    let ai = AiGate::new(&config.ai, Some(event_sender.clone()));
    let store = Arc::new(SeenStore::open(data_dir.join("seen.jsonl")).await?);
    let dispatcher =
        Arc::new(Dispatcher::from_config(&config.channels)?.with_events(event_sender.clone()));
    let reports = ReportLog::new(data_dir.join("reports.jsonl"));

    info!(
        sites = registry.len(),
        channels = config.channels.configured().len(),
        seen = store.len().await,
        "监控引擎已就绪"
    );

    let runner = Arc::new(CycleRunner::new(
        registry,
        keyword,
        ai,
        store,
        dispatcher,
        reports,
        config.crawler.clone(),
        config.storage.retention_days,
        Some(event_sender),
    ));
    let controller = ScheduleController::new(runner, config.schedule.clone());
    Ok((controller, CancellationToken::new(), events_handle))
}

/// 事件消费端：引擎事件以调试日志形式落地
fn spawn_event_logger(receiver: EventReceiver) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv_async().await {
            match event {
                MonitorEvent::AiFellOpen { title, reason } => {
                    warn!(title = %title, reason = %reason, "AI 判定降级，按通过处理");
                }
                other => debug!(?other, "引擎事件"),
            }
        }
    })
}
