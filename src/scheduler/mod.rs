//! 调度控制 (schedule control)
//!
//! 固定间隔触发抓取周期，同一时刻最多一个周期在运行。
//! 并发触发以 `CycleInProgress` 拒绝而不是排队。

pub mod cycle;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::core::config::ScheduleConfig;
use crate::core::error::{MonitorError, Result};
use crate::core::model::CycleReport;

pub use cycle::CycleRunner;

/// 调度器
pub struct ScheduleController {
    runner: Arc<CycleRunner>,
    config: ScheduleConfig,
    in_flight: AtomicBool,
}

/// 运行标志的 RAII 释放（周期无论成败都归还）
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ScheduleController {
    pub fn new(runner: Arc<CycleRunner>, config: ScheduleConfig) -> Self {
        Self {
            runner,
            config,
            in_flight: AtomicBool::new(false),
        }
    }

    /// 是否有周期正在运行
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// 触发一次周期，已有周期在运行时立即拒绝
    pub async fn try_run_once(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MonitorError::CycleInProgress);
        }
        let _guard = InFlightGuard(&self.in_flight);
        self.runner.run(cancel).await
    }

    /// 按固定间隔持续运行，直到取消
    pub async fn run_forever(&self, cancel: &CancellationToken) {
        let interval = Duration::from_secs(self.config.interval_minutes.max(1) * 60);

        if self.config.run_immediately {
            self.run_and_log(cancel).await;
        }

        let mut ticker = tokio::time::interval(interval);
        // 第一次 tick 立即完成，跳过避免连续两个周期
        ticker.tick().await;
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    self.run_and_log(cancel).await;
                }
                _ = cancel.cancelled() => break,
            }
        }
        info!("调度器已停止");
    }

    async fn run_and_log(&self, cancel: &CancellationToken) {
        match self.try_run_once(cancel).await {
            Ok(report) => {
                info!(
                    duration_ms = report.duration_ms,
                    found = report.candidates_found,
                    matched = report.candidates_matched,
                    admitted = report.candidates_admitted,
                    notified = report.candidates_notified,
                    failed_sites = report.sites_failed.len(),
                    "周期完成"
                );
            }
            Err(MonitorError::CycleInProgress) => {
                info!("上一周期尚未结束，跳过本次触发");
            }
            Err(e) => {
                error!("周期执行失败: {e}");
            }
        }
    }
}
