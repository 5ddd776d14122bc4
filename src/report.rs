//! 周期报告日志 (Cycle Report Log)
//!
//! 追加式 JSONL 日志，每周期一条，供外部状态 API/UI 消费。
//! 本引擎只定义报告字段与落盘，不定义对外传输协议。

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::core::error::Result;
use crate::core::model::CycleReport;

/// 报告日志写入器
pub struct ReportLog {
    path: PathBuf,
}

impl ReportLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// 追加一条周期报告
    pub async fn append(&self, report: &CycleReport) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(report)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        info!(
            "周期报告已记录: 站点 {}/{} 成功, 发现 {} 条, 通知 {} 条, 耗时 {}ms",
            report.sites_attempted - report.sites_failed.len(),
            report.sites_attempted,
            report.candidates_found,
            report.candidates_notified,
            report.duration_ms
        );
        Ok(())
    }

    /// 读取最近 `limit` 条报告（状态查询用）
    pub async fn recent(&self, limit: usize) -> Result<Vec<CycleReport>> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        let mut reports: Vec<CycleReport> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();
        if reports.len() > limit {
            reports.drain(..reports.len() - limit);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn reports_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReportLog::new(dir.path().join("reports.jsonl"));

        for i in 0..3 {
            let report = CycleReport {
                started_at: Utc::now(),
                duration_ms: 100 + i,
                sites_attempted: 5,
                sites_failed: vec![],
                candidates_found: 10,
                candidates_matched: 4,
                candidates_admitted: 2,
                candidates_notified: 2,
                channel_failures: vec![],
            };
            log.append(&report).await.unwrap();
        }

        let recent = log.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].duration_ms, 102);
    }
}
