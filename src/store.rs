//! 去重存储 (Seen Store)
//!
//! 已见指纹的持久化集合，是流水线的守门人：只有指纹无先例的候选
//! 才会进入通知阶段。`admit` 是原子的检查写入：判定与落盘在同一
//! 临界区内完成，并发（乃至重叠周期）对同一指纹的准入只会成功一次。
//!
//! 持久化格式为 JSONL 逐行追加，启动时全量加载，清理时整体重写。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::error::Result;
use crate::core::model::{Candidate, Fingerprint, SeenRecord};

struct Inner {
    seen: HashMap<Fingerprint, SeenRecord>,
    file: File,
}

/// 已见记录存储
pub struct SeenStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl SeenStore {
    /// 打开（或创建）存储文件并加载全部记录
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut seen = HashMap::new();
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let content = tokio::fs::read_to_string(&path).await?;
            for (no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<SeenRecord>(line) {
                    Ok(record) => {
                        seen.insert(record.fingerprint.clone(), record);
                    }
                    Err(e) => {
                        // 损坏行只影响自身，跳过继续加载
                        warn!("跳过损坏的已见记录 (第 {} 行): {}", no + 1, e);
                    }
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        info!("已见记录加载完成: {} 条 ({})", seen.len(), path.display());

        Ok(Self {
            path,
            inner: Mutex::new(Inner { seen, file }),
        })
    }

    /// 原子准入判定
    ///
    /// 返回 true 表示该候选是新条目，记录已落盘，调用方必须尝试通知；
    /// 返回 false 表示指纹已存在。准入是一次性承诺：后续通知失败
    /// 不会撤销记录，也不会在未来周期重新准入。
    pub async fn admit(&self, candidate: &Candidate) -> Result<bool> {
        let fingerprint = candidate.fingerprint();
        let mut inner = self.inner.lock().await;

        if inner.seen.contains_key(&fingerprint) {
            return Ok(false);
        }

        let record = SeenRecord {
            fingerprint: fingerprint.clone(),
            first_seen_at: Utc::now(),
        };

        // 判定与落盘同临界区：写失败时不保留内存记录，下个周期可重试
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        inner.file.write_all(line.as_bytes()).await?;
        inner.file.flush().await?;

        inner.seen.insert(fingerprint, record);
        Ok(true)
    }

    /// 指纹是否已存在（只读）
    pub async fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.lock().await.seen.contains_key(fingerprint)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.seen.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 清理超过保留窗口的记录并压缩文件
    ///
    /// 维护操作，不在抓取热路径上；周期开始前调用。
    pub async fn prune(&self, retention_days: u32) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(retention_days as i64);
        let mut inner = self.inner.lock().await;

        let before = inner.seen.len();
        inner.seen.retain(|_, r| r.first_seen_at >= cutoff);
        let removed = before - inner.seen.len();

        if removed > 0 {
            // 整体重写压缩，再切回追加句柄
            let mut buf = String::new();
            for record in inner.seen.values() {
                buf.push_str(&serde_json::to_string(record)?);
                buf.push('\n');
            }
            tokio::fs::write(&self.path, buf).await?;
            inner.file = OpenOptions::new().append(true).open(&self.path).await?;
            info!("已清理 {} 条过期已见记录", removed);
        }

        Ok(removed)
    }

    /// 测试辅助：以指定时间写入记录
    #[cfg(test)]
    async fn insert_at(&self, candidate: &Candidate, at: chrono::DateTime<Utc>) -> Result<()> {
        let record = SeenRecord {
            fingerprint: candidate.fingerprint(),
            first_seen_at: at,
        };
        let mut inner = self.inner.lock().await;
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        inner.file.write_all(line.as_bytes()).await?;
        inner.file.flush().await?;
        inner.seen.insert(record.fingerprint.clone(), record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(url: &str) -> Candidate {
        Candidate {
            site_id: "demo".into(),
            title: "无人机巡检服务采购公告".into(),
            url: url.into(),
            published_at: None,
            excerpt: String::new(),
        }
    }

    #[tokio::test]
    async fn admit_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeenStore::open(dir.path().join("seen.jsonl")).await.unwrap();

        let c = candidate("http://example.com/bid/1");
        assert!(store.admit(&c).await.unwrap());
        assert!(!store.admit(&c).await.unwrap());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn records_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.jsonl");

        {
            let store = SeenStore::open(&path).await.unwrap();
            assert!(store.admit(&candidate("http://example.com/bid/1")).await.unwrap());
            assert!(store.admit(&candidate("http://example.com/bid/2")).await.unwrap());
        }

        // 新实例模拟进程重启/跨周期
        let store = SeenStore::open(&path).await.unwrap();
        assert_eq!(store.len().await, 2);
        assert!(!store.admit(&candidate("http://example.com/bid/1")).await.unwrap());
        assert!(store.admit(&candidate("http://example.com/bid/3")).await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_lines_are_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.jsonl");

        {
            let store = SeenStore::open(&path).await.unwrap();
            store.admit(&candidate("http://example.com/bid/1")).await.unwrap();
        }
        let mut content = tokio::fs::read_to_string(&path).await.unwrap();
        content.push_str("not-json\n");
        tokio::fs::write(&path, content).await.unwrap();

        let store = SeenStore::open(&path).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn prune_removes_records_past_retention() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.jsonl");
        let store = SeenStore::open(&path).await.unwrap();

        let old = candidate("http://example.com/bid/old");
        let fresh = candidate("http://example.com/bid/fresh");
        store
            .insert_at(&old, Utc::now() - Duration::days(120))
            .await
            .unwrap();
        store.admit(&fresh).await.unwrap();

        let removed = store.prune(90).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!store.contains(&old.fingerprint()).await);
        // 清理后旧条目会被重新准入（保留窗口语义）
        assert!(store.admit(&old).await.unwrap());

        // 压缩后的文件可重新加载
        let reloaded = SeenStore::open(&path).await.unwrap();
        assert_eq!(reloaded.len().await, 2);
    }
}
