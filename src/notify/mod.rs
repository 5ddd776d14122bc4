//! 通知分发 (notification dispatch)
//!
//! 多渠道扇出：每个候选 × 每个渠道是一个独立任务，指数退避重试，
//! 单渠道失败不影响其他渠道或其他候选。

pub mod aliyun;
pub mod chat;
pub mod email;
pub mod sms;
pub mod voice;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::config::ChannelsConfig;
use crate::core::error::Result;
use crate::core::event::{EventSender, MonitorEvent};
use crate::core::model::{Candidate, ChannelFailure, ChannelKind};

pub use chat::ChatChannel;
pub use email::EmailChannel;
pub use sms::SmsChannel;
pub use voice::VoiceChannel;

/// 通知渠道
#[async_trait]
pub trait Channel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// 发送单条通知，失败时返回错误由分发器重试
    async fn send(&self, candidate: &Candidate) -> Result<()>;
}

/// 渠道内部的收件人投递账本
///
/// 多收件人渠道（短信/语音）部分失败重试时，只重发仍未成功的号码。
pub(crate) struct RecipientLedger {
    delivered: parking_lot::Mutex<std::collections::HashSet<String>>,
}

impl RecipientLedger {
    pub(crate) fn new() -> Self {
        Self {
            delivered: parking_lot::Mutex::new(std::collections::HashSet::new()),
        }
    }

    fn entry(key: &str, recipient: &str) -> String {
        format!("{key}\n{recipient}")
    }

    /// 该候选下仍未成功投递的收件人
    pub(crate) fn pending(&self, key: &str, recipients: &[String]) -> Vec<String> {
        let delivered = self.delivered.lock();
        recipients
            .iter()
            .filter(|r| !delivered.contains(&Self::entry(key, r)))
            .cloned()
            .collect()
    }

    pub(crate) fn mark(&self, key: &str, recipient: &str) {
        self.delivered.lock().insert(Self::entry(key, recipient));
    }

    /// 候选全部送达后回收记录
    pub(crate) fn clear(&self, key: &str, recipients: &[String]) {
        let mut delivered = self.delivered.lock();
        for recipient in recipients {
            delivered.remove(&Self::entry(key, recipient));
        }
    }
}

/// 单个投递任务（候选 × 渠道）
struct NotificationJob {
    candidate_idx: usize,
    candidate: Candidate,
    channel: Arc<dyn Channel>,
}

/// 一轮分发的汇总结果
#[derive(Debug, Default)]
pub struct DispatchSummary {
    /// 至少有一个渠道成功送达的候选数
    pub notified: usize,
    pub failures: Vec<ChannelFailure>,
}

/// 通知分发器
pub struct Dispatcher {
    channels: Vec<Arc<dyn Channel>>,
    max_attempts: u32,
    concurrency: usize,
    events: Option<EventSender>,
}

impl Dispatcher {
    pub fn new(channels: Vec<Arc<dyn Channel>>, config: &ChannelsConfig) -> Self {
        Self {
            channels,
            max_attempts: config.max_attempts.max(1),
            concurrency: config.concurrency.max(1),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// 从配置构建全部已启用的渠道
    pub fn from_config(config: &ChannelsConfig) -> Result<Self> {
        let mut channels: Vec<Arc<dyn Channel>> = Vec::new();
        if let Some(email) = &config.email {
            channels.push(Arc::new(EmailChannel::new(email)?));
        }
        if let Some(sms) = &config.sms {
            channels.push(Arc::new(SmsChannel::new(sms)?));
        }
        if let Some(voice) = &config.voice {
            channels.push(Arc::new(VoiceChannel::new(voice)?));
        }
        if let Some(chat) = &config.chat {
            channels.push(Arc::new(ChatChannel::new(chat)?));
        }
        Ok(Self::new(channels, config))
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// 分发候选到全部渠道
    ///
    /// 每个 (候选, 渠道) 对独立重试，整体受并发上限约束。
    /// 取消后不再发起新的尝试，已在途的尝试完成后退出。
    pub async fn dispatch(
        &self,
        candidates: &[Candidate],
        cancel: &CancellationToken,
    ) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        if candidates.is_empty() || self.channels.is_empty() {
            return summary;
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (candidate_idx, candidate) in candidates.iter().enumerate() {
            for channel in &self.channels {
                let job = NotificationJob {
                    candidate_idx,
                    candidate: candidate.clone(),
                    channel: Arc::clone(channel),
                };
                let semaphore = Arc::clone(&semaphore);
                let cancel = cancel.clone();
                let max_attempts = self.max_attempts;
                tasks.spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return DeliveryOutcome::Cancelled;
                    };
                    deliver(job, max_attempts, cancel).await
                });
            }
        }

        let mut delivered: HashSet<usize> = HashSet::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok(outcome) = joined else { continue };
            match outcome {
                DeliveryOutcome::Sent { candidate_idx, kind, title, url } => {
                    delivered.insert(candidate_idx);
                    if let Some(events) = &self.events {
                        events.emit(MonitorEvent::NotificationSent {
                            channel: kind,
                            title: title.clone(),
                        });
                    }
                    info!(channel = %kind, url = %url, "通知发送成功");
                }
                DeliveryOutcome::Failed { failure, title } => {
                    if let Some(events) = &self.events {
                        events.emit(MonitorEvent::NotificationFailed {
                            channel: failure.channel,
                            title,
                            reason: failure.reason.clone(),
                        });
                    }
                    warn!(
                        channel = %failure.channel,
                        url = %failure.candidate_url,
                        reason = %failure.reason,
                        "通知发送失败"
                    );
                    summary.failures.push(failure);
                }
                DeliveryOutcome::Cancelled => {}
            }
        }

        summary.notified = delivered.len();
        summary
    }
}

enum DeliveryOutcome {
    Sent {
        candidate_idx: usize,
        kind: ChannelKind,
        title: String,
        url: String,
    },
    Failed {
        failure: ChannelFailure,
        title: String,
    },
    Cancelled,
}

/// 带指数退避的单任务投递
async fn deliver(
    job: NotificationJob,
    max_attempts: u32,
    cancel: CancellationToken,
) -> DeliveryOutcome {
    let kind = job.channel.kind();
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return DeliveryOutcome::Cancelled;
        }
        match job.channel.send(&job.candidate).await {
            Ok(()) => {
                return DeliveryOutcome::Sent {
                    candidate_idx: job.candidate_idx,
                    kind,
                    title: job.candidate.title.clone(),
                    url: job.candidate.url.clone(),
                };
            }
            Err(e) => {
                last_error = e.to_string();
                if attempt < max_attempts {
                    let backoff = Duration::from_secs(2u64.pow(attempt).min(60));
                    warn!(
                        channel = %kind,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        "发送失败，稍后重试: {last_error}"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => return DeliveryOutcome::Cancelled,
                    }
                }
            }
        }
    }

    DeliveryOutcome::Failed {
        failure: ChannelFailure {
            channel: kind,
            candidate_url: job.candidate.url.clone(),
            reason: last_error,
        },
        title: job.candidate.title.clone(),
    }
}
