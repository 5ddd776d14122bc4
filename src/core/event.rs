//! 事件系统定义
//!
//! 引擎与外部状态侧（GUI/状态 API）之间的完全解耦通信通道。
//! 引擎只负责发送，消费端自由决定展示方式。

use flume::{Receiver, Sender};

use crate::core::model::{ChannelKind, CycleReport};

/// 监控事件类型
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// 周期开始
    CycleStarted { sites: usize },

    /// 单站点抓取开始
    SiteStarted { site_id: String },

    /// 单站点抓取完成
    SiteCompleted { site_id: String, candidates: usize },

    /// 单站点抓取失败（不中断周期）
    SiteFailed { site_id: String, reason: String },

    /// AI 判定降级（超时/服务异常，候选按通过处理）
    AiFellOpen { title: String, reason: String },

    /// 新条目通过去重进入通知阶段
    CandidateAdmitted { site_id: String, title: String },

    /// 单渠道投递成功
    NotificationSent { channel: ChannelKind, title: String },

    /// 单渠道投递重试耗尽
    NotificationFailed {
        channel: ChannelKind,
        title: String,
        reason: String,
    },

    /// 周期结束，携带完整报告
    CycleFinished(Box<CycleReport>),

    /// 周期被取消（停机）
    CycleCancelled,
}

/// 事件发送器
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<MonitorEvent>,
}

impl EventSender {
    pub fn new(tx: Sender<MonitorEvent>) -> Self {
        Self { tx }
    }

    /// 发送事件（消费端已退出时静默丢弃）
    pub fn emit(&self, event: MonitorEvent) {
        let _ = self.tx.send(event);
    }
}

/// 事件接收器
pub struct EventReceiver {
    rx: Receiver<MonitorEvent>,
}

impl EventReceiver {
    pub fn new(rx: Receiver<MonitorEvent>) -> Self {
        Self { rx }
    }

    /// 非阻塞接收事件
    pub fn try_recv(&self) -> Option<MonitorEvent> {
        self.rx.try_recv().ok()
    }

    /// 异步接收事件
    pub async fn recv_async(&self) -> Option<MonitorEvent> {
        self.rx.recv_async().await.ok()
    }

    /// 获取内部接收器引用
    pub fn inner(&self) -> &Receiver<MonitorEvent> {
        &self.rx
    }
}

/// 创建事件通道
pub fn create_event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = flume::unbounded();
    (EventSender::new(tx), EventReceiver::new(rx))
}
