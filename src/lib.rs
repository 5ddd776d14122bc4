//! bidwatch: 招标公告监控引擎
//!
//! 周期性抓取配置的公告站点，经关键字与 AI 两级过滤、指纹去重后
//! 通过邮件/短信/语音/群机器人多渠道推送新公告。

pub mod core;
pub mod fetch;
pub mod filter;
pub mod notify;
pub mod report;
pub mod scheduler;
pub mod site;
pub mod store;

pub use core::config::AppConfig;
pub use core::error::{MonitorError, Result};
pub use core::event::{EventReceiver, EventSender, MonitorEvent, create_event_channel};
pub use core::model::{Candidate, CycleReport, FilterVerdict};
pub use scheduler::{CycleRunner, ScheduleController};
