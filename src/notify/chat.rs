//! 聊天推送渠道（群机器人 Webhook）
//!
//! 兼容企业微信/钉钉式的 `{"msgtype":"text"}` 消息体。

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use super::Channel;
use crate::core::config::ChatConfig;
use crate::core::error::{MonitorError, Result};
use crate::core::model::{Candidate, ChannelKind};

pub struct ChatChannel {
    client: reqwest::Client,
    webhook_url: String,
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

impl ChatChannel {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        if config.webhook_url.is_empty() {
            return Err(MonitorError::ConfigInvalid("Webhook 地址为空".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            webhook_url: config.webhook_url.clone(),
        })
    }

    fn render(candidate: &Candidate) -> String {
        format!(
            "【招标监控】发现新公告\n来源: {}\n标题: {}\n日期: {}\n链接: {}",
            candidate.site_id,
            candidate.title,
            candidate.published_at.as_deref().unwrap_or("未知"),
            candidate.url
        )
    }
}

#[async_trait::async_trait]
impl Channel for ChatChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Chat
    }

    async fn send(&self, candidate: &Candidate) -> Result<()> {
        let payload = json!({
            "msgtype": "text",
            "text": { "content": Self::render(candidate) },
        });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        let body: WebhookResponse = response.json().await?;
        if body.errcode != 0 {
            return Err(MonitorError::ChannelDelivery {
                channel: ChannelKind::Chat.to_string(),
                reason: format!("[{}] {}", body.errcode, body.errmsg),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_carries_title_and_link() {
        let candidate = Candidate {
            site_id: "site-a".into(),
            title: "风机采购招标公告".into(),
            url: "https://a.example/notice/9".into(),
            published_at: None,
            excerpt: String::new(),
        };
        let text = ChatChannel::render(&candidate);
        assert!(text.contains("风机采购招标公告"));
        assert!(text.contains("https://a.example/notice/9"));
        assert!(text.contains("未知"));
    }

    #[test]
    fn empty_webhook_rejected_at_build() {
        let config = ChatConfig::builder().webhook_url(String::new()).build();
        assert!(ChatChannel::new(&config).is_err());
    }
}
