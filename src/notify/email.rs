//! 邮件渠道 (SMTP)

use lettre::message::{Mailbox, Message, MultiPart};
use lettre::transport::smtp::{AsyncSmtpTransport, authentication::Credentials};
use lettre::{AsyncTransport, Tokio1Executor};

use super::Channel;
use crate::core::config::EmailConfig;
use crate::core::error::{MonitorError, Result};
use crate::core::model::{Candidate, ChannelKind};

pub struct EmailChannel {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailChannel {
    /// 地址解析与连接参数在构建期校验，运行期只剩投递失败一种错误
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let from: Mailbox = config.sender.parse().map_err(|_| {
            MonitorError::ConfigInvalid(format!("发件人地址无效: {}", config.sender))
        })?;
        let to = config
            .receivers
            .iter()
            .map(|addr| {
                addr.parse().map_err(|_| {
                    MonitorError::ConfigInvalid(format!("收件人地址无效: {addr}"))
                })
            })
            .collect::<Result<Vec<Mailbox>>>()?;
        if to.is_empty() {
            return Err(MonitorError::ConfigInvalid("收件人列表为空".into()));
        }

        let creds = Credentials::new(config.sender.clone(), config.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_server)
            .map_err(|e| {
                MonitorError::ConfigInvalid(format!(
                    "SMTP 服务器无效 {}: {e}",
                    config.smtp_server
                ))
            })?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        Ok(Self { mailer, from, to })
    }

    fn render(candidate: &Candidate) -> (String, String) {
        let date = candidate.published_at.as_deref().unwrap_or("未知日期");
        let plain = format!(
            "来源: {}\n标题: {}\n日期: {}\n链接: {}\n",
            candidate.site_id, candidate.title, date, candidate.url
        );
        let html = format!(
            "<div style=\"font-family: sans-serif\">\
             <h3>发现新公告</h3>\
             <p><b>来源:</b> {}</p>\
             <p><b>标题:</b> <a href=\"{}\">{}</a></p>\
             <p><b>日期:</b> {}</p>\
             </div>",
            candidate.site_id, candidate.url, candidate.title, date
        );
        (plain, html)
    }
}

#[async_trait::async_trait]
impl Channel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, candidate: &Candidate) -> Result<()> {
        let subject = format!("【招标监控】{}", candidate.title);
        let (plain, html) = Self::render(candidate);

        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for mailbox in &self.to {
            builder = builder.to(mailbox.clone());
        }
        let message = builder
            .multipart(MultiPart::alternative_plain_html(plain, html))
            .map_err(|e| MonitorError::ChannelDelivery {
                channel: ChannelKind::Email.to_string(),
                reason: format!("构建邮件失败: {e}"),
            })?;

        self.mailer
            .send(message)
            .await
            .map_err(|e| MonitorError::ChannelDelivery {
                channel: ChannelKind::Email.to_string(),
                reason: format!("SMTP 投递失败: {e}"),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EmailConfig;

    fn base_config() -> EmailConfig {
        EmailConfig::builder()
            .smtp_server("smtp.example.com".to_string())
            .smtp_port(465)
            .sender("monitor@example.com".to_string())
            .password("secret".to_string())
            .receivers(vec!["ops@example.com".to_string()])
            .build()
    }

    #[test]
    fn invalid_sender_rejected_at_build() {
        let mut config = base_config();
        config.sender = "not-an-address".into();
        assert!(EmailChannel::new(&config).is_err());
    }

    #[test]
    fn empty_receivers_rejected_at_build() {
        let mut config = base_config();
        config.receivers.clear();
        assert!(EmailChannel::new(&config).is_err());
    }

    #[test]
    fn render_includes_link_and_source() {
        let candidate = Candidate {
            site_id: "site-a".into(),
            title: "设备采购公告".into(),
            url: "https://a.example/notice/1".into(),
            published_at: Some("2026-08-01".into()),
            excerpt: String::new(),
        };
        let (plain, html) = EmailChannel::render(&candidate);
        assert!(plain.contains("https://a.example/notice/1"));
        assert!(html.contains("href=\"https://a.example/notice/1\""));
        assert!(html.contains("site-a"));
    }
}
