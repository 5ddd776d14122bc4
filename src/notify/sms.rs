//! 短信渠道（阿里云 SendSms）

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use super::aliyun::AliyunSigner;
use super::{Channel, RecipientLedger};
use crate::core::config::SmsConfig;
use crate::core::error::{MonitorError, Result};
use crate::core::model::{Candidate, ChannelKind};

const SMS_ENDPOINT: &str = "https://dysmsapi.aliyuncs.com/";

/// 阿里云 RPC 接口统一应答
#[derive(Debug, Deserialize)]
pub(crate) struct AliyunResponse {
    #[serde(rename = "Code", default)]
    pub code: String,
    #[serde(rename = "Message", default)]
    pub message: String,
}

impl AliyunResponse {
    pub fn ok(&self) -> bool {
        self.code == "OK"
    }
}

pub struct SmsChannel {
    client: reqwest::Client,
    signer: AliyunSigner,
    sign_name: String,
    template_code: String,
    phones: Vec<String>,
    ledger: RecipientLedger,
}

impl SmsChannel {
    pub fn new(config: &SmsConfig) -> Result<Self> {
        if config.phones.is_empty() {
            return Err(MonitorError::ConfigInvalid("短信接收号码为空".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            signer: AliyunSigner::new(&config.access_key_id, &config.access_key_secret),
            sign_name: config.sign_name.clone(),
            template_code: config.template_code.clone(),
            phones: config.phones.clone(),
            ledger: RecipientLedger::new(),
        })
    }

    fn delivery_error(reason: String) -> MonitorError {
        MonitorError::ChannelDelivery {
            channel: ChannelKind::Sms.to_string(),
            reason,
        }
    }
}

#[async_trait::async_trait]
impl Channel for SmsChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn send(&self, candidate: &Candidate) -> Result<()> {
        let template_param = json!({
            "count": "1",
            "source": candidate.site_id,
        })
        .to_string();

        // 重试时只补发上次未成功的号码
        let key = candidate.fingerprint();
        for phone in &self.ledger.pending(key.as_str(), &self.phones) {
            let mut params = self.signer.common_params();
            params.push(("Action".into(), "SendSms".into()));
            params.push(("PhoneNumbers".into(), phone.clone()));
            params.push(("SignName".into(), self.sign_name.clone()));
            params.push(("TemplateCode".into(), self.template_code.clone()));
            params.push(("TemplateParam".into(), template_param.clone()));
            let params = self.signer.sign("POST", params)?;

            let response: AliyunResponse = self
                .client
                .post(SMS_ENDPOINT)
                .form(&params)
                .send()
                .await?
                .json()
                .await?;

            if !response.ok() {
                return Err(Self::delivery_error(format!(
                    "{} [{}]: {}",
                    phone, response.code, response.message
                )));
            }
            self.ledger.mark(key.as_str(), phone);
        }
        self.ledger.clear(key.as_str(), &self.phones);
        Ok(())
    }
}
