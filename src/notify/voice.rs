//! 语音渠道（阿里云 SingleCallByTts）

use std::time::Duration;

use serde_json::json;

use super::aliyun::AliyunSigner;
use super::sms::AliyunResponse;
use super::{Channel, RecipientLedger};
use crate::core::config::VoiceConfig;
use crate::core::error::{MonitorError, Result};
use crate::core::model::{Candidate, ChannelKind};

const VOICE_ENDPOINT: &str = "https://dyvmsapi.aliyuncs.com/";

pub struct VoiceChannel {
    client: reqwest::Client,
    signer: AliyunSigner,
    tts_code: String,
    phones: Vec<String>,
    ledger: RecipientLedger,
}

impl VoiceChannel {
    pub fn new(config: &VoiceConfig) -> Result<Self> {
        if config.phones.is_empty() {
            return Err(MonitorError::ConfigInvalid("语音呼叫号码为空".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            signer: AliyunSigner::new(&config.access_key_id, &config.access_key_secret),
            tts_code: config.tts_code.clone(),
            phones: config.phones.clone(),
            ledger: RecipientLedger::new(),
        })
    }
}

#[async_trait::async_trait]
impl Channel for VoiceChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Voice
    }

    async fn send(&self, candidate: &Candidate) -> Result<()> {
        let tts_param = json!({
            "count": "1",
            "source": candidate.site_id,
        })
        .to_string();

        // 重试时只补发上次未成功的号码
        let key = candidate.fingerprint();
        for phone in &self.ledger.pending(key.as_str(), &self.phones) {
            let mut params = self.signer.common_params();
            params.push(("Action".into(), "SingleCallByTts".into()));
            params.push(("CalledNumber".into(), phone.clone()));
            params.push(("TtsCode".into(), self.tts_code.clone()));
            params.push(("TtsParam".into(), tts_param.clone()));
            let params = self.signer.sign("GET", params)?;

            let response: AliyunResponse = self
                .client
                .get(VOICE_ENDPOINT)
                .query(&params)
                .send()
                .await?
                .json()
                .await?;

            if !response.ok() {
                return Err(MonitorError::ChannelDelivery {
                    channel: ChannelKind::Voice.to_string(),
                    reason: format!("{} [{}]: {}", phone, response.code, response.message),
                });
            }
            self.ledger.mark(key.as_str(), phone);
        }
        self.ledger.clear(key.as_str(), &self.phones);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_phone_list_rejected_at_build() {
        let config = VoiceConfig::builder()
            .access_key_id("id".to_string())
            .access_key_secret("secret".to_string())
            .tts_code("TTS_123".to_string())
            .phones(Vec::new())
            .build();
        assert!(VoiceChannel::new(&config).is_err());
    }
}
