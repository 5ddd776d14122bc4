//! 阿里云 RPC 签名 (Aliyun RPC Signature v1.0)
//!
//! 短信与语音渠道共用的请求签名：参数按名排序、特殊百分号编码、
//! HMAC-SHA1（密钥为 `AccessKeySecret&`）、Base64 输出。

use base64::prelude::*;
use chrono::Utc;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rand::Rng;
use sha1::Sha1;

use crate::core::error::{MonitorError, Result};

type HmacSha1 = Hmac<Sha1>;

/// 阿里云编码规则：字母数字与 `-_.~` 之外全部转义
const ALIYUN_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn encode(s: &str) -> String {
    utf8_percent_encode(s, ALIYUN_ENCODE_SET).to_string()
}

/// 签名器
pub struct AliyunSigner {
    access_key_id: String,
    access_key_secret: String,
}

impl AliyunSigner {
    pub fn new(access_key_id: impl Into<String>, access_key_secret: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            access_key_secret: access_key_secret.into(),
        }
    }

    /// 公共参数（每次请求重新生成 Nonce 与 Timestamp）
    pub fn common_params(&self) -> Vec<(String, String)> {
        let nonce: u64 = rand::rng().random();
        vec![
            ("AccessKeyId".into(), self.access_key_id.clone()),
            ("Format".into(), "JSON".into()),
            ("RegionId".into(), "cn-hangzhou".into()),
            ("SignatureMethod".into(), "HMAC-SHA1".into()),
            ("SignatureNonce".into(), nonce.to_string()),
            ("SignatureVersion".into(), "1.0".into()),
            (
                "Timestamp".into(),
                Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            ),
            ("Version".into(), "2017-05-25".into()),
        ]
    }

    /// 对参数集签名，返回追加了 `Signature` 的完整参数表
    pub fn sign(
        &self,
        method: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<Vec<(String, String)>> {
        params.sort_by(|a, b| a.0.cmp(&b.0));

        let canonical = params
            .iter()
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let string_to_sign = format!("{}&%2F&{}", method, encode(&canonical));

        let key = format!("{}&", self.access_key_secret);
        let mut mac = HmacSha1::new_from_slice(key.as_bytes())
            .map_err(|e| MonitorError::Custom(format!("HMAC 初始化失败: {e}")))?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

        params.push(("Signature".into(), signature));
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_follows_aliyun_rules() {
        assert_eq!(encode("a b*c~d"), "a%20b%2Ac~d");
        assert_eq!(encode("SendSms"), "SendSms");
    }

    #[test]
    fn signature_is_deterministic_for_fixed_params() {
        let signer = AliyunSigner::new("testid", "testsecret");
        let params = vec![
            ("Action".to_string(), "SendSms".to_string()),
            ("PhoneNumbers".to_string(), "13800000000".to_string()),
        ];
        let a = signer.sign("POST", params.clone()).unwrap();
        let b = signer.sign("POST", params).unwrap();
        assert_eq!(a.last(), b.last());
        assert_eq!(a.last().unwrap().0, "Signature");
    }
}
