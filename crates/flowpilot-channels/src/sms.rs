//! Twilio SMS sender.
//!
//! Requires: Account SID + Auth Token + a purchased sender number.

use flowpilot_core::config::SmsChannelConfig;
use flowpilot_core::{FlowError, Result};

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Outbound SMS sender.
pub struct SmsSender {
    config: SmsChannelConfig,
    client: reqwest::Client,
}

impl SmsSender {
    pub fn new(config: SmsChannelConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.enabled
            && !self.config.account_sid.is_empty()
            && !self.config.auth_token.is_empty()
            && !self.config.from_number.is_empty()
    }

    /// Send a text message. Returns the provider message SID.
    pub async fn send_text(&self, to: &str, text: &str) -> Result<String> {
        if !self.is_configured() {
            return Err(FlowError::dispatch("SMS channel not configured"));
        }
        let url = format!(
            "{TWILIO_API_BASE}/Accounts/{}/Messages.json",
            self.config.account_sid
        );

        let params = [
            ("To", to),
            ("From", self.config.from_number.as_str()),
            ("Body", text),
        ];

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| FlowError::dispatch(format!("Twilio request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(FlowError::dispatch(format!(
                "Twilio API error {status}: {error_text}"
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FlowError::dispatch(format!("Invalid Twilio response: {e}")))?;

        let sid = result["sid"].as_str().unwrap_or("unknown").to_string();
        tracing::debug!("SMS sent: {} → {}", sid, to);
        Ok(sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_sender_refuses() {
        let sender = SmsSender::new(SmsChannelConfig::default());
        let err = sender.send_text("+15550001", "hi").await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
