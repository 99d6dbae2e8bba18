//! WhatsApp Business Cloud API sender.
//!
//! Uses the official WhatsApp Business Platform (Cloud API) for messaging.
//! Requires: Access Token + Phone Number ID from Meta Business Suite.

use flowpilot_core::config::WhatsAppChannelConfig;
use flowpilot_core::{FlowError, Result};

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v21.0";

/// Outbound WhatsApp sender.
pub struct WhatsAppSender {
    config: WhatsAppChannelConfig,
    client: reqwest::Client,
}

impl WhatsAppSender {
    pub fn new(config: WhatsAppChannelConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.enabled
            && !self.config.access_token.is_empty()
            && !self.config.phone_number_id.is_empty()
    }

    /// Send a text message via the Cloud API. Returns the provider message id.
    pub async fn send_text(&self, to: &str, text: &str) -> Result<String> {
        if !self.is_configured() {
            return Err(FlowError::dispatch("WhatsApp channel not configured"));
        }
        let url = format!("{GRAPH_API_BASE}/{}/messages", self.config.phone_number_id);

        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": {
                "preview_url": false,
                "body": text
            }
        });

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.config.access_token),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| FlowError::dispatch(format!("WhatsApp API request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(FlowError::dispatch(format!(
                "WhatsApp API error {status}: {error_text}"
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FlowError::dispatch(format!("Invalid WhatsApp response: {e}")))?;

        let msg_id = result["messages"][0]["id"]
            .as_str()
            .unwrap_or("unknown")
            .to_string();

        tracing::debug!("WhatsApp message sent: {} → {}", msg_id, to);
        Ok(msg_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_sender_refuses() {
        let sender = WhatsAppSender::new(WhatsAppChannelConfig::default());
        assert!(!sender.is_configured());
        let err = sender.send_text("+15550001", "hi").await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
