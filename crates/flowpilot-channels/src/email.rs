//! SMTP email sender (async lettre). Supports Gmail, Outlook, custom servers.

use flowpilot_core::config::EmailChannelConfig;
use flowpilot_core::{FlowError, Result};

/// Outbound SMTP sender.
pub struct EmailSender {
    config: EmailChannelConfig,
}

impl EmailSender {
    pub fn new(config: EmailChannelConfig) -> Self {
        Self { config }
    }

    pub fn is_configured(&self) -> bool {
        self.config.enabled && !self.config.email.is_empty() && !self.config.password.is_empty()
    }

    /// Send a plain-text email via SMTP (STARTTLS).
    pub async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        use lettre::{
            AsyncSmtpTransport, AsyncTransport, Message, message::Mailbox,
            message::header::ContentType, transport::smtp::authentication::Credentials,
        };

        if !self.is_configured() {
            return Err(FlowError::dispatch("email channel not configured"));
        }

        let from_name = self.config.display_name.as_deref().unwrap_or("FlowPilot");
        let from_mailbox: Mailbox = format!("{from_name} <{}>", self.config.email)
            .parse()
            .map_err(|e| FlowError::dispatch(format!("Invalid from: {e}")))?;

        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| FlowError::dispatch(format!("Invalid to: {e}")))?;

        let email = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| FlowError::dispatch(format!("Build email: {e}")))?;

        let creds = Credentials::new(self.config.email.clone(), self.config.password.clone());

        let mailer =
            AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&self.config.smtp_host)
                .map_err(|e| FlowError::dispatch(format!("SMTP relay: {e}")))?
                .port(self.config.smtp_port)
                .credentials(creds)
                .build();

        mailer
            .send(email)
            .await
            .map_err(|e| FlowError::dispatch(format!("SMTP send: {e}")))?;

        tracing::info!("📤 Email sent to: {to}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_sender_refuses() {
        let sender = EmailSender::new(EmailChannelConfig::default());
        let err = sender.send("a@b.com", "s", "b").await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
