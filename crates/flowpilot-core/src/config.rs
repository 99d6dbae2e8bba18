//! FlowPilot configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{FlowError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Directory holding the sqlite databases.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

fn default_data_dir() -> String {
    "~/.flowpilot".into()
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            sweep: SweepConfig::default(),
            gateway: GatewayConfig::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

impl FlowConfig {
    /// Default home directory (~/.flowpilot).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".flowpilot")
    }

    /// Default config path (~/.flowpilot/config.toml).
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Load from a TOML file; missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| FlowError::Config(format!("parse {}: {e}", path.display())))
    }

    /// Save to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| FlowError::Config(format!("serialize: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolve `data_dir` with `~` expansion.
    pub fn resolved_data_dir(&self) -> PathBuf {
        if let Some(rest) = self.data_dir.strip_prefix("~/") {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(rest)
        } else {
            PathBuf::from(&self.data_dir)
        }
    }
}

/// Sweep loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
    /// Max due actions fired per tick per tenant.
    #[serde(default = "default_sweep_batch")]
    pub batch_size: usize,
}

fn default_sweep_interval() -> u64 {
    30
}
fn default_sweep_batch() -> usize {
    100
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
            batch_size: default_sweep_batch(),
        }
    }
}

/// HTTP gateway settings (approval + monitoring surface).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    4600
}
fn default_true() -> bool {
    true
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Outbound channel credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub whatsapp: WhatsAppChannelConfig,
    #[serde(default)]
    pub email: EmailChannelConfig,
    #[serde(default)]
    pub sms: SmsChannelConfig,
}

/// WhatsApp Business Cloud API credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhatsAppChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Facebook Graph API access token.
    #[serde(default)]
    pub access_token: String,
    /// WhatsApp Phone Number ID.
    #[serde(default)]
    pub phone_number_id: String,
}

/// SMTP sending credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".into()
}
fn default_smtp_port() -> u16 {
    587
}

impl Default for EmailChannelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            email: String::new(),
            password: String::new(),
            display_name: None,
        }
    }
}

/// Twilio SMS credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmsChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub auth_token: String,
    /// Sender phone number in E.164 form.
    #[serde(default)]
    pub from_number: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FlowConfig::default();
        assert_eq!(config.sweep.interval_secs, 30);
        assert_eq!(config.gateway.port, 4600);
        assert!(!config.channels.whatsapp.enabled);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            data_dir = "/var/lib/flowpilot"

            [sweep]
            interval_secs = 10

            [channels.whatsapp]
            enabled = true
            access_token = "tok"
            phone_number_id = "123"
        "#;

        let config: FlowConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.data_dir, "/var/lib/flowpilot");
        assert_eq!(config.sweep.interval_secs, 10);
        assert!(config.channels.whatsapp.enabled);
        assert_eq!(config.channels.whatsapp.phone_number_id, "123");
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: FlowConfig = toml::from_str("").unwrap();
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.channels.email.smtp_port, 587);
    }

    #[test]
    fn test_home_dir() {
        let home = FlowConfig::home_dir();
        assert!(home.to_string_lossy().contains("flowpilot"));
    }
}
