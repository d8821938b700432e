//! Configuration loader and validator for the dispatch service.
use crate::model::ChannelKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub mailer: Mailer,
    pub gateways: Gateways,
    pub channels: Channels,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub bind_address: String,
    pub port: u16,
    pub data_dir: String,
    /// Hard ceiling on projected run duration; runs projected to exceed
    /// this are rejected before the first send.
    pub max_run_seconds: u64,
    /// Worst-case latency allowed per send call in the projection.
    pub send_latency_allowance_ms: u64,
}

/// Outbound email relay settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mailer {
    pub endpoint: String,
    pub api_key: String,
    /// Visible "To" address on every batch; batch members ride in BCC
    /// so they stay hidden from each other.
    pub primary_recipient: String,
}

/// The non-email transports. Each is optional; dispatching to a channel
/// whose gateway is unset fails before resolution. Every gateway carries
/// its own credential.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Gateways {
    pub sms: Option<Gateway>,
    pub whatsapp: Option<Gateway>,
    pub push: Option<Gateway>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Gateway {
    pub endpoint: String,
    pub api_key: String,
}

/// Per-channel batching and pacing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channels {
    pub email: ChannelSettings,
    pub sms: ChannelSettings,
    pub whatsapp: ChannelSettings,
    pub push: ChannelSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Non-zero by construction; a zero value is rejected at parse time.
    pub batch_size: NonZeroUsize,
    pub inter_batch_delay_ms: u64,
}

impl ChannelSettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Batching/pacing settings for a channel. Update and urgent share the
    /// email transport and therefore its settings.
    pub fn channel_settings(&self, channel: ChannelKind) -> &ChannelSettings {
        match channel {
            ChannelKind::Update | ChannelKind::Urgent => &self.channels.email,
            ChannelKind::Sms => &self.channels.sms,
            ChannelKind::WhatsApp => &self.channels.whatsapp,
            ChannelKind::Push => &self.channels.push,
        }
    }

    pub fn send_latency_allowance(&self) -> Duration {
        Duration::from_millis(self.app.send_latency_allowance_ms)
    }

    pub fn max_run_duration(&self) -> Duration {
        Duration::from_secs(self.app.max_run_seconds)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.max_run_seconds == 0 {
        return Err(ConfigError::Invalid("app.max_run_seconds must be > 0"));
    }

    if cfg.mailer.endpoint.trim().is_empty() {
        return Err(ConfigError::Invalid("mailer.endpoint must be non-empty"));
    }
    if cfg.mailer.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("mailer.api_key must be non-empty"));
    }
    if cfg.mailer.primary_recipient.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "mailer.primary_recipient must be non-empty",
        ));
    }

    if let Some(gw) = &cfg.gateways.sms {
        validate_gateway(
            gw,
            "gateways.sms.endpoint must be non-empty",
            "gateways.sms.api_key must be non-empty",
        )?;
    }
    if let Some(gw) = &cfg.gateways.whatsapp {
        validate_gateway(
            gw,
            "gateways.whatsapp.endpoint must be non-empty",
            "gateways.whatsapp.api_key must be non-empty",
        )?;
    }
    if let Some(gw) = &cfg.gateways.push {
        validate_gateway(
            gw,
            "gateways.push.endpoint must be non-empty",
            "gateways.push.api_key must be non-empty",
        )?;
    }

    Ok(())
}

fn validate_gateway(
    gateway: &Gateway,
    endpoint_msg: &'static str,
    key_msg: &'static str,
) -> Result<(), ConfigError> {
    if gateway.endpoint.trim().is_empty() {
        return Err(ConfigError::Invalid(endpoint_msg));
    }
    if gateway.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid(key_msg));
    }
    Ok(())
}

/// Canonical example configuration, kept in sync with the schema.
pub fn example() -> &'static str {
    r#"app:
  bind_address: "0.0.0.0"
  port: 8788
  data_dir: "./data"
  max_run_seconds: 120
  send_latency_allowance_ms: 2000

mailer:
  endpoint: "https://mail.example.org/api/send-email"
  api_key: "YOUR_MAILER_API_KEY"
  primary_recipient: "prayer-diary@example.org"

gateways:
  sms:
    endpoint: "https://gateway.example.org/api/send-sms"
    api_key: "YOUR_SMS_GATEWAY_KEY"
  whatsapp:
    endpoint: "https://gateway.example.org/api/send-whatsapp"
    api_key: "YOUR_WHATSAPP_GATEWAY_KEY"
  push:
    endpoint: "https://push.example.org/api/relay"
    api_key: "YOUR_PUSH_RELAY_KEY"

channels:
  email:
    batch_size: 30
    inter_batch_delay_ms: 3000
  sms:
    batch_size: 10
    inter_batch_delay_ms: 1000
  whatsapp:
    batch_size: 10
    inter_batch_delay_ms: 1000
  push:
    batch_size: 50
    inter_batch_delay_ms: 500
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.channels.email.batch_size.get(), 30);
        assert_eq!(cfg.channels.email.inter_batch_delay_ms, 3000);
    }

    #[test]
    fn invalid_mailer_endpoint() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.mailer.endpoint = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("mailer.endpoint")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_primary_recipient() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.mailer.primary_recipient = "  ".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("primary_recipient")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn zero_batch_size_is_rejected_at_parse_time() {
        let yaml = example().replace("batch_size: 30", "batch_size: 0");
        assert!(serde_yaml::from_str::<Config>(&yaml).is_err());
    }

    #[test]
    fn invalid_run_ceiling() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.max_run_seconds = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_gateway_credentials() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.gateways.sms.as_mut().unwrap().api_key = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("gateways.sms.api_key")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.gateways.push.as_mut().unwrap().endpoint = "  ".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("gateways.push.endpoint")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn channel_settings_routing() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        assert_eq!(
            cfg.channel_settings(ChannelKind::Urgent),
            cfg.channel_settings(ChannelKind::Update)
        );
        assert_eq!(cfg.channel_settings(ChannelKind::Push).batch_size.get(), 50);
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.app.port, 8788);
    }
}
