use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;

use crate::core_types::Currency;
use crate::funding::{CompensationPolicy, FinalizationConfig};
use crate::settlement::ReconcilerConfig;
use crate::validation::AddressRules;

pub const ENV_API_TOKEN: &str = "CHATPAY_API_TOKEN";
pub const ENV_WEBHOOK_SECRET: &str = "CHATPAY_WEBHOOK_SECRET";
pub const ENV_RELAY_SECRET: &str = "CHATPAY_RELAY_SECRET";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    /// Absent: in-memory store (dev only, nothing survives a restart)
    #[serde(default)]
    pub postgres_url: Option<String>,
    pub crypto_pay: CryptoPayConfig,
    /// Shared secret of the settlement webhook
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default)]
    pub relay: RelayConfig,
    pub currencies: Vec<Currency>,
    #[serde(default)]
    pub compensation_policy: CompensationPolicy,
    #[serde(default)]
    pub address: AddressRules,
    #[serde(default)]
    pub workers: WorkersConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CryptoPayConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// Chat relay that delivers outgoing messages
///
/// Without `url` replies are only logged.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub url: Option<String>,
    /// Expected in `X-Relay-Secret` on inbound events and sent on outbound commands
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkersConfig {
    #[serde(default)]
    pub finalization: FinalizationConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default = "default_true")]
    pub reconciler_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Load `config/<env>.yaml`, then apply secret overrides from the environment
    pub fn load(env: &str) -> Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path))?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Secrets are kept out of the YAML files
    pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(token) = var(ENV_API_TOKEN) {
            self.crypto_pay.api_token = token;
        }
        if let Some(secret) = var(ENV_WEBHOOK_SECRET) {
            self.webhook_secret = secret;
        }
        if let Some(secret) = var(ENV_RELAY_SECRET) {
            self.relay.secret = Some(secret);
        }
        if let Some(url) = var(ENV_DATABASE_URL) {
            self.postgres_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.currencies.is_empty() {
            bail!("at least one currency must be configured");
        }
        if self.address.min_len > self.address.max_len {
            bail!(
                "address.min_len {} exceeds address.max_len {}",
                self.address.min_len,
                self.address.max_len
            );
        }
        Ok(())
    }
}
