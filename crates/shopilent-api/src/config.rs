//! Process configuration.
//!
//! Loaded from an optional TOML file, then overridden by `SHOPILENT_*`
//! environment variables. Every field has a default so an empty file is
//! valid; only the database URL has no sensible default outside development.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use shopilent_core::{Principal, Role};
use shopilent_outbox::{OutboxConfig, RetryPolicy};
use shopilent_payments::WebhookSettings;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub outbox: OutboxSettings,

    #[serde(default)]
    pub webhooks: WebhookConfig,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub auth: AuthSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    /// Apply migrations on startup.
    pub migrate: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/shopilent".to_string(),
            max_connections: 10,
            migrate: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxSettings {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    pub batch_size: usize,
    pub lease_secs: u64,
    pub max_retries: i32,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub jitter: bool,
    pub retention_days: u64,
    pub sweep_interval_secs: u64,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        let config = OutboxConfig::default();
        Self {
            enabled: true,
            poll_interval_secs: config.poll_interval.as_secs(),
            batch_size: config.batch_size,
            lease_secs: config.lease.as_secs(),
            max_retries: config.retry.max_retries,
            base_backoff_secs: config.retry.base_backoff.as_secs(),
            max_backoff_secs: config.retry.max_backoff.as_secs(),
            jitter: config.retry.jitter,
            retention_days: config.retention.as_secs() / 86_400,
            sweep_interval_secs: config.sweep_interval.as_secs(),
        }
    }
}

impl OutboxSettings {
    pub fn to_config(&self) -> OutboxConfig {
        OutboxConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            batch_size: self.batch_size.max(1),
            lease: Duration::from_secs(self.lease_secs),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_backoff: Duration::from_secs(self.base_backoff_secs),
                max_backoff: Duration::from_secs(self.max_backoff_secs),
                jitter: self.jitter,
            },
            retention: Duration::from_secs(self.retention_days.saturating_mul(86_400)),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub tolerance_secs: u64,
    pub max_conflict_retries: u32,
    /// Keyed by provider name, e.g. `stripe`.
    pub providers: HashMap<String, ProviderSettings>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        let defaults = WebhookSettings::default();
        Self {
            tolerance_secs: defaults.tolerance.as_secs(),
            max_conflict_retries: defaults.max_conflict_retries,
            providers: HashMap::new(),
        }
    }
}

impl WebhookConfig {
    pub fn to_settings(&self) -> WebhookSettings {
        WebhookSettings {
            tolerance: Duration::from_secs(self.tolerance_secs),
            max_conflict_retries: self.max_conflict_retries,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub secret: String,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub order_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { order_ttl_secs: 30 }
    }
}

/// Static bearer tokens. Token issuance lives outside this service.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub tokens: HashMap<String, TokenGrant>,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthSettings {
    pub fn principals(&self) -> HashMap<String, Principal> {
        self.tokens
            .iter()
            .map(|(token, grant)| (token.clone(), Principal::new(grant.user_id, grant.role)))
            .collect()
    }
}

impl Settings {
    /// Read `path` if given, otherwise start from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `SHOPILENT_*` overrides from the process environment.
    pub fn with_env(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = lookup("SHOPILENT_DATABASE_URL").or_else(|| lookup("DATABASE_URL")) {
            self.database.url = url;
        }
        if let Some(host) = lookup("SHOPILENT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("SHOPILENT_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("SHOPILENT_PORT is not a port number: {port}"))?;
        }
        if let Some(secret) = lookup("SHOPILENT_STRIPE_WEBHOOK_SECRET") {
            self.webhooks
                .providers
                .insert("stripe".to_string(), ProviderSettings { secret });
        }
        if let Some(enabled) = lookup("SHOPILENT_OUTBOX_ENABLED") {
            self.outbox.enabled = parse_bool(&enabled)
                .with_context(|| format!("SHOPILENT_OUTBOX_ENABLED is not a boolean: {enabled}"))?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            bail!("database.url must be set");
        }
        if self.outbox.poll_interval_secs == 0 {
            bail!("outbox.poll_interval_secs must be positive");
        }
        if self.outbox.lease_secs == 0 {
            bail!("outbox.lease_secs must be positive");
        }
        if self.outbox.max_retries < 1 {
            bail!("outbox.max_retries must be at least 1");
        }
        if self.outbox.base_backoff_secs > self.outbox.max_backoff_secs {
            bail!("outbox.base_backoff_secs exceeds outbox.max_backoff_secs");
        }
        if self.webhooks.tolerance_secs == 0 {
            bail!("webhooks.tolerance_secs must be positive");
        }
        for (name, provider) in &self.webhooks.providers {
            if provider.secret.trim().is_empty() {
                bail!("webhooks.providers.{name}.secret is empty");
            }
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.outbox.max_retries, 5);
        assert_eq!(settings.webhooks.tolerance_secs, 300);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn parses_full_file() {
        let user = Uuid::new_v4();
        let settings = Settings::from_toml(&format!(
            r#"
            [server]
            port = 9000

            [outbox]
            batch_size = 10
            max_retries = 3
            retention_days = 2

            [webhooks]
            tolerance_secs = 120

            [webhooks.providers.stripe]
            secret = "whsec_abc"

            [auth.tokens.admin-token]
            user_id = "{user}"
            role = "Admin"
            "#
        ))
        .unwrap();

        assert_eq!(settings.server.address(), "0.0.0.0:9000");
        let outbox = settings.outbox.to_config();
        assert_eq!(outbox.batch_size, 10);
        assert_eq!(outbox.retry.max_retries, 3);
        assert_eq!(outbox.retention, Duration::from_secs(2 * 86_400));
        assert_eq!(settings.webhooks.to_settings().tolerance, Duration::from_secs(120));
        assert_eq!(settings.webhooks.providers["stripe"].secret, "whsec_abc");

        let principals = settings.auth.principals();
        assert_eq!(principals["admin-token"], Principal::new(user, Role::Admin));
    }

    #[test]
    fn environment_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("SHOPILENT_DATABASE_URL", "postgres://db/shop"),
            ("SHOPILENT_PORT", "7000"),
            ("SHOPILENT_STRIPE_WEBHOOK_SECRET", "whsec_env"),
            ("SHOPILENT_OUTBOX_ENABLED", "off"),
        ]
        .into_iter()
        .collect();

        let settings = Settings::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.database.url, "postgres://db/shop");
        assert_eq!(settings.server.port, 7000);
        assert_eq!(settings.webhooks.providers["stripe"].secret, "whsec_env");
        assert!(!settings.outbox.enabled);
    }

    #[test]
    fn bad_values_are_reported() {
        let err = Settings::default()
            .with_overrides(|key| (key == "SHOPILENT_PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("SHOPILENT_PORT"));

        let mut settings = Settings::default();
        settings.outbox.max_retries = 0;
        assert!(settings.validate().is_err());

        settings = Settings::default();
        settings.outbox.poll_interval_secs = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("poll_interval_secs"));

        settings = Settings::default();
        settings.outbox.lease_secs = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("lease_secs"));

        settings = Settings::default();
        settings
            .webhooks
            .providers
            .insert("stripe".into(), ProviderSettings { secret: " ".into() });
        assert!(settings.validate().is_err());
    }

    #[test]
    fn secrets_stay_out_of_debug_output() {
        let mut settings = Settings::default();
        settings
            .webhooks
            .providers
            .insert("stripe".into(), ProviderSettings { secret: "whsec_hidden".into() });
        assert!(!format!("{settings:?}").contains("whsec_hidden"));
    }
}
