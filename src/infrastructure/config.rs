//! Policy configuration.
//!
//! Configuration is plain serde data, usually loaded from YAML:
//!
//! ```yaml
//! service_id: "2555417735060"
//! service_token: "secret-token"
//! credentials_location: query
//! auth_type: API_KEY
//! report_endpoint: https://su1.3scale.net/transactions.xml
//! proxy_rules:
//!   - http_method: GET
//!     pattern: /widgets
//!     metric_system_name: hits
//!     delta: 1
//! cache:
//!   ttl_secs: 600
//! ```
//!
//! Everything except the service fields, the report endpoint and the rules
//! has a default. `validate` reports the first problem as a `ConfigError`.

use crate::application::auth_cache::AuthCacheConfig;
use crate::application::authrep::AuthRepSettings;
use crate::application::batcher::BatchConfig;
use crate::application::flusher::FlusherConfig;
use crate::domain::credentials::{AuthType, CredentialExtractor, CredentialParams, CredentialsLocation};
use crate::domain::error::ConfigError;
use crate::domain::report::ServiceAuthParam;
use crate::domain::rule::ProxyRule;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Configuration of one authrep policy instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthRepConfig {
    /// Backend service the API belongs to
    pub service_id: String,

    /// Token authenticating this gateway to the backend
    pub service_token: String,

    /// Name of the header field carrying `service_token` in reports
    #[serde(default)]
    pub service_auth_param: ServiceAuthParam,

    /// Where request credentials are read from
    #[serde(default)]
    pub credentials_location: CredentialsLocation,

    #[serde(default)]
    pub auth_type: AuthType,

    /// Parameter holding the user key (`API_KEY`)
    #[serde(default = "default_user_key")]
    pub auth_user_key: String,

    /// Parameter holding the application id (`APP_ID`)
    #[serde(default = "default_app_id")]
    pub auth_app_id: String,

    /// Parameter holding the application key (`APP_ID`)
    #[serde(default = "default_app_key")]
    pub auth_app_key: String,

    /// Parameter holding the end user id, if any
    #[serde(default)]
    pub user_id_param: Option<String>,

    /// Mapping rules, in evaluation order
    #[serde(default)]
    pub proxy_rules: Vec<ProxyRule>,

    /// Where usage reports are sent
    pub report_endpoint: String,

    #[serde(default)]
    pub batch: BatchSection,

    #[serde(default)]
    pub cache: CacheSection,

    /// Forced re-verification window after a flush, in milliseconds
    #[serde(default = "default_forced_sync_window_ms")]
    pub forced_sync_window_ms: u64,

    /// Timeout for one backend authorize call, in milliseconds
    #[serde(default = "default_backend_timeout_ms")]
    pub backend_timeout_ms: u64,

    /// Interval between periodic flushes, in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

/// Batching settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchSection {
    #[serde(default = "default_full_threshold")]
    pub full_threshold: usize,
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            full_threshold: default_full_threshold(),
            max_records: default_max_records(),
        }
    }
}

/// Authorization cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub cache_denials: bool,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            capacity: default_capacity(),
            cache_denials: false,
        }
    }
}

fn default_user_key() -> String {
    "user_key".to_string()
}

fn default_app_id() -> String {
    "app_id".to_string()
}

fn default_app_key() -> String {
    "app_key".to_string()
}

fn default_full_threshold() -> usize {
    500
}

fn default_max_records() -> usize {
    1000
}

fn default_ttl_secs() -> u64 {
    600
}

fn default_capacity() -> usize {
    10_000_000
}

fn default_forced_sync_window_ms() -> u64 {
    1000
}

fn default_backend_timeout_ms() -> u64 {
    5000
}

fn default_flush_interval_ms() -> u64 {
    5000
}

impl AuthRepConfig {
    /// Minimal configuration with every optional setting at its default.
    pub fn new(
        service_id: impl Into<String>,
        service_token: impl Into<String>,
        report_endpoint: impl Into<String>,
        proxy_rules: Vec<ProxyRule>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            service_token: service_token.into(),
            service_auth_param: ServiceAuthParam::default(),
            credentials_location: CredentialsLocation::default(),
            auth_type: AuthType::default(),
            auth_user_key: default_user_key(),
            auth_app_id: default_app_id(),
            auth_app_key: default_app_key(),
            user_id_param: None,
            proxy_rules,
            report_endpoint: report_endpoint.into(),
            batch: BatchSection::default(),
            cache: CacheSection::default(),
            forced_sync_window_ms: default_forced_sync_window_ms(),
            backend_timeout_ms: default_backend_timeout_ms(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }

    /// Load and validate configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            ConfigError::Parse(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: AuthRepConfig =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for problems that would make the policy unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_id.is_empty() {
            return Err(ConfigError::MissingField("service_id"));
        }
        if self.service_token.is_empty() {
            return Err(ConfigError::MissingField("service_token"));
        }
        if self.backend_timeout_ms == 0 {
            return Err(ConfigError::ZeroValue("backend_timeout_ms"));
        }
        self.credential_extractor()?;
        self.cache_config().validate()?;
        self.batch_config().validate()?;
        self.flusher_config()?;
        Ok(())
    }

    /// Build the credential extractor for the configured auth type.
    ///
    /// # Errors
    /// Returns `ConfigError::UnsupportedAuthType` for `OAUTH`.
    pub fn credential_extractor(&self) -> Result<CredentialExtractor, ConfigError> {
        let params = CredentialParams {
            user_key: self.auth_user_key.clone(),
            app_id: self.auth_app_id.clone(),
            app_key: self.auth_app_key.clone(),
            user_id: self.user_id_param.clone(),
        };
        CredentialExtractor::new(self.credentials_location, self.auth_type, params)
    }

    pub fn cache_config(&self) -> AuthCacheConfig {
        AuthCacheConfig {
            capacity: self.cache.capacity,
            ttl: Duration::from_secs(self.cache.ttl_secs),
            cache_denials: self.cache.cache_denials,
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            full_threshold: self.batch.full_threshold,
            max_records: self.batch.max_records,
            endpoint: self.report_endpoint.clone(),
            auth_param: self.service_auth_param,
        }
    }

    /// Flusher settings. Report deliveries share the backend timeout.
    pub fn flusher_config(&self) -> Result<FlusherConfig, ConfigError> {
        Ok(FlusherConfig::new(Duration::from_millis(self.flush_interval_ms))?
            .with_report_timeout(self.backend_timeout()))
    }

    pub fn forced_sync_window(&self) -> Duration {
        Duration::from_millis(self.forced_sync_window_ms)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    /// Orchestrator settings derived from this configuration.
    pub fn settings(&self) -> Result<AuthRepSettings, ConfigError> {
        Ok(AuthRepSettings {
            service_id: self.service_id.clone(),
            service_token: self.service_token.clone(),
            extractor: self.credential_extractor()?,
            rules: self.proxy_rules.clone().into(),
            backend_timeout: self.backend_timeout(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
service_id: "42"
service_token: tok
report_endpoint: https://backend/transactions.xml
proxy_rules:
  - http_method: GET
    pattern: /widgets
    metric_system_name: hits
"#;

    #[test]
    fn test_defaults() {
        let config = AuthRepConfig::from_yaml(MINIMAL).unwrap();

        assert_eq!(config.service_auth_param, ServiceAuthParam::ProviderKey);
        assert_eq!(config.credentials_location, CredentialsLocation::Header);
        assert_eq!(config.auth_type, AuthType::ApiKey);
        assert_eq!(config.auth_user_key, "user_key");
        assert_eq!(config.proxy_rules.len(), 1);
        assert_eq!(config.proxy_rules[0].delta(), 1);

        let cache = config.cache_config();
        assert_eq!(cache.capacity, 10_000_000);
        assert_eq!(cache.ttl, Duration::from_secs(600));
        assert!(!cache.cache_denials);

        let batch = config.batch_config();
        assert_eq!(batch.full_threshold, 500);
        assert_eq!(batch.max_records, 1000);

        assert_eq!(config.forced_sync_window(), Duration::from_secs(1));
        assert_eq!(config.backend_timeout(), Duration::from_secs(5));
        assert_eq!(config.flusher_config().unwrap().interval, Duration::from_secs(5));
        assert_eq!(
            config.flusher_config().unwrap().report_timeout,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
service_id: "42"
service_token: tok
service_auth_param: service_token
credentials_location: query
auth_type: APP_ID
auth_app_id: id
auth_app_key: key
user_id_param: uid
report_endpoint: https://backend/transactions.xml
proxy_rules:
  - http_method: POST
    pattern: /orders/{id}/items$
    metric_system_name: item_writes
    delta: 3
batch:
  full_threshold: 10
  max_records: 20
cache:
  ttl_secs: 30
  capacity: 1000
  cache_denials: true
forced_sync_window_ms: 250
backend_timeout_ms: 800
flush_interval_ms: 100
"#;
        let config = AuthRepConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.service_auth_param, ServiceAuthParam::ServiceToken);
        assert_eq!(config.credentials_location, CredentialsLocation::Query);
        assert_eq!(config.auth_type, AuthType::AppId);
        assert_eq!(config.user_id_param.as_deref(), Some("uid"));
        assert_eq!(config.proxy_rules[0].delta(), 3);
        assert!(config.proxy_rules[0].pattern().matches("/orders/7/items"));
        assert_eq!(config.batch_config().max_records, 20);
        assert!(config.cache_config().cache_denials);
        assert_eq!(config.forced_sync_window(), Duration::from_millis(250));
    }

    #[test]
    fn test_oauth_rejected() {
        let yaml = format!("{MINIMAL}auth_type: OAUTH\n");
        assert_eq!(
            AuthRepConfig::from_yaml(&yaml).unwrap_err(),
            ConfigError::UnsupportedAuthType("OAUTH".to_string())
        );
    }

    #[test]
    fn test_invalid_pattern_is_parse_error() {
        let yaml = r#"
service_id: "42"
service_token: tok
report_endpoint: e
proxy_rules:
  - http_method: GET
    pattern: widgets
    metric_system_name: hits
"#;
        assert!(matches!(
            AuthRepConfig::from_yaml(yaml),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_zero_values_rejected() {
        let yaml = format!("{MINIMAL}batch:\n  full_threshold: 0\n");
        assert_eq!(
            AuthRepConfig::from_yaml(&yaml).unwrap_err(),
            ConfigError::ZeroValue("batch.full_threshold")
        );

        let yaml = format!("{MINIMAL}flush_interval_ms: 0\n");
        assert_eq!(
            AuthRepConfig::from_yaml(&yaml).unwrap_err(),
            ConfigError::ZeroValue("flush_interval_ms")
        );
    }

    #[test]
    fn test_missing_service_token() {
        let config = AuthRepConfig::new("42", "", "e", vec![]);
        assert_eq!(config.validate(), Err(ConfigError::MissingField("service_token")));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = format!("{MINIMAL}cache_ttl: 5\n");
        assert!(matches!(
            AuthRepConfig::from_yaml(&yaml),
            Err(ConfigError::Parse(_))
        ));
    }
}
