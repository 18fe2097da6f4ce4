//! Configuration module for vmgate
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation. Everything here is read
//! once at startup; an invalid configuration is fatal.

use crate::authz::Operation;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// A `${VAR}` placeholder survived expansion, i.e. the variable was never set
fn is_unresolved(value: &str) -> bool {
    value.contains("${")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub oidc: OidcConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "server.address cannot be empty".into(),
            ));
        }

        self.oidc.validate()?;
        self.policy.validate()?;

        for template in &self.platform.templates {
            if template.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "platform.templates cannot contain empty names".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_server_address(),
        }
    }
}

fn default_server_address() -> String {
    "0.0.0.0:8080".to_string()
}

// ============================================================================
// Identity Provider Configuration
// ============================================================================

/// OpenID Connect provider configuration.
///
/// # Example
///
/// ```yaml
/// oidc:
///   issuer_url: "${OIDC_PROVIDER_URL}"
///   client_id: "${OIDC_CLIENT_ID}"
///   roles_claim: "realm_access.roles"
///   discovery_timeout_seconds: 10
///   leeway_seconds: 60
///   jwks_refresh_seconds: 3600
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct OidcConfig {
    /// Issuer URL; discovery reads `{issuer_url}/.well-known/openid-configuration`
    pub issuer_url: String,

    /// Expected audience (`aud` claim) of incoming tokens
    pub client_id: String,

    /// Dotted path of the roles attribute inside the token claims. Default: "roles"
    #[serde(default = "default_roles_claim")]
    pub roles_claim: String,

    /// Timeout for each discovery and key-set request. Default: 10
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_seconds: u64,

    /// Clock skew tolerated on `exp` and `nbf`. Default: 60
    #[serde(default = "default_leeway")]
    pub leeway_seconds: u64,

    /// Re-fetch the signing keys at this interval. Default: never
    #[serde(default)]
    pub jwks_refresh_seconds: Option<u64>,
}

impl OidcConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if is_unresolved(&self.issuer_url) || !is_valid_http_url(&self.issuer_url) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid oidc.issuer_url '{}': must start with http:// or https://",
                self.issuer_url
            )));
        }

        if self.client_id.trim().is_empty() || is_unresolved(&self.client_id) {
            return Err(ConfigError::ValidationError(
                "oidc.client_id must be set".into(),
            ));
        }

        if self.roles_claim.split('.').any(|segment| segment.is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid oidc.roles_claim '{}'",
                self.roles_claim
            )));
        }

        if self.discovery_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "oidc.discovery_timeout_seconds must be greater than 0".into(),
            ));
        }

        if self.jwks_refresh_seconds == Some(0) {
            return Err(ConfigError::ValidationError(
                "oidc.jwks_refresh_seconds must be greater than 0 when set".into(),
            ));
        }

        Ok(())
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_seconds)
    }

    pub fn jwks_refresh_interval(&self) -> Option<Duration> {
        self.jwks_refresh_seconds.map(Duration::from_secs)
    }
}

fn default_roles_claim() -> String {
    "roles".to_string()
}

fn default_discovery_timeout() -> u64 {
    10
}

fn default_leeway() -> u64 {
    60
}

// ============================================================================
// Access Policy Configuration
// ============================================================================

/// Role requirements per operation.
///
/// Every operation requires `default_role` unless `operations` overrides it.
///
/// ```yaml
/// policy:
///   default_role: "admin"
///   operations:
///     list_vms: "viewer"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_role")]
    pub default_role: String,
    #[serde(default)]
    pub operations: HashMap<Operation, String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_role: default_role(),
            operations: HashMap::new(),
        }
    }
}

impl PolicyConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_role.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "policy.default_role cannot be empty".into(),
            ));
        }

        for (operation, role) in &self.operations {
            if role.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "policy.operations.{} cannot be empty",
                    operation.as_str()
                )));
            }
        }

        Ok(())
    }
}

fn default_role() -> String {
    "admin".to_string()
}

/// Virtualization platform configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformConfig {
    /// Template names available for cloning
    #[serde(default)]
    pub templates: Vec<String>,
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}
