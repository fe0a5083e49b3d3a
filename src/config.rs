// Configuration for labelmeta
//
// Settings live in one JSON file. Service sections are read from the
// "services" subtree, with a fallback to top-level sections for older files.
// Catalog credentials can be supplied through the environment instead.

use std::fs;
use std::path::Path;
use log::{debug, info, warn};
use thiserror::Error;

use crate::helpers::catalog::CatalogConfig;
use crate::helpers::request_queue::QueueConfig;
use crate::logging::LoggingConfig;

/// Overrides `services.catalog.client_id`
pub const CLIENT_ID_ENV: &str = "LABELMETA_CLIENT_ID";
/// Overrides `services.catalog.client_secret`
pub const CLIENT_SECRET_ENV: &str = "LABELMETA_CLIENT_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Catalog credentials missing: set services.catalog.client_id/client_secret or LABELMETA_CLIENT_ID/LABELMETA_CLIENT_SECRET")]
    MissingCredentials,
}

/// Helper function to get service configuration with backward compatibility
///
/// This function first tries to find the service in the "services" structure,
/// then falls back to the old top-level structure.
///
/// # Example
/// ```rust
/// use serde_json::json;
/// use labelmeta::config::get_service_config;
///
/// let config = json!({
///   "services": {
///     "catalog": { "market": "US" }
///   }
/// });
///
/// if let Some(catalog) = get_service_config(&config, "catalog") {
///     assert_eq!(catalog["market"], "US");
/// }
///
/// // Top-level sections are still accepted
/// let old_config = json!({
///   "catalog": { "market": "DE" }
/// });
///
/// if let Some(catalog) = get_service_config(&old_config, "catalog") {
///     assert_eq!(catalog["market"], "DE");
/// }
/// ```
pub fn get_service_config<'a>(config: &'a serde_json::Value, service_name: &str) -> Option<&'a serde_json::Value> {
    if let Some(services) = config.get("services") {
        if let Some(service_config) = services.get(service_name) {
            debug!("Found {} configuration in services section", service_name);
            return Some(service_config);
        }
    }

    if let Some(service_config) = config.get(service_name) {
        debug!("Found {} configuration at top level (legacy structure)", service_name);
        return Some(service_config);
    }

    debug!("No {} configuration found in either services section or top level", service_name);
    None
}

/// Fully parsed application configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub catalog: CatalogConfig,
    pub queue: QueueConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Build from a parsed JSON document. Missing sections use defaults.
    pub fn from_value(config: &serde_json::Value) -> Self {
        let queue = get_service_config(config, "request_queue")
            .map(QueueConfig::from_json)
            .unwrap_or_default();

        let logging = match config.get("logging") {
            Some(section) => serde_json::from_value(section.clone()).unwrap_or_else(|e| {
                warn!("Invalid logging section, using defaults: {}", e);
                LoggingConfig::default()
            }),
            None => LoggingConfig::default(),
        };

        AppConfig {
            catalog: CatalogConfig::from_json(config),
            queue,
            logging,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Ok(Self::from_value(&value))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        info!("Loaded configuration from {}", path.as_ref().display());
        Self::from_json_str(&content)
    }

    /// Replace catalog credentials with non-empty environment values
    pub fn apply_env_overrides(&mut self) {
        if let Some(id) = env_value(CLIENT_ID_ENV) {
            debug!("Using catalog client id from {}", CLIENT_ID_ENV);
            self.catalog.client_id = id;
        }
        if let Some(secret) = env_value(CLIENT_SECRET_ENV) {
            debug!("Using catalog client secret from {}", CLIENT_SECRET_ENV);
            self.catalog.client_secret = secret;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.catalog.client_id.is_empty() || self.catalog.client_secret.is_empty() {
            return Err(ConfigError::MissingCredentials);
        }
        Ok(())
    }

    /// Load the file (if given), apply environment overrides and check that
    /// catalog credentials are present
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                debug!("No configuration file given, using defaults");
                AppConfig::default()
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
