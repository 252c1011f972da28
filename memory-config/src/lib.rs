//! Settings loading: YAML on disk, overlaid with environment variables,
//! resolved into the [`Settings`] tree the service boots from.
//!
//! Precedence is file-first: an environment variable only fills in a key
//! the YAML document left absent. Path resolution follows the same
//! explicit-arg -> env-var -> default chain as the teacher's TOML loader.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use memory_core::overrides::CoreConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Env var naming an explicit config file path, checked when no path is
/// passed to [`load`] directly.
pub const CONFIG_ENV_VAR: &str = "MEMORY_CONFIG_FILE";
/// Default config file location when neither an explicit path nor
/// `MEMORY_CONFIG_FILE` is set.
pub const DEFAULT_CONFIG_PATH: &str = "config/memory-config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Authentication and tenancy enforcement settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub jwt_audience: String,
    pub jwt_issuer: String,
    pub jwk_url: Option<String>,
    pub shared_secrets: HashMap<String, String>,
    pub enforce_headers: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_audience: "memory-service".to_string(),
            jwt_issuer: "memory-service".to_string(),
            jwk_url: None,
            shared_secrets: HashMap::new(),
            enforce_headers: true,
        }
    }
}

/// External backend endpoints and API credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalServiceConfig {
    pub openrouter_api_key: String,
    #[serde(default = "default_openrouter_base_url")]
    pub openrouter_base_url: String,
    #[serde(default = "default_tei_base_url")]
    pub tei_base_url: String,
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,
    #[serde(default)]
    pub qdrant_api_key: Option<String>,
    #[serde(default = "default_qdrant_collection")]
    pub qdrant_collection: String,
}

fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_tei_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}

fn default_qdrant_collection() -> String {
    "memories".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

/// Full configuration tree the service boots from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    pub services: ExternalServiceConfig,
}

fn read_file(path: &Path) -> Result<serde_yaml::Value, ConfigError> {
    if !path.exists() {
        debug!("config file {} not found, relying on env vars and defaults", path.display());
        return Ok(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: serde_yaml::Value =
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(match parsed {
        serde_yaml::Value::Null => serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
        other => other,
    })
}

fn mapping_mut(value: &mut serde_yaml::Value) -> &mut serde_yaml::Mapping {
    if !matches!(value, serde_yaml::Value::Mapping(_)) {
        *value = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
    }
    match value {
        serde_yaml::Value::Mapping(mapping) => mapping,
        _ => unreachable!(),
    }
}

/// Sets `key` on `mapping` from `value` only when `key` is absent and
/// `value` is `Some` — env vars never override an explicit YAML entry.
fn set_if_absent(mapping: &mut serde_yaml::Mapping, key: &str, value: Option<String>) {
    let Some(value) = value else { return };
    let yaml_key = serde_yaml::Value::String(key.to_string());
    if !mapping.contains_key(&yaml_key) {
        debug!("overriding {key} from env var, not present in config file");
        mapping.insert(yaml_key, serde_yaml::Value::String(value));
    }
}

fn apply_env_overrides(raw: &mut serde_yaml::Value) {
    let root = mapping_mut(raw);

    let services_key = serde_yaml::Value::String("services".to_string());
    if !root.contains_key(&services_key) {
        root.insert(
            services_key.clone(),
            serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
        );
    }
    let services = mapping_mut(root.get_mut(&services_key).expect("just inserted"));
    set_if_absent(services, "openrouter_api_key", env::var("OPENROUTER_API_KEY").ok());
    set_if_absent(services, "openrouter_base_url", env::var("OPENROUTER_BASE_URL").ok());
    set_if_absent(services, "qdrant_url", env::var("QDRANT_URL").ok());
    set_if_absent(services, "qdrant_api_key", env::var("QDRANT_API_KEY").ok());
    set_if_absent(services, "tei_base_url", env::var("TEI_BASE_URL").ok());

    if let Ok(shared_secret) = env::var("MEMORY_SHARED_SECRET") {
        let security_key = serde_yaml::Value::String("security".to_string());
        if !root.contains_key(&security_key) {
            root.insert(
                security_key.clone(),
                serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
            );
        }
        let security = mapping_mut(root.get_mut(&security_key).expect("just inserted"));
        let shared_secrets_key = serde_yaml::Value::String("shared_secrets".to_string());
        if !security.contains_key(&shared_secrets_key) {
            let mut defaults = serde_yaml::Mapping::new();
            defaults.insert(
                serde_yaml::Value::String("default".to_string()),
                serde_yaml::Value::String(shared_secret),
            );
            security.insert(shared_secrets_key, serde_yaml::Value::Mapping(defaults));
        }
    }

    if let Ok(environment) = env::var("MEMORY_ENVIRONMENT") {
        debug!("overriding environment from env: {environment}");
        root.insert(
            serde_yaml::Value::String("environment".to_string()),
            serde_yaml::Value::String(environment),
        );
    }
}

/// Resolves the config file path: explicit argument, then
/// `MEMORY_CONFIG_FILE`, then [`DEFAULT_CONFIG_PATH`].
pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match env::var(CONFIG_ENV_VAR) {
        Ok(path) => PathBuf::from(path),
        Err(_) => PathBuf::from(DEFAULT_CONFIG_PATH),
    }
}

/// Loads settings from YAML at the resolved path, overlaid with
/// environment variables, and validates the result.
pub fn load(explicit_path: Option<&Path>) -> Result<Settings, ConfigError> {
    let path = resolve_path(explicit_path);
    let mut raw = read_file(&path)?;
    apply_env_overrides(&mut raw);

    let settings: Settings = serde_yaml::from_value(raw).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;
    settings
        .core
        .validate()
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;
    debug!("loaded config from {} (environment: {})", path.display(), settings.environment);
    Ok(settings)
}
