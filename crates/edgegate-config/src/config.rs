// crates/edgegate-config/src/config.rs
// ============================================================================
// Module: EdgeGate Configuration
// Description: Configuration loading and validation for EdgeGate.
// Purpose: Provide strict, fail-closed config parsing with env overrides.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! The runtime reads one TOML file plus a fixed set of environment
//! overrides: `DATABASE_URL`, `OBJECT_STORE_ENDPOINT` / `OBJECT_STORE_BUCKET`
//! / `OBJECT_STORE_KEY` / `OBJECT_STORE_SECRET`, `MASTER_KEY`,
//! `SIGNING_KEY_ID`, `SIGNING_PRIVATE_KEY_PATH`, and `BACKEND_BASE_URL`.
//! Size and path checks are strict; anything malformed fails closed before
//! the runtime starts. Secret values (`MASTER_KEY`, object-store secret)
//! come only from the environment and are never written back to disk.
//!
//! Security posture: config inputs are untrusted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "edgegate.toml";
/// Environment variable used to override the config path.
pub(crate) const CONFIG_ENV_VAR: &str = "EDGEGATE_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Minimum decoded master key length in bytes (base64 expands by 4/3).
const MIN_MASTER_KEY_B64_LENGTH: usize = 43;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("config read failed for {path}: {detail}")]
    Read {
        /// Offending path.
        path: String,
        /// I/O detail.
        detail: String,
    },
    /// The config file exceeds the size limit.
    #[error("config file {path} exceeds {limit} bytes")]
    TooLarge {
        /// Offending path.
        path: String,
        /// Maximum allowed size.
        limit: usize,
    },
    /// The config file is not valid TOML for this schema.
    #[error("config parse failed: {0}")]
    Parse(String),
    /// A required field is missing after env overrides.
    #[error("config missing required field: {0}")]
    Missing(&'static str),
    /// A field value failed validation.
    #[error("config invalid {field}: {detail}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Validation detail.
        detail: String,
    },
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Object store connection settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ObjectStoreConfig {
    /// Object store endpoint URL.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bucket name.
    #[serde(default)]
    pub bucket: Option<String>,
    /// Access key id.
    #[serde(default)]
    pub key: Option<String>,
    /// Access secret; environment-only in production.
    #[serde(default)]
    pub secret: Option<String>,
}

/// Evidence signing settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SigningConfig {
    /// Registered key id recorded in bundle summaries.
    #[serde(default)]
    pub key_id: Option<String>,
    /// Path to the Ed25519 private key file.
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
}

/// Top-level EdgeGate runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EdgeGateConfig {
    /// Database connection URL.
    #[serde(default)]
    pub database_url: Option<String>,
    /// Queue connection URL.
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Object store settings.
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    /// Base64 master key material; environment-only in production.
    #[serde(default)]
    pub master_key: Option<String>,
    /// Active master key id stamped into new seals.
    #[serde(default)]
    pub master_key_id: Option<String>,
    /// Evidence signing settings.
    #[serde(default)]
    pub signing: SigningConfig,
    /// Path to the JWT public key consumed by the outer API layer.
    #[serde(default)]
    pub jwt_public_key_path: Option<PathBuf>,
    /// Optional backend base URL override.
    #[serde(default)]
    pub backend_base_url: Option<String>,
}

impl EdgeGateConfig {
    /// Loads configuration from the default location with env overrides.
    ///
    /// The path resolves from `EDGEGATE_CONFIG`, falling back to
    /// `edgegate.toml` in the working directory; a missing file yields an
    /// empty base config so env-only deployments work.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when reading, parsing, or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var(CONFIG_ENV_VAR)
            .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_NAME), PathBuf::from);
        let mut config =
            if path.exists() { Self::load_file(&path)? } else { Self::default() };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from an explicit file, without env overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when reading or parsing fails.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        validate_path(path)?;
        let raw = fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: path.display().to_string(),
            detail: err.to_string(),
        })?;
        if raw.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge {
                path: path.display().to_string(),
                limit: MAX_CONFIG_FILE_SIZE,
            });
        }
        toml::from_str(&raw).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Applies the fixed set of environment overrides.
    pub fn apply_env_overrides(&mut self) {
        override_string(&mut self.database_url, "DATABASE_URL");
        override_string(&mut self.redis_url, "REDIS_URL");
        override_string(&mut self.object_store.endpoint, "OBJECT_STORE_ENDPOINT");
        override_string(&mut self.object_store.bucket, "OBJECT_STORE_BUCKET");
        override_string(&mut self.object_store.key, "OBJECT_STORE_KEY");
        override_string(&mut self.object_store.secret, "OBJECT_STORE_SECRET");
        override_string(&mut self.master_key, "MASTER_KEY");
        override_string(&mut self.master_key_id, "MASTER_KEY_ID");
        override_string(&mut self.signing.key_id, "SIGNING_KEY_ID");
        override_path(&mut self.signing.private_key_path, "SIGNING_PRIVATE_KEY_PATH");
        override_path(&mut self.jwt_public_key_path, "JWT_PUBLIC_KEY_PATH");
        override_string(&mut self.backend_base_url, "BACKEND_BASE_URL");
    }

    /// Validates the assembled configuration, fail closed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first failing field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let database_url =
            self.database_url.as_deref().ok_or(ConfigError::Missing("database_url"))?;
        if database_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "database_url",
                detail: "must not be empty".to_string(),
            });
        }

        let master_key = self.master_key.as_deref().ok_or(ConfigError::Missing("master_key"))?;
        if master_key.trim().len() < MIN_MASTER_KEY_B64_LENGTH {
            return Err(ConfigError::Invalid {
                field: "master_key",
                detail: "base64 material must decode to at least 32 bytes".to_string(),
            });
        }

        let key_id =
            self.signing.key_id.as_deref().ok_or(ConfigError::Missing("signing.key_id"))?;
        if key_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "signing.key_id",
                detail: "must not be empty".to_string(),
            });
        }
        let private_key_path = self
            .signing
            .private_key_path
            .as_deref()
            .ok_or(ConfigError::Missing("signing.private_key_path"))?;
        validate_path(private_key_path)?;

        if let Some(endpoint) = self.object_store.endpoint.as_deref()
            && !(endpoint.starts_with("https://") || endpoint.starts_with("http://"))
        {
            return Err(ConfigError::Invalid {
                field: "object_store.endpoint",
                detail: "must be an http(s) url".to_string(),
            });
        }
        if let Some(base_url) = self.backend_base_url.as_deref()
            && !(base_url.starts_with("https://") || base_url.starts_with("http://"))
        {
            return Err(ConfigError::Invalid {
                field: "backend_base_url",
                detail: "must be an http(s) url".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Overrides a string field from the environment when set and non-empty.
fn override_string(slot: &mut Option<String>, var: &str) {
    if let Ok(value) = env::var(var)
        && !value.trim().is_empty()
    {
        *slot = Some(value);
    }
}

/// Overrides a path field from the environment when set and non-empty.
fn override_path(slot: &mut Option<PathBuf>, var: &str) {
    if let Ok(value) = env::var(var)
        && !value.trim().is_empty()
    {
        *slot = Some(PathBuf::from(value));
    }
}

/// Validates path component and total length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let rendered = path.display().to_string();
    if rendered.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid {
            field: "path",
            detail: format!("exceeds {MAX_TOTAL_PATH_LENGTH} characters"),
        });
    }
    for component in path.components() {
        let component = component.as_os_str().to_string_lossy();
        if component.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid {
                field: "path",
                detail: format!("component exceeds {MAX_PATH_COMPONENT_LENGTH} characters"),
            });
        }
    }
    Ok(())
}
