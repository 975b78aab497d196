//! YAML configuration: database descriptor, directory endpoint, column
//! mapping and pacing.
//!
//! Loaded once by the command layer and passed down by reference. Every key
//! has a default, so a partial file only needs to name what differs.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use log::warn;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    error::ConfigError,
    mapping::{ColumnMapping, MappingConfig},
};

pub const DEFAULT_CONFIG_FILE: &str = "directory-sync.yaml";
pub const DB_PASSWORD_ENV: &str = "DIRECTORY_SYNC_DB_PASSWORD";
pub const DIRECTORY_PASSWORD_ENV: &str = "DIRECTORY_SYNC_DIRECTORY_PASSWORD";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub driver: String,
    pub url: String,
    pub username: String,
    pub password: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: "sqlite".to_string(),
            url: "employees.db".to_string(),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl DatabaseConfig {
    /// Filesystem path named by `url`, which may carry a `sqlite:` prefix.
    pub fn path(&self) -> Result<PathBuf, ConfigError> {
        if !self.driver.trim().eq_ignore_ascii_case("sqlite") {
            return Err(ConfigError::UnsupportedDriver(self.driver.clone()));
        }
        let url = self.url.trim();
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        if path.is_empty() {
            return Err(ConfigError::Empty {
                key: "database.url".to_string(),
            });
        }
        Ok(PathBuf::from(path))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DirectoryConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout_secs: u64,
    /// Table addressed under `/api/now/table/`.
    pub table: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://your-instance.service-now.com".to_string(),
            username: String::new(),
            password: String::new(),
            timeout_secs: 30,
            table: "sys_user".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Pause after each record, in milliseconds.
    pub pacing_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { pacing_ms: 300 }
    }
}

impl SyncConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub directory: DirectoryConfig,
    pub mapping: MappingConfig,
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Configuration used when no file exists: every default, with all three
    /// bookkeeping columns named.
    pub fn builtin() -> Self {
        Self {
            mapping: MappingConfig::builtin(),
            ..Self::default()
        }
    }

    /// Load `path`. A missing file falls back to [`AppConfig::builtin`]
    /// unless the caller named it explicitly.
    pub fn load(path: &Path, explicit: bool) -> Result<Self, ConfigError> {
        let mut config = match fs::read_to_string(path) {
            Ok(raw) => Self::from_yaml_str(&raw, path)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && !explicit => {
                warn!(
                    "Configuration {:?} not found; using built-in defaults",
                    path.display()
                );
                Self::builtin()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.display().to_string(),
            source,
        })
    }

    /// Replace secrets with values from `lookup` (the process environment in
    /// production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(password) = lookup(DB_PASSWORD_ENV) {
            self.database.password = password;
        }
        if let Some(password) = lookup(DIRECTORY_PASSWORD_ENV) {
            self.directory.password = password;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.path()?;
        let base_url = self.directory.base_url.trim();
        if base_url.is_empty() {
            return Err(ConfigError::Empty {
                key: "directory.base_url".to_string(),
            });
        }
        let parsed = Url::parse(base_url).map_err(|err| ConfigError::Invalid {
            key: "directory.base_url".to_string(),
            detail: err.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                key: "directory.base_url".to_string(),
                detail: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        if self.directory.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "directory.timeout_secs".to_string(),
                detail: "must be greater than zero".to_string(),
            });
        }
        if self.directory.table.trim().is_empty() {
            return Err(ConfigError::Empty {
                key: "directory.table".to_string(),
            });
        }
        self.column_mapping()?;
        Ok(())
    }

    pub fn column_mapping(&self) -> Result<ColumnMapping, ConfigError> {
        ColumnMapping::resolve(&self.mapping)
    }
}
