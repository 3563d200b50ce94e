use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use unmatched_core::DEFAULT_LOG_PREFIX;

pub const DEFAULT_CONFIG_FILE: &str = "nft-unmatched.yaml";
pub const DEFAULT_SOCKET_PATH: &str = "/run/nftables-unmatched-logger/ulog.sock";
pub const DEFAULT_DATABASE_PATH: &str = "/var/lib/nftables-unmatched-logger/main.sqlite";
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("parsing config {path}: {source}")]
    Parse { path: PathBuf, source: serde_yaml::Error },
    #[error("invalid setting `{0}`: {1}")]
    Invalid(&'static str, String),
}

/// Collector settings as they appear in the YAML file or on the command line.
/// Every field is optional so layers can be merged.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct CollectorConfig {
    pub socket_path: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub log_prefix: Option<String>,
    pub read_buffer_size: Option<usize>,
    pub max_pending_bytes: Option<usize>,
    pub services_file: Option<PathBuf>,
    pub resolve_service_names: Option<bool>,
}

impl CollectorConfig {
    /// Fill unset fields from `fallback`.
    pub fn or(self, fallback: CollectorConfig) -> CollectorConfig {
        CollectorConfig {
            socket_path: self.socket_path.or(fallback.socket_path),
            database_path: self.database_path.or(fallback.database_path),
            log_prefix: self.log_prefix.or(fallback.log_prefix),
            read_buffer_size: self.read_buffer_size.or(fallback.read_buffer_size),
            max_pending_bytes: self.max_pending_bytes.or(fallback.max_pending_bytes),
            services_file: self.services_file.or(fallback.services_file),
            resolve_service_names: self.resolve_service_names.or(fallback.resolve_service_names),
        }
    }
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub collector: Option<CollectorConfig>,
}

/// Load the YAML config. An explicit path must exist; without one,
/// `./nft-unmatched.yaml` is used if present.
pub fn load_config(path: Option<&Path>) -> Result<Option<Config>, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG_FILE);
            if p.exists() { p.to_path_buf() } else { return Ok(None); }
        }
    };
    let s = fs::read_to_string(&path).map_err(|source| ConfigError::Read { path: path.clone(), source })?;
    let cfg = serde_yaml::from_str(&s).map_err(|source| ConfigError::Parse { path, source })?;
    Ok(Some(cfg))
}

/// Fully resolved collector settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub socket_path: PathBuf,
    pub database_path: PathBuf,
    pub log_prefix: String,
    pub read_buffer_size: usize,
    pub max_pending_bytes: usize,
    /// `None` when service-name resolution is turned off.
    pub services_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            socket_path: DEFAULT_SOCKET_PATH.into(),
            database_path: DEFAULT_DATABASE_PATH.into(),
            log_prefix: DEFAULT_LOG_PREFIX.to_string(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_pending_bytes: record_decoder::DEFAULT_MAX_PENDING,
            services_file: Some(service_names::DEFAULT_SERVICES_FILE.into()),
        }
    }
}

impl Settings {
    /// Apply defaults to a merged config and validate the result.
    pub fn resolve(cfg: CollectorConfig) -> Result<Settings, ConfigError> {
        let d = Settings::default();
        let log_prefix = cfg.log_prefix.unwrap_or(d.log_prefix);
        if log_prefix.is_empty() {
            return Err(ConfigError::Invalid("log_prefix", "must not be empty".into()));
        }
        let read_buffer_size = cfg.read_buffer_size.unwrap_or(d.read_buffer_size);
        if read_buffer_size == 0 {
            return Err(ConfigError::Invalid("read_buffer_size", "must be greater than zero".into()));
        }
        let max_pending_bytes = cfg.max_pending_bytes.unwrap_or(d.max_pending_bytes);
        if max_pending_bytes < read_buffer_size {
            return Err(ConfigError::Invalid(
                "max_pending_bytes",
                format!("must be at least read_buffer_size ({read_buffer_size})"),
            ));
        }
        let services_file = match cfg.resolve_service_names {
            Some(false) => None,
            _ => cfg.services_file.or(d.services_file),
        };
        Ok(Settings {
            socket_path: cfg.socket_path.unwrap_or(d.socket_path),
            database_path: cfg.database_path.unwrap_or(d.database_path),
            log_prefix,
            read_buffer_size,
            max_pending_bytes,
            services_file,
        })
    }
}
