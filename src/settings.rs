use std::path::{Path, PathBuf};

use anyhow::{Result, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::cache::DiskCacheConfig;
use crate::cli::{Cli, LogFormat};
use crate::engine::{DEFAULT_MAX_BYTES, DEFAULT_TARGET_BYTES};

const DEFAULT_CONFIG_FILE: &str = "httpcache.toml";
const ENV_PREFIX: &str = "HTTPCACHE";

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cachedata")
}

fn default_cache_target_bytes() -> u64 {
    DEFAULT_TARGET_BYTES
}

fn default_cache_max_bytes() -> u64 {
    DEFAULT_MAX_BYTES
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_cache_target_bytes")]
    pub cache_target_bytes: u64,
    #[serde(default = "default_cache_max_bytes")]
    pub cache_max_bytes: u64,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            cache_target_bytes: default_cache_target_bytes(),
            cache_max_bytes: default_cache_max_bytes(),
            log: default_log_format(),
        }
    }
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_path = resolve_config_path(cli);
        let mut settings = Self::load_from(config_path.as_deref())?;
        if let Some(log) = cli.log {
            settings.log = log;
        }
        Ok(settings)
    }

    /// Layers `HTTPCACHE` environment variables over the optional file at
    /// `config_path`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        if let Some(path) = config_path {
            settings.apply_base_dir(path);
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn cache_config(&self) -> DiskCacheConfig {
        DiskCacheConfig {
            dir: self.cache_dir.clone(),
            target_bytes: self.cache_target_bytes,
            max_bytes: self.cache_max_bytes,
        }
    }

    fn apply_base_dir(&mut self, config_path: &Path) {
        let base_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        self.cache_dir = absolutize(&self.cache_dir, base_dir);
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.cache_dir.as_os_str().is_empty(),
            "cache_dir must not be empty"
        );
        ensure!(
            self.cache_target_bytes > 0,
            "cache_target_bytes must be greater than 0 (got {})",
            self.cache_target_bytes
        );
        ensure!(
            self.cache_target_bytes <= self.cache_max_bytes,
            "cache_target_bytes ({}) must not exceed cache_max_bytes ({})",
            self.cache_target_bytes,
            self.cache_max_bytes
        );
        Ok(())
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

fn resolve_config_path(cli: &Cli) -> Option<PathBuf> {
    if let Some(path) = &cli.config {
        return Some(path.clone());
    }
    let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
    candidate.exists().then_some(candidate)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
