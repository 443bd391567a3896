use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::crypto::CipherKey;
use crate::error::{CacheError, Result};
use crate::sweeper::{DEFAULT_MAX_AGE, DEFAULT_SWEEP_INTERVAL};

pub const KEY_ENV: &str = "LEGENDO_CACHE_KEY";
const SWEEP_INTERVAL_ENV: &str = "LEGENDO_SWEEP_INTERVAL_SECS";
const MAX_AGE_ENV: &str = "LEGENDO_MAX_AGE_SECS";
const SOCKET_ENV: &str = "LEGENDO_SOCKET";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
    /// File holding the base64 cache key. `LEGENDO_CACHE_KEY` takes precedence.
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            max_age_secs: default_max_age_secs(),
            socket_path: None,
            key_file: None,
        }
    }
}

impl CacheConfig {
    /// Read `path` if it exists, apply environment overrides, validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let data = std::fs::read(path)
                .map_err(|e| CacheError::Config(format!("read {}: {e}", path.display())))?;
            serde_json::from_slice(&data)
                .map_err(|e| CacheError::Config(format!("parse {}: {e}", path.display())))?
        } else {
            CacheConfig::default()
        };
        config.apply_env_overrides_from(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// `lookup` stands in for `std::env::var` so overrides can be tested
    /// without touching the process environment.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(SWEEP_INTERVAL_ENV) {
            self.sweep_interval_secs = parse_secs(SWEEP_INTERVAL_ENV, &raw)?;
        }
        if let Some(raw) = lookup(MAX_AGE_ENV) {
            self.max_age_secs = parse_secs(MAX_AGE_ENV, &raw)?;
        }
        if let Some(raw) = lookup(SOCKET_ENV) {
            if !raw.is_empty() {
                self.socket_path = Some(PathBuf::from(raw));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == 0 {
            return Err(CacheError::Config("sweepIntervalSecs must be > 0".into()));
        }
        if self.max_age_secs == 0 {
            return Err(CacheError::Config("maxAgeSecs must be > 0".into()));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Socket the service listens on and the CLI connects to: an explicit
    /// path wins, then `socketPath` (already carrying `LEGENDO_SOCKET`), then
    /// the data directory default.
    pub fn resolve_socket_path(&self, explicit: Option<PathBuf>) -> Result<PathBuf> {
        match explicit.or_else(|| self.socket_path.clone()) {
            Some(path) => Ok(path),
            None => crate::paths::ipc_socket_path().map_err(|e| CacheError::Config(e.to_string())),
        }
    }

    /// Resolve the cache key: environment first, then `key_file`.
    pub fn resolve_key(&self) -> Result<CipherKey> {
        self.resolve_key_from(std::env::var(KEY_ENV).ok())
    }

    pub fn resolve_key_from(&self, env_value: Option<String>) -> Result<CipherKey> {
        if let Some(encoded) = env_value.filter(|v| !v.trim().is_empty()) {
            return CipherKey::from_base64(&encoded);
        }
        match &self.key_file {
            Some(path) => {
                let encoded = zeroize::Zeroizing::new(std::fs::read_to_string(path).map_err(
                    |e| CacheError::InvalidKey(format!("read {}: {e}", path.display())),
                )?);
                CipherKey::from_base64(&encoded)
            }
            None => Err(CacheError::InvalidKey(format!(
                "no key configured; set {KEY_ENV} or keyFile"
            ))),
        }
    }
}

fn parse_secs(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|e| CacheError::Config(format!("{name}: {e}")))
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}

fn default_max_age_secs() -> u64 {
    DEFAULT_MAX_AGE.as_secs()
}
