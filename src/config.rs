use std::{path::Path, str::FromStr, time::Duration};

use anyhow::{bail, Context};
use serde::Deserialize;

/// Argon2id cost parameters.
///
/// The defaults match the argon2 crate's own defaults (19 MiB, 2 passes,
/// 1 lane), which is the OWASP minimum for Argon2id and keeps a single hash
/// in the tens of milliseconds on a server core. Raise them as hardware
/// allows; existing hashes keep verifying with the parameters they embed.
#[derive(Debug, Clone, Deserialize)]
pub struct HasherConfig {
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
    #[serde(default)]
    pub hasher: HasherConfig,
    #[serde(default = "default_password_min_len")]
    pub password_min_len: usize,
    #[serde(default = "default_password_max_len")]
    pub password_max_len: usize,
}

impl AppConfig {
    /// Reads `APP_CONFIG_FILE` when set, the process environment otherwise.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var("APP_CONFIG_FILE") {
            Ok(path) => Self::from_file(path),
            Err(_) => Self::from_env(),
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key/value source shaped like the environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = get("DATABASE_URL").context("DATABASE_URL is not set")?;
        let hasher = HasherConfig {
            memory_kib: env_or(&get, "HASH_MEMORY_KIB", default_memory_kib())?,
            iterations: env_or(&get, "HASH_ITERATIONS", default_iterations())?,
            parallelism: env_or(&get, "HASH_PARALLELISM", default_parallelism())?,
        };
        let config = Self {
            database_url,
            host: get("APP_HOST").unwrap_or_else(default_host),
            port: env_or(&get, "APP_PORT", default_port())?,
            db_max_connections: env_or(&get, "DB_MAX_CONNECTIONS", default_max_connections())?,
            store_timeout_secs: env_or(&get, "STORE_TIMEOUT_SECS", default_store_timeout_secs())?,
            hasher,
            password_min_len: env_or(&get, "PASSWORD_MIN_LEN", default_password_min_len())?,
            password_max_len: env_or(&get, "PASSWORD_MAX_LEN", default_password_max_len())?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.password_min_len == 0 {
            bail!("password_min_len must be at least 1");
        }
        if self.password_min_len > self.password_max_len {
            bail!(
                "password_min_len ({}) exceeds password_max_len ({})",
                self.password_min_len,
                self.password_max_len
            );
        }
        if self.store_timeout_secs == 0 {
            bail!("store_timeout_secs must be positive");
        }
        Ok(())
    }

    /// `DATABASE_URL=memory:` selects the in-process store.
    pub fn uses_memory_store(&self) -> bool {
        self.database_url.trim() == "memory:"
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Unset keys fall back to `default`; set but unparseable keys are an error.
fn env_or<T>(get: impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}")),
        None => Ok(default),
    }
}

fn default_memory_kib() -> u32 {
    19_456
}
fn default_iterations() -> u32 {
    2
}
fn default_parallelism() -> u32 {
    1
}
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_max_connections() -> u32 {
    10
}
fn default_store_timeout_secs() -> u64 {
    5
}
fn default_password_min_len() -> usize {
    8
}
fn default_password_max_len() -> usize {
    256
}
