use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::catalog::api::ServerOptions;
use crate::catalog::CacheOptions;

/// Env var that overrides `[data] file_path`.
pub const DATA_FILE_ENV: &str = "CATALOG_DATA_FILE";
/// Env var that overrides the config file location (mainly for tests).
pub const CONFIG_PATH_ENV: &str = "CATALOG_CONFIG";

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "DataConfig::default_file_path")]
    pub file_path: PathBuf, // relative paths resolve against the working directory
    #[serde(default = "DataConfig::default_format")]
    pub format: String, // only "json" is understood
}

impl DataConfig {
    fn default_file_path() -> PathBuf {
        PathBuf::from("data/products.json")
    }
    fn default_format() -> String {
        "json".to_string()
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            file_path: Self::default_file_path(),
            format: Self::default_format(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// 0 = reload on every event.
    #[serde(default)]
    pub debounce_ms: u64,
}

fn bool_true() -> bool {
    true
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    /// Keep serving the last good snapshot when a reload fails to parse.
    #[serde(default)]
    pub keep_last_good: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    #[serde(default = "ServerConfig::default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "ServerConfig::default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "ServerConfig::default_max_ids")]
    pub max_ids: usize, // 0 = unlimited
}

impl ServerConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }
    fn default_port() -> u16 {
        5080
    }
    fn default_max_connections() -> usize {
        32
    }
    fn default_read_timeout_secs() -> u64 {
        10
    }
    fn default_max_ids() -> usize {
        crate::catalog::handler::DEFAULT_MAX_IDS
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            max_connections: Self::default_max_connections(),
            read_timeout_secs: Self::default_read_timeout_secs(),
            max_ids: Self::default_max_ids(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = get_config_path()?;

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str::<Config>(&content)?
        } else {
            Config::default()
        };
        if let Ok(file) = std::env::var(DATA_FILE_ENV) {
            if !file.trim().is_empty() {
                config.data.file_path = PathBuf::from(file);
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.data.format.eq_ignore_ascii_case("json") {
            bail!(
                "Unsupported data format '{}' (only \"json\" is supported)",
                self.data.format
            );
        }
        if self.server.max_connections == 0 {
            bail!("server.max_connections must be at least 1");
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let path = get_config_path()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn create_default() -> Result<PathBuf> {
        let config = Config::default();
        config.save()?;
        get_config_path()
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            watch: self.watch.enabled,
            debounce: Duration::from_millis(self.watch.debounce_ms),
            keep_last_good: self.cache.keep_last_good,
        }
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            host: self.server.host.clone(),
            port: self.server.port,
            max_connections: self.server.max_connections,
            read_timeout: Duration::from_secs(self.server.read_timeout_secs.max(1)),
            max_ids: self.server.max_ids,
        }
    }
}

fn get_config_path() -> Result<PathBuf> {
    if let Ok(p) = std::env::var(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(p));
    }
    let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    Ok(config_dir.join("catalog").join("config.toml"))
}

pub fn show_config() -> Result<()> {
    let path = get_config_path()?;
    println!("Config: {}", path.display());
    println!();

    if path.exists() {
        let config = Config::load()?;
        println!("{}", toml::to_string_pretty(&config)?);
    } else {
        println!("(default config, file not created)");
        println!();
        let config = Config::default();
        println!("{}", toml::to_string_pretty(&config)?);
    }

    Ok(())
}
