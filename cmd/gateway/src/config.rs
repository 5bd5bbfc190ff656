//! Gateway configuration.
//!
//! Values come from, in order of precedence: command-line flags,
//! environment variables, the YAML config file, then built-in defaults.
//! The config file defaults to ~/.chatlog/gateway.yaml and is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL, GeminiConfig};

/// Default base configuration directory name.
pub const DEFAULT_BASE_DIR: &str = ".chatlog";
/// Default configuration filename.
pub const DEFAULT_CONFIG_FILE: &str = "gateway.yaml";

pub const DEFAULT_LISTEN: &str = ":8080";
pub const DEFAULT_TABLE: &str = chatlog_kv::DEFAULT_TABLE;
pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 10;

pub const ENV_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_MODEL: &str = "GEMINI_MODEL";
pub const ENV_DB: &str = "CHATLOG_DB";
pub const ENV_TABLE: &str = "CHATLOG_TABLE";
pub const ENV_LISTEN: &str = "CHATLOG_LISTEN";

/// On-disk config file layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub listen: String,

    /// redb database path. Empty selects the in-memory store.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub db_path: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub table: String,

    /// Bound on each store call in seconds. Unset means the default;
    /// 0 disables the bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_timeout_secs: Option<u64>,

    #[serde(default)]
    pub gemini: GeminiSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiSection {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_url: String,

    /// Request timeout in seconds (optional).
    #[serde(default, skip_serializing_if = "is_zero")]
    pub timeout_secs: u64,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg = serde_yaml::from_str(&data)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(cfg)
    }

    /// Gets the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(DEFAULT_BASE_DIR).join(DEFAULT_CONFIG_FILE))
    }
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen: Option<String>,
    pub db_path: Option<PathBuf>,
    pub table: Option<String>,
}

/// Fully resolved gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub db_path: Option<PathBuf>,
    pub table: String,
    pub store_timeout: Duration,
    pub gemini: GeminiConfig,
}

impl Config {
    /// Load the config file (explicit path, or the default path when it
    /// exists), then apply the process environment and flags.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let file = match path {
            Some(p) => FileConfig::read(p)?,
            None => match FileConfig::default_path() {
                Some(p) if p.exists() => FileConfig::read(&p)?,
                _ => FileConfig::default(),
            },
        };
        Self::resolve(file, |name| std::env::var(name).ok(), overrides)
    }

    /// Merge file values, environment lookups and flags.
    pub fn resolve(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
        overrides: &Overrides,
    ) -> Result<Self> {
        let env = |name: &str| env(name).filter(|v| !v.is_empty());
        let pick = |flag: Option<String>, var: &str, from_file: String, default: &str| -> String {
            flag.or_else(|| env(var))
                .or_else(|| Some(from_file).filter(|v| !v.is_empty()))
                .unwrap_or_else(|| default.to_string())
        };

        let api_key = pick(None, ENV_API_KEY, file.gemini.api_key, "");
        if api_key.is_empty() {
            bail!("{ENV_API_KEY} environment variable not set. Please set it before running.");
        }

        let listen = pick(overrides.listen.clone(), ENV_LISTEN, file.listen, DEFAULT_LISTEN);
        let table = pick(overrides.table.clone(), ENV_TABLE, file.table, DEFAULT_TABLE);
        let db_path = overrides
            .db_path
            .clone()
            .or_else(|| env(ENV_DB).map(PathBuf::from))
            .or_else(|| Some(file.db_path).filter(|p| !p.is_empty()).map(PathBuf::from));

        let store_timeout_secs = file
            .store_timeout_secs
            .unwrap_or(DEFAULT_STORE_TIMEOUT_SECS);

        let mut gemini = GeminiConfig {
            api_key,
            model: pick(None, ENV_MODEL, file.gemini.model, DEFAULT_MODEL),
            base_url: Some(file.gemini.base_url)
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            ..Default::default()
        };
        if file.gemini.timeout_secs > 0 {
            gemini.timeout = Duration::from_secs(file.gemini.timeout_secs);
        }

        Ok(Self {
            listen,
            db_path,
            table,
            store_timeout: Duration::from_secs(store_timeout_secs),
            gemini,
        })
    }
}

/// Parse an address; ":port" binds every interface.
pub fn parse_addr(addr: &str) -> Result<std::net::SocketAddr> {
    let addr = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    };
    addr.parse()
        .with_context(|| format!("invalid listen address {addr}"))
}
