use anyhow::{Context, Result};
use ioscmd_core::Endpoint;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_USERNAME: &str = "root";
pub const DEFAULT_PASSWORD: &str = "alpine";
pub const DEFAULT_PORT: u16 = 22;

/// Daemon address override, `host:port` or a Unix socket path.
pub const SOCKET_ENV: &str = "USBMUXD_SOCKET_ADDRESS";
/// Alternate location of the config file.
pub const CONFIG_ENV: &str = "IOSCMD_CONFIG";

/// Contents of `config.json`. Every key is optional.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub daemon: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
}

impl FileConfig {
    pub fn path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        let base = dirs::config_dir().context("Failed to locate config directory")?;
        Ok(base.join("ioscmd").join("config.json"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    /// A missing file yields the empty config. A file that exists but does
    /// not parse is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

/// Values given on the command line.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub socket: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
}

/// Effective settings after layering flags, environment, file and defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub endpoint: Endpoint,
    pub username: String,
    pub password: String,
    pub port: u16,
}

impl Settings {
    pub fn load(overrides: &Overrides) -> Result<Self> {
        Self::resolve(overrides, FileConfig::load()?)
    }

    pub fn resolve(overrides: &Overrides, file: FileConfig) -> Result<Self> {
        let daemon = overrides
            .socket
            .clone()
            .or_else(|| std::env::var(SOCKET_ENV).ok().filter(|s| !s.is_empty()))
            .or(file.daemon);

        let endpoint = match daemon {
            Some(address) => address
                .parse()
                .with_context(|| format!("Invalid daemon address: {address}"))?,
            None => Endpoint::platform_default(),
        };

        Ok(Self {
            endpoint,
            username: overrides
                .username
                .clone()
                .or(file.username)
                .unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
            password: overrides
                .password
                .clone()
                .or(file.password)
                .unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
            port: overrides.port.or(file.port).unwrap_or(DEFAULT_PORT),
        })
    }
}
