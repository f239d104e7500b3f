use std::env::current_exe;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::str;
use std::sync::Arc;
use directories_next::ProjectDirs;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::{debug, info, warn};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::config::types::Config;
use crate::error::ConfigError;

const CONFIG_FILE_NAME: &str = "kestrel-link.json";

/// `kestrel-link.json` next to the executable, for installs that travel on a usb stick.
fn portable_config_path() -> Option<PathBuf> {
    let mut path = match current_exe() {
        Ok(path) => path,
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            return None;
        },
    };

    if !path.set_extension("json") {
        warn!("current exe has no filename: {}", path.to_string_lossy());
        return None;
    }
    Some(path)
}

/// `kestrel-link.json` in the per-user config directory, e.g. `~/.config/kestrel-link`.
fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("io", "kestrel-link", "kestrel-link").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// The portable file wins, but only if somebody created it.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    match portable_config_path() {
        Some(path) if path.is_file() => Ok(path),
        _ => user_config_path().ok_or(ConfigError::NoConfigPath),
    }
}

/// Exclusive lock on the config file, taken by commands that drive the bluetooth adapter.
pub struct InstanceLock {
    rw_lock: RwLock<std::fs::File>,
}

impl InstanceLock {
    /// Fails immediately when another process holds the adapter.
    pub fn acquire(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, ConfigError> {
        self.rw_lock.try_write().map_err(|source| ConfigError::CanNotLock { source })
    }
}

/// The config file, opened once (created if missing) and shared by every clone.
#[derive(Clone)]
pub struct ConfigIO {
    path: PathBuf,
    file: Arc<std::fs::File>,
}

impl ConfigIO {
    pub fn open_default() -> Result<Self, ConfigError> {
        Self::open(&default_config_path()?)
    }

    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent() {
            std::fs::create_dir_all(directory)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(ConfigIO { path: path.to_path_buf(), file: Arc::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn instance_lock(&self) -> Result<InstanceLock, ConfigError> {
        Ok(InstanceLock { rw_lock: RwLock::new(self.file.try_clone()?) })
    }

    // a duplicate handle: dropping it leaves the shared descriptor (and its lock) alone
    fn handle(&self) -> Result<File, ConfigError> {
        Ok(File::from_std(self.file.try_clone()?))
    }

    /// A blank file reads as the defaults.
    pub async fn read(&self) -> Result<Config, ConfigError> {
        let mut file = self.handle()?;
        debug!("Reading {}", self.path.to_string_lossy());

        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        if content.iter().all(u8::is_ascii_whitespace) {
            info!("Config file is empty, using defaults");
            return Ok(Config::default());
        }

        let mut config: Config = serde_json::from_str(str::from_utf8(&content)?)?;
        config.normalize();
        Ok(config)
    }

    pub async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let mut file = self.handle()?;
        info!("Saving config to {}", self.path.to_string_lossy());

        let content = serde_json::to_string_pretty(config)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
