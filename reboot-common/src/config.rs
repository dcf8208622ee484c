//! Configuration loading and root folder resolution
//!
//! Configuration comes from an optional TOML file. A missing file is not an
//! error: the service logs a warning and starts on compiled defaults; a
//! malformed one is. The root folder (database + local object storage) is
//! resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`REBOOT_ROOT`)
//! 3. TOML config file (`root_folder`)
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "REBOOT_ROOT";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "reboot.db";

/// Directory (inside the root folder) backing the local object store
pub const STORAGE_DIR: &str = "storage";

/// Top-level TOML configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub bind_address: String,
    pub port: u16,
    pub log_level: String,
    pub storage: StorageConfig,
    pub image: ImageConfig,
    pub submission: SubmissionConfig,
    pub upload: UploadConfig,
    pub session: SessionConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            bind_address: "127.0.0.1".to_string(),
            port: 5740,
            log_level: "info".to_string(),
            storage: StorageConfig::default(),
            image: ImageConfig::default(),
            submission: SubmissionConfig::default(),
            upload: UploadConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Which object store receives sole photos
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Files under `<root>/storage`, served by the intake service itself
    Local,
    /// Hosted storage REST API
    Remote,
}

/// `[storage]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Base URL of the hosted backend (remote backend only)
    pub url: Option<String>,
    /// Service API key sent as bearer token (remote backend only)
    pub api_key: Option<String>,
    pub bucket: String,
    /// Public base URL for the local backend; defaults to this service's `/storage`
    pub public_base_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            url: None,
            api_key: None,
            bucket: "shoe-photos".to_string(),
            public_base_url: None,
        }
    }
}

/// `[image]` section - sole photo normalization bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub max_width: u32,
    pub max_height: u32,
    /// JPEG quality, 1-100
    pub quality: u8,
    /// Hard ceiling on the decoded payload, in bytes
    pub max_bytes: usize,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_width: 800,
            max_height: 800,
            quality: 80,
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

/// `[submission]` section - orchestrator retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

/// `[upload]` section - uploader retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Total attempts, including the first
    pub attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

/// `[session]` section - eviction of abandoned drafts and settled submissions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Drafts untouched for this long are dropped
    pub draft_ttl_secs: u64,
    /// Settled submissions are unmounted this long after their last change
    pub submission_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            draft_ttl_secs: 24 * 60 * 60,
            submission_ttl_secs: 60 * 60,
            sweep_interval_secs: 60,
        }
    }
}

impl TomlConfig {
    /// Parse a config file at an explicit path
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str::<TomlConfig>(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.image.quality == 0 || self.image.quality > 100 {
            return Err(Error::Config(format!(
                "image.quality must be within 1-100, got {}",
                self.image.quality
            )));
        }
        if self.image.max_width == 0 || self.image.max_height == 0 {
            return Err(Error::Config(
                "image.max_width and image.max_height must be non-zero".to_string(),
            ));
        }
        if self.session.sweep_interval_secs == 0 {
            return Err(Error::Config(
                "session.sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.upload.attempts == 0 {
            return Err(Error::Config("upload.attempts must be at least 1".to_string()));
        }
        if self.storage.backend == StorageBackend::Remote && self.storage.url.is_none() {
            return Err(Error::Config(
                "storage.url is required for the remote backend".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolve the root folder following the documented priority order
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// Create the root folder if missing
pub fn ensure_root_folder(root: &Path) -> Result<()> {
    if !root.exists() {
        info!("Creating root folder: {}", root.display());
    }
    std::fs::create_dir_all(root)?;
    Ok(())
}

/// Database path inside the root folder
pub fn database_path(root: &Path) -> PathBuf {
    root.join(DATABASE_FILE)
}

/// Local object storage directory inside the root folder
pub fn storage_path(root: &Path) -> PathBuf {
    root.join(STORAGE_DIR)
}

/// Platform config file location, if one exists
///
/// Checks `~/.config/reboot/config.toml`, then `/etc/reboot/config.toml` on unix.
pub fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("reboot").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/reboot/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/reboot
        dirs::data_local_dir()
            .map(|d| d.join("reboot"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/reboot"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("reboot"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/reboot"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("reboot"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\reboot"))
    } else {
        PathBuf::from("./reboot_data")
    }
}
