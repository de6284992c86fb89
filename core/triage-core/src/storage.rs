//! Storage configuration and path management for crashwatch.
//!
//! All file paths the applet touches are decided here so that tests can point
//! the whole system at a temp directory with [`StorageConfig::with_root`].

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Result, TriageError};

pub const CACHE_DIR_ENV: &str = "CRASHWATCH_CACHE_DIR";
pub const SOCKET_ENV: &str = "CRASHWATCH_SOCKET";

const APP_DIR_NAME: &str = "crashwatch";
const SYSTEM_DUMP_LOCATION: &str = "/var/spool/abrt";

/// Central configuration for all crashwatch storage paths.
///
/// Production code uses [`StorageConfig::from_user_dirs`], which points at
/// `$XDG_CACHE_HOME/crashwatch` and `$XDG_CONFIG_HOME/crashwatch`.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Per-user cache root (seen list, socket, user spool)
    cache_root: PathBuf,
    /// Per-user configuration root (applet.toml)
    config_root: PathBuf,
}

impl StorageConfig {
    /// Resolves the per-user directories, honoring `CRASHWATCH_CACHE_DIR`.
    pub fn from_user_dirs() -> Result<Self> {
        let cache_root = match env::var_os(CACHE_DIR_ENV) {
            Some(path) => PathBuf::from(path),
            None => dirs::cache_dir()
                .ok_or(TriageError::CacheDirNotFound)?
                .join(APP_DIR_NAME),
        };
        let config_root = dirs::config_dir()
            .map(|dir| dir.join(APP_DIR_NAME))
            .unwrap_or_else(|| cache_root.join("config"));
        Ok(Self {
            cache_root,
            config_root,
        })
    }

    /// Creates a StorageConfig rooted at a single directory.
    /// Used for testing with temp directories.
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            config_root: root.join("config"),
            cache_root: root,
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Path to the newline-delimited list of already-seen problem directories.
    pub fn seen_list_file(&self) -> PathBuf {
        self.cache_root.join("applet_dirlist")
    }

    /// Path to the applet's Unix socket, honoring `CRASHWATCH_SOCKET`.
    pub fn socket_file(&self) -> PathBuf {
        match env::var_os(SOCKET_ENV) {
            Some(path) => PathBuf::from(path),
            None => self.cache_root.join("applet.sock"),
        }
    }

    /// Per-user spool where unprivileged crashes are dumped.
    pub fn user_spool_dir(&self) -> PathBuf {
        self.cache_root.join("spool")
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_root.join("applet.toml")
    }

    /// Watch roots used when neither the config nor the command line names any.
    pub fn default_watch_dirs(&self) -> Vec<PathBuf> {
        vec![PathBuf::from(SYSTEM_DUMP_LOCATION), self.user_spool_dir()]
    }
}
