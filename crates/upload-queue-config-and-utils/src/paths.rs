//! File system paths for the daemon.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Base directory name under the home directory.
const BASE_DIR_NAME: &str = ".upload-queue";
/// Default database file name under the base directory.
const DATABASE_FILE_NAME: &str = "upload-queue.sqlite";

/// Manages file system paths for the daemon.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for config and data (~/.upload-queue)
    base_dir: PathBuf,
}

impl Paths {
    /// Paths rooted at `~/.upload-queue`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Paths rooted at a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.upload-queue).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.upload-queue/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the default database file path (~/.upload-queue/upload-queue.sqlite).
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join(DATABASE_FILE_NAME)
    }

    /// Ensure the base directory exists.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }
}
