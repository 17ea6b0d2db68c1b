//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::ClientError;
use crate::filesys::file::File;
use crate::storage::settings::Settings;

const DEFAULT_DIR_NAME: &str = ".jstratusd";

/// Storage layout for the client
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the credentials file path
    pub fn credentials_file(&self) -> File {
        File::new(self.base_dir.join("credentials.json"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Create the base and logs directories
    pub async fn setup(&self) -> Result<(), ClientError> {
        tokio::fs::create_dir_all(self.logs_dir()).await?;
        Ok(())
    }

    /// Settings from `settings.json`, defaults when the file does not exist
    pub async fn load_settings(&self) -> Result<Settings, ClientError> {
        let file = self.settings_file();
        if !file.exists().await {
            return Ok(Settings::default());
        }
        file.read_json::<Settings>().await
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_DIR_NAME);

        Self::new(base_dir)
    }
}
