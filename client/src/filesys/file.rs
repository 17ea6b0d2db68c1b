//! File operations

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::ClientError;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        let contents = fs::read_to_string(&self.path).await?;
        serde_json::from_str(&contents).map_err(|e| {
            ClientError::StorageError(format!("{}: {}", self.path.display(), e))
        })
    }

    /// Serialize to a sibling temp file, then rename over the target so a
    /// reader never sees a half-written document.
    pub async fn write_json_atomic<T: Serialize>(&self, value: &T) -> Result<(), ClientError> {
        let contents = serde_json::to_vec_pretty(value)
            .map_err(|e| ClientError::StorageError(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&contents).await?;
        file.sync_all().await?;
        drop(file);

        set_owner_only(&temp_path).await?;
        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    /// Delete the file; a missing file is not an error.
    pub async fn delete(&self) -> Result<(), ClientError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// 0o600 on Unix, no-op elsewhere.
async fn set_owner_only(path: &Path) -> Result<(), ClientError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let meta = fs::metadata(path).await?;
        let mut perms = meta.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms).await?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
