//! Storage configuration.

use std::path::PathBuf;

/// Where uploads and job directories live.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root data directory
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl StorageConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("RECLIP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
        }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }

    /// Create the uploads and jobs directories.
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.uploads_dir()).await?;
        tokio::fs::create_dir_all(self.jobs_dir()).await?;
        Ok(())
    }
}
