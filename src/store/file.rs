//! File-backed store backend
//!
//! One JSON file per key under a base directory, so a single-instance
//! deployment survives restarts without an external service. Files carry
//! their own expiry and are removed lazily when read after it.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use super::StoreBackend;
use crate::{Error, Result};

#[derive(Serialize, Deserialize)]
struct FileEntry {
    value: String,
    expires_at: u64,
}

impl FileEntry {
    fn is_expired(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        now >= self.expires_at
    }
}

/// File-per-key store rooted at a base directory
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Create the store, creating the base directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] when the directory cannot be created.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)
            .map_err(|e| Error::Store(format!("cannot create store dir: {e}")))?;
        Ok(Self { base_dir })
    }

    // Keys are already hex digests, safe as file names
    fn path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl StoreBackend for FileStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let expires_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            + ttl.as_secs();

        let entry = FileEntry {
            value: value.to_string(),
            expires_at,
        };
        let path = self.path(key);
        let content = serde_json::to_string(&entry)?;
        fs::write(&path, content)
            .await
            .map_err(|e| Error::Store(format!("cannot write entry: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = fs::set_permissions(&path, perms).await;
        }

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String> {
        let path = self.path(key);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(_) => return Err(Error::NoSessionStateFound),
        };
        let entry: FileEntry =
            serde_json::from_str(&content).map_err(|_| Error::NoSessionStateFound)?;
        if entry.is_expired() {
            debug!(key = %key, "evicting expired store entry");
            let _ = fs::remove_file(&path).await;
            return Err(Error::NoSessionStateFound);
        }
        Ok(entry.value)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path(key);
        if fs::try_exists(&path).await.unwrap_or(false) {
            fs::remove_file(&path)
                .await
                .map_err(|e| Error::Store(format!("cannot delete entry: {e}")))?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
