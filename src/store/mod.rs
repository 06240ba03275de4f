//! Refresh-token persistence
//!
//! The store is consulted only when the operator chooses server-side refresh
//! token storage; cookie-only mode never touches it. Keys are a stable
//! digest of the access token so the refresh token is retrievable without
//! trusting the client to echo it.
//!
//! Backends are selected by the `store-url` scheme at construction time:
//! `memory://`, `file:///var/lib/gateway`, `redis://host:6379`.

mod file;
mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use url::Url;

pub use self::file::FileStore;
pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::{Error, Result};

/// Store contract: TTL'd key/value persistence of refresh tokens.
///
/// Implementations must tolerate concurrent `get`/`set` on the same key;
/// the session manager serializes refresh per subject above this layer.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Persist a value under a key with a TTL
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    /// Retrieve a value; [`Error::NoSessionStateFound`] when absent or expired
    async fn get(&self, key: &str) -> Result<String>;
    /// Remove a key; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<()>;
    /// Release backend resources
    async fn close(&self) -> Result<()>;
}

/// Tagged store dispatching to the configured backend
pub enum Store {
    /// In-process map, lost on restart
    Memory(MemoryStore),
    /// File-per-key persistence
    File(FileStore),
    /// Redis-backed persistence
    Redis(RedisStore),
}

impl Store {
    /// Construct the backend selected by the URL scheme.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown scheme or malformed URL and
    /// [`Error::Store`] when the backend cannot be reached.
    pub async fn from_url(url: &str) -> Result<Self> {
        let parsed =
            Url::parse(url).map_err(|e| Error::Config(format!("invalid store-url: {e}")))?;

        match parsed.scheme() {
            "memory" => Ok(Self::Memory(MemoryStore::new())),
            "file" => Ok(Self::File(FileStore::new(parsed.path())?)),
            "redis" | "rediss" => Ok(Self::Redis(RedisStore::connect(url).await?)),
            other => Err(Error::Config(format!("unknown store scheme: {other}"))),
        }
    }
}

#[async_trait]
impl StoreBackend for Store {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        match self {
            Self::Memory(s) => s.set(key, value, ttl).await,
            Self::File(s) => s.set(key, value, ttl).await,
            Self::Redis(s) => s.set(key, value, ttl).await,
        }
    }

    async fn get(&self, key: &str) -> Result<String> {
        match self {
            Self::Memory(s) => s.get(key).await,
            Self::File(s) => s.get(key).await,
            Self::Redis(s) => s.get(key).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            Self::Memory(s) => s.delete(key).await,
            Self::File(s) => s.delete(key).await,
            Self::Redis(s) => s.delete(key).await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            Self::Memory(s) => s.close().await,
            Self::File(s) => s.close().await,
            Self::Redis(s) => s.close().await,
        }
    }
}

/// Stable store key for an access token
#[must_use]
pub fn hash_key(access_token: &str) -> String {
    let digest = Sha256::digest(access_token.as_bytes());
    format!("{digest:x}")
}
