//! Redis store backend

use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use tracing::error;

use super::StoreBackend;
use crate::{Error, Result};

/// Redis-backed store using a reconnecting connection manager
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect and verify the server answers PING.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] when the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self> {
        let client =
            Client::open(url).map_err(|e| Error::Store(format!("redis connect: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Store(format!("redis connection manager: {e}")))?;

        let mut ping_conn = conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut ping_conn)
            .await
            .map_err(|e| Error::Store(format!("redis ping: {e}")))?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl StoreBackend for RedisStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| {
                error!(error = %e, "redis set failed");
                Error::Store(e.to_string())
            })
    }

    async fn get(&self, key: &str) -> Result<String> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.map_err(|e| {
            error!(error = %e, "redis get failed");
            Error::Store(e.to_string())
        })?;
        value.ok_or(Error::NoSessionStateFound)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(|e| {
            error!(error = %e, "redis delete failed");
            Error::Store(e.to_string())
        })
    }

    async fn close(&self) -> Result<()> {
        // ConnectionManager tears down on drop
        Ok(())
    }
}
