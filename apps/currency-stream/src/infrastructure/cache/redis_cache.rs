//! Redis-backed cache.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::application::ports::{CacheBackend, CacheError};

const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared cache on a Redis instance.
///
/// The connection manager reconnects on its own; each call clones the
/// handle and issues a single command or one `MULTI`/`EXEC` pipeline.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache").finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Connect to Redis at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Read`] if the URL is invalid or the first
    /// connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(read_error)?;
        let conn = ConnectionManager::new(client).await.map_err(read_error)?;
        tracing::info!("Connected to Redis");
        Ok(Self { conn })
    }
}

#[allow(clippy::needless_pass_by_value)]
fn read_error(e: redis::RedisError) -> CacheError {
    CacheError::Read {
        message: e.to_string(),
    }
}

#[allow(clippy::needless_pass_by_value)]
fn write_error(e: redis::RedisError) -> CacheError {
    CacheError::Write {
        message: e.to_string(),
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(read_error)?;
        Ok(value)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(read_error)?;
        Ok(values)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn set_many_ex(
        &self,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        let secs = ttl_secs(ttl);
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            pipe.cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(secs)
                .ignore();
        }

        let mut conn = self.conn.clone();
        let () = pipe.query_async(&mut conn).await.map_err(write_error)?;
        Ok(())
    }

    async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        let cmd = redis::cmd("PING");
        let ping = cmd.query_async::<String>(&mut conn);
        matches!(tokio::time::timeout(PING_TIMEOUT, ping).await, Ok(Ok(_)))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
