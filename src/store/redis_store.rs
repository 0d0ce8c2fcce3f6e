//! Redis-backed shared store.

use super::Store;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Store shared by every gateway instance pointing at the same Redis.
///
/// Holds one multiplexed connection; clones of it are cheap and share the
/// underlying socket. Every round-trip is bounded by `op_timeout` so a slow
/// Redis degrades into a store error (and the callers' local fallbacks)
/// rather than stalling requests.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    op_timeout: Duration,
}

fn store_error(msg: impl Into<String>, details: impl Into<String>) -> Error {
    Error::store_with_context(
        msg,
        ErrorContext::new()
            .with_details(details)
            .with_source("redis_store"),
    )
}

/// `SET EX` takes whole seconds: round up so a key never expires before its TTL.
fn expire_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

impl RedisStore {
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| store_error("invalid redis url", e.to_string()))?;
        let conn = timeout(op_timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| store_error("redis connect timed out", url.to_string()))?
            .map_err(|e| store_error("redis connect failed", e.to_string()))?;
        Ok(Self { conn, op_timeout })
    }

    async fn bounded<T, Fut>(&self, what: &'static str, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        match timeout(self.op_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(store_error(format!("redis {} failed", what), e.to_string())),
            Err(_) => Err(store_error(
                format!("redis {} timed out", what),
                format!("{}ms", self.op_timeout.as_millis()),
            )),
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn sliding_window_hit(
        &self,
        key: &str,
        member: &str,
        now_ms: u64,
        window_ms: u64,
        expire_ms: u64,
    ) -> Result<u64> {
        let cutoff = now_ms.saturating_sub(window_ms);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .zrembyscore(key, 0u64, cutoff)
            .ignore()
            .zcard(key)
            .zadd(key, member, now_ms)
            .ignore()
            .pexpire(key, expire_ms as i64)
            .ignore();

        let mut conn = self.conn.clone();
        let (before,): (u64,) = self
            .bounded("sliding window", pipe.query_async(&mut conn))
            .await?;
        Ok(before + 1)
    }

    async fn window_clear(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self.bounded("del", conn.del(key)).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        self.bounded("get", conn.get(key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let secs = expire_secs(ttl);
        let mut conn = self.conn.clone();
        let _: () = self.bounded("set", conn.set_ex(key, value.to_vec(), secs)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = self.bounded("del", conn.del(key)).await?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = self
            .bounded("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        if pong.eq_ignore_ascii_case("PONG") {
            Ok(())
        } else {
            Err(store_error("unexpected ping reply", pong))
        }
    }

    fn name(&self) -> &'static str {
        "redis"
    }

    fn is_distributed(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expire_secs_rounds_up() {
        assert_eq!(expire_secs(Duration::from_millis(1_900)), 2);
        assert_eq!(expire_secs(Duration::from_secs(60)), 60);
        assert_eq!(expire_secs(Duration::from_millis(1)), 1);
        assert_eq!(expire_secs(Duration::ZERO), 1);
    }
}
