//! FIFO work queue on a Redis list.
//!
//! Producers LPUSH JSON-encoded items and consumers pop from the right, so
//! items come out in the order they went in. JSON keeps the payload readable
//! by consumers written in other languages.

use crate::cache::client::CacheConnection;
use crate::cache::codec;
use crate::error::DbResult;
use redis::AsyncCommands;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CacheQueue {
    name: String,
    conn: CacheConnection,
}

impl CacheQueue {
    pub fn new(name: impl Into<String>, conn: CacheConnection) -> Self {
        Self {
            name: name.into(),
            conn,
        }
    }

    /// Redis key of the backing list.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue `item`. Returns the queue length after the push.
    pub async fn put<T: Serialize + ?Sized>(&self, item: &T) -> DbResult<u64> {
        let raw = codec::encode_json(item)?;
        let mut conn = self.conn.clone();
        let len: u64 = conn.lpush(&self.name, raw).await?;
        debug!(queue = %self.name, len, "Item enqueued");
        Ok(len)
    }

    /// Dequeue the oldest item, waiting up to `timeout` for one to arrive.
    /// `None` waits indefinitely; a zero timeout does not wait at all.
    pub async fn get<T: DeserializeOwned>(&self, timeout: Option<Duration>) -> DbResult<Option<T>> {
        let secs = match brpop_timeout(timeout) {
            Some(secs) => secs,
            None => return self.get_nowait().await,
        };
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&self.name)
            .arg(secs)
            .query_async(&mut conn)
            .await?;
        popped.map(|(_, raw)| codec::decode_json(&raw)).transpose()
    }

    /// Dequeue the oldest item without waiting.
    pub async fn get_nowait<T: DeserializeOwned>(&self) -> DbResult<Option<T>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.rpop(&self.name, None).await?;
        raw.map(|r| codec::decode_json(&r)).transpose()
    }

    pub async fn len(&self) -> DbResult<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(&self.name).await?)
    }

    pub async fn is_empty(&self) -> DbResult<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn clear(&self) -> DbResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&self.name).await?;
        Ok(())
    }

    /// Remove items equal to `item`.
    ///
    /// `count > 0` removes up to `count` matches from the head, `count < 0`
    /// from the tail, and `0` removes all of them. Returns how many were removed.
    pub async fn remove<T: Serialize + ?Sized>(&self, item: &T, count: isize) -> DbResult<u64> {
        let raw = codec::encode_json(item)?;
        let mut conn = self.conn.clone();
        Ok(conn.lrem(&self.name, count, raw).await?)
    }
}

/// BRPOP timeout argument, or `None` when the caller should not block.
/// BRPOP treats 0 as "forever", so only an absent timeout maps to it.
fn brpop_timeout(timeout: Option<Duration>) -> Option<f64> {
    match timeout {
        None => Some(0.0),
        Some(t) if t.is_zero() => None,
        Some(t) => Some(t.as_secs_f64()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brpop_timeout_mapping() {
        assert_eq!(brpop_timeout(None), Some(0.0));
        assert_eq!(brpop_timeout(Some(Duration::ZERO)), None);
        assert_eq!(brpop_timeout(Some(Duration::from_millis(250))), Some(0.25));
        assert_eq!(brpop_timeout(Some(Duration::from_secs(2))), Some(2.0));
    }
}
