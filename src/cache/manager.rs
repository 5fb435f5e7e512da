//! Cache client manager.
//!
//! Owns one multiplexed Redis connection (single node or cluster) between
//! `init_client` and `close`, and exposes typed helpers on top of it.
//!
//! Expiration arguments are whole seconds. `None` and `Some(0)` both mean the
//! key does not expire (or, on reads, that its TTL is left alone).
//!
//! Collection writes replace the whole key inside one MULTI/EXEC, so readers
//! never see a half-written list or set. In cluster mode every command of a
//! batch must hash to the same slot.

use crate::cache::batch::{CacheBatch, expire_arg};
use crate::cache::client::{CacheConnection, CacheSettings};
use crate::cache::codec;
use crate::cache::queue::CacheQueue;
use crate::db::ResourceSlot;
use crate::error::{DbError, DbResult};
use redis::AsyncCommands;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Member written and removed again to materialize an empty set.
const EMPTY_SET_SENTINEL: &[u8] = b"";

#[derive(Debug)]
struct ClientHandle {
    conn: CacheConnection,
    settings: CacheSettings,
}

#[derive(Debug)]
pub struct CacheManager {
    slot: ResourceSlot<ClientHandle>,
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}

fn ttl(expire: Option<u64>) -> Option<u64> {
    expire.filter(|secs| *secs > 0)
}

impl CacheManager {
    pub fn new() -> Self {
        Self {
            slot: ResourceSlot::new("Redis client"),
        }
    }

    /// Connect once. Later calls return immediately and ignore `settings`.
    pub async fn init_client(&self, settings: CacheSettings) -> DbResult<&Self> {
        settings.validate()?;

        let (handle, created) = self
            .slot
            .get_or_init(|| async {
                let conn = CacheConnection::connect(&settings).await?;
                Ok(ClientHandle {
                    conn,
                    settings: settings.clone(),
                })
            })
            .await?;

        if created {
            info!(
                target_addr = %handle.settings.display_target(),
                cluster = handle.conn.is_cluster(),
                "Redis client initialized"
            );
        } else {
            debug!("Redis client already initialized, ignoring new settings");
        }
        Ok(self)
    }

    /// Get a handle on the shared connection.
    pub fn get_client(&self) -> DbResult<CacheConnection> {
        self.slot.get().map(|h| h.conn.clone())
    }

    pub fn settings(&self) -> Option<CacheSettings> {
        self.slot.get().ok().map(|h| h.settings.clone())
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.is_initialized()
    }

    /// Drop the shared connection. Clones already handed out keep working
    /// until they are dropped.
    pub async fn close(&self) {
        if self.slot.take().await.is_some() {
            info!("Redis client closed");
        }
    }

    pub async fn ping(&self) -> DbResult<()> {
        let mut conn = self.get_client()?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    // =========================================================================
    // Opaque values
    // =========================================================================

    /// Store `value` as MessagePack.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expire: Option<u64>,
    ) -> DbResult<()> {
        let bytes = codec::encode(value)?;
        self.set_bytes(key, bytes, expire).await
    }

    /// Read a MessagePack value.
    ///
    /// Returns `None` when the key is absent or when the stored bytes do not
    /// decode as `T` (the latter is logged).
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        expire: Option<u64>,
    ) -> DbResult<Option<T>> {
        let Some(bytes) = self.get_bytes(key, expire).await? else {
            return Ok(None);
        };
        Ok(codec::decode_or_warn(key, &bytes))
    }

    pub async fn set_str(&self, key: &str, value: &str, expire: Option<u64>) -> DbResult<()> {
        self.set_bytes(key, value.as_bytes().to_vec(), expire).await
    }

    /// Read a UTF-8 string. Invalid UTF-8 is logged and reported as a miss.
    pub async fn get_str(&self, key: &str, expire: Option<u64>) -> DbResult<Option<String>> {
        let Some(bytes) = self.get_bytes(key, expire).await? else {
            return Ok(None);
        };
        match String::from_utf8(bytes) {
            Ok(s) => Ok(Some(s)),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding non-UTF-8 string value");
                Ok(None)
            }
        }
    }

    async fn set_bytes(&self, key: &str, bytes: Vec<u8>, expire: Option<u64>) -> DbResult<()> {
        let mut conn = self.get_client()?;
        match ttl(expire) {
            Some(secs) => conn.set_ex::<_, _, ()>(key, bytes, secs).await?,
            None => conn.set::<_, _, ()>(key, bytes).await?,
        }
        Ok(())
    }

    async fn get_bytes(&self, key: &str, expire: Option<u64>) -> DbResult<Option<Vec<u8>>> {
        let mut conn = self.get_client()?;
        match ttl(expire) {
            Some(secs) => {
                let (bytes,): (Option<Vec<u8>>,) = redis::pipe()
                    .get(key)
                    .expire(key, expire_arg(secs))
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
                Ok(bytes)
            }
            None => Ok(conn.get(key).await?),
        }
    }

    // =========================================================================
    // Hashes
    // =========================================================================

    /// Merge `fields` into the hash at `key`. Returns the number of new fields.
    pub async fn set_dict<T: Serialize>(
        &self,
        key: &str,
        fields: &HashMap<String, T>,
        expire: Option<u64>,
    ) -> DbResult<u64> {
        let mut conn = self.get_client()?;
        if fields.is_empty() {
            return Ok(0);
        }

        let mut hset = redis::cmd("HSET");
        hset.arg(key);
        for (field, value) in fields {
            hset.arg(field).arg(codec::encode(value)?);
        }

        let mut pipe = redis::pipe();
        pipe.atomic().add_command(hset);
        if let Some(secs) = ttl(expire) {
            pipe.expire(key, expire_arg(secs)).ignore();
        }
        let (added,): (u64,) = pipe.query_async(&mut conn).await?;
        Ok(added)
    }

    /// Read the hash at `key`. A missing key yields an empty map; fields that
    /// do not decode as `T` are logged and skipped.
    pub async fn get_dict<T: DeserializeOwned>(
        &self,
        key: &str,
        expire: Option<u64>,
    ) -> DbResult<HashMap<String, T>> {
        let mut conn = self.get_client()?;
        let mut pipe = redis::pipe();
        pipe.hgetall(key);
        if let Some(secs) = ttl(expire) {
            pipe.expire(key, expire_arg(secs)).ignore();
        }
        let (raw,): (HashMap<String, Vec<u8>>,) = pipe.query_async(&mut conn).await?;

        let mut out = HashMap::with_capacity(raw.len());
        for (field, bytes) in raw {
            match codec::try_decode(&bytes) {
                Ok(value) => {
                    out.insert(field, value);
                }
                Err(e) => warn!(key = %key, field = %field, error = %e, "Skipping undecodable hash field"),
            }
        }
        Ok(out)
    }

    // =========================================================================
    // Lists and sets
    // =========================================================================

    /// Replace the list at `key` with `values`, in order. An empty slice
    /// leaves the key absent. Returns the new list length.
    pub async fn set_list<T: Serialize>(
        &self,
        key: &str,
        values: &[T],
        expire: Option<u64>,
    ) -> DbResult<u64> {
        let members = encode_all(values)?;
        let mut conn = self.get_client()?;

        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore();
        if members.is_empty() {
            pipe.query_async::<()>(&mut conn).await?;
            return Ok(0);
        }

        pipe.rpush(key, members);
        if let Some(secs) = ttl(expire) {
            pipe.expire(key, expire_arg(secs)).ignore();
        }
        let (len,): (u64,) = pipe.query_async(&mut conn).await?;
        debug!(key = %key, len, "List replaced");
        Ok(len)
    }

    /// Read the list at `key` in stored order. Elements that do not decode
    /// are logged and skipped.
    pub async fn get_list<T: DeserializeOwned>(
        &self,
        key: &str,
        expire: Option<u64>,
    ) -> DbResult<Vec<T>> {
        let mut conn = self.get_client()?;
        let mut pipe = redis::pipe();
        pipe.lrange(key, 0, -1);
        if let Some(secs) = ttl(expire) {
            pipe.expire(key, expire_arg(secs)).ignore();
        }
        let (raw,): (Vec<Vec<u8>>,) = pipe.query_async(&mut conn).await?;
        Ok(decode_all(key, raw))
    }

    /// Replace the set at `key` with `values`. Returns the number of distinct
    /// members stored.
    pub async fn set_set<T: Serialize>(
        &self,
        key: &str,
        values: &[T],
        expire: Option<u64>,
    ) -> DbResult<u64> {
        let members = encode_all(values)?;
        let mut conn = self.get_client()?;

        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore();
        if members.is_empty() {
            pipe.sadd(key, EMPTY_SET_SENTINEL)
                .ignore()
                .srem(key, EMPTY_SET_SENTINEL)
                .ignore();
            pipe.query_async::<()>(&mut conn).await?;
            return Ok(0);
        }

        pipe.sadd(key, members);
        if let Some(secs) = ttl(expire) {
            pipe.expire(key, expire_arg(secs)).ignore();
        }
        let (added,): (u64,) = pipe.query_async(&mut conn).await?;
        Ok(added)
    }

    /// Add `values` to the set at `key`, keeping its existing members.
    /// Returns how many members were new. An empty `values` writes nothing.
    pub async fn set_set_merge<T: Serialize>(
        &self,
        key: &str,
        values: &[T],
        expire: Option<u64>,
    ) -> DbResult<u64> {
        let members = encode_all(values)?;
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get_client()?;

        let mut pipe = redis::pipe();
        pipe.atomic().sadd(key, members);
        if let Some(secs) = ttl(expire) {
            pipe.expire(key, expire_arg(secs)).ignore();
        }
        let (added,): (u64,) = pipe.query_async(&mut conn).await?;
        debug!(key = %key, added, "Set members merged");
        Ok(added)
    }

    /// Read the members of the set at `key`, in server order.
    pub async fn get_set<T: DeserializeOwned>(
        &self,
        key: &str,
        expire: Option<u64>,
    ) -> DbResult<Vec<T>> {
        let mut conn = self.get_client()?;
        let mut pipe = redis::pipe();
        pipe.smembers(key);
        if let Some(secs) = ttl(expire) {
            pipe.expire(key, expire_arg(secs)).ignore();
        }
        let (raw,): (Vec<Vec<u8>>,) = pipe.query_async(&mut conn).await?;
        Ok(decode_all(key, raw))
    }

    // =========================================================================
    // Counters and key management
    // =========================================================================

    pub async fn incr(&self, key: &str, amount: i64, expire: Option<u64>) -> DbResult<i64> {
        self.adjust(key, amount, expire).await
    }

    pub async fn decr(&self, key: &str, amount: i64, expire: Option<u64>) -> DbResult<i64> {
        let delta = amount
            .checked_neg()
            .ok_or_else(|| DbError::invalid_input("Decrement amount out of range"))?;
        self.adjust(key, delta, expire).await
    }

    async fn adjust(&self, key: &str, delta: i64, expire: Option<u64>) -> DbResult<i64> {
        let mut conn = self.get_client()?;
        let mut pipe = redis::pipe();
        pipe.atomic().incr(key, delta);
        if let Some(secs) = ttl(expire) {
            pipe.expire(key, expire_arg(secs)).ignore();
        }
        let (value,): (i64,) = pipe.query_async(&mut conn).await?;
        Ok(value)
    }

    /// Delete `keys`. Returns how many existed.
    pub async fn delete(&self, keys: &[&str]) -> DbResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get_client()?;
        Ok(conn.del(keys).await?)
    }

    pub async fn exists(&self, key: &str) -> DbResult<bool> {
        let mut conn = self.get_client()?;
        Ok(conn.exists(key).await?)
    }

    /// Set a TTL on an existing key. Returns false when the key is absent.
    pub async fn expire(&self, key: &str, secs: u64) -> DbResult<bool> {
        let mut conn = self.get_client()?;
        Ok(conn.expire(key, expire_arg(secs)).await?)
    }

    /// Remaining TTL in seconds: -1 without expiry, -2 when the key is absent.
    pub async fn ttl(&self, key: &str) -> DbResult<i64> {
        let mut conn = self.get_client()?;
        Ok(conn.ttl(key).await?)
    }

    /// Keys matching a glob `pattern`. Scans the whole keyspace; avoid on large databases.
    pub async fn keys(&self, pattern: &str) -> DbResult<Vec<String>> {
        let mut conn = self.get_client()?;
        Ok(conn.keys(pattern).await?)
    }

    pub async fn flush_db(&self) -> DbResult<()> {
        let mut conn = self.get_client()?;
        redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await?;
        warn!("Redis database flushed");
        Ok(())
    }

    // =========================================================================
    // Batches and queues
    // =========================================================================

    /// Start an atomic batch on the shared connection.
    pub fn pipeline(&self) -> DbResult<CacheBatch> {
        Ok(CacheBatch::new(self.get_client()?))
    }

    /// Build a batch with `f` and execute it when `f` succeeds. An error from
    /// `f` discards the batch and is returned as-is.
    pub async fn batch<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&mut CacheBatch) -> DbResult<T>,
    {
        let mut batch = self.pipeline()?;
        let value = f(&mut batch)?;
        batch.execute().await?;
        Ok(value)
    }

    /// Open a JSON work queue on the list at `name`.
    ///
    /// The queue gets its own connection so blocking pops never stall
    /// commands issued through this manager.
    pub async fn queue(&self, name: impl Into<String>) -> DbResult<CacheQueue> {
        let handle = self.slot.get()?;
        let conn = CacheConnection::connect(&handle.settings).await?;
        Ok(CacheQueue::new(name, conn))
    }
}

fn encode_all<T: Serialize>(values: &[T]) -> DbResult<Vec<Vec<u8>>> {
    values.iter().map(|v| codec::encode(v)).collect()
}

fn decode_all<T: DeserializeOwned>(key: &str, raw: Vec<Vec<u8>>) -> Vec<T> {
    let total = raw.len();
    let decoded: Vec<T> = raw
        .iter()
        .filter_map(|bytes| codec::decode_or_warn(key, bytes))
        .collect();
    if decoded.len() != total {
        warn!(key = %key, skipped = total - decoded.len(), "Skipped undecodable collection elements");
    }
    decoded
}
