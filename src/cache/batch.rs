//! Atomic command batches.
//!
//! A `CacheBatch` queues commands locally and sends them as one MULTI/EXEC
//! transaction on `execute`. Nothing reaches the server before that, so a
//! batch that is dropped unexecuted leaves no trace.

use crate::cache::client::CacheConnection;
use crate::cache::codec;
use crate::error::DbResult;
use redis::{Cmd, Pipeline, Value};
use serde::Serialize;
use tracing::debug;

pub struct CacheBatch {
    conn: CacheConnection,
    pipe: Pipeline,
    queued: usize,
}

impl std::fmt::Debug for CacheBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBatch")
            .field("queued", &self.queued)
            .finish_non_exhaustive()
    }
}

pub(crate) fn expire_arg(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

impl CacheBatch {
    pub(crate) fn new(conn: CacheConnection) -> Self {
        let mut pipe = redis::pipe();
        pipe.atomic();
        Self {
            conn,
            pipe,
            queued: 0,
        }
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.queued
    }

    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }

    /// Queue an arbitrary command.
    pub fn cmd(&mut self, cmd: Cmd) -> &mut Self {
        self.pipe.add_command(cmd);
        self.queued += 1;
        self
    }

    /// Queue a MessagePack-encoded SET, with SETEX semantics when `expire` is given.
    pub fn set<T: Serialize + ?Sized>(
        &mut self,
        key: &str,
        value: &T,
        expire: Option<u64>,
    ) -> DbResult<&mut Self> {
        let bytes = codec::encode(value)?;
        Ok(self.set_raw(key, bytes, expire))
    }

    pub fn set_str(&mut self, key: &str, value: &str, expire: Option<u64>) -> &mut Self {
        self.set_raw(key, value.as_bytes().to_vec(), expire)
    }

    fn set_raw(&mut self, key: &str, bytes: Vec<u8>, expire: Option<u64>) -> &mut Self {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(bytes);
        if let Some(secs) = expire.filter(|s| *s > 0) {
            cmd.arg("EX").arg(secs);
        }
        self.cmd(cmd)
    }

    pub fn delete(&mut self, key: &str) -> &mut Self {
        self.cmd(redis::cmd("DEL").arg(key).clone())
    }

    pub fn expire(&mut self, key: &str, secs: u64) -> &mut Self {
        self.cmd(redis::cmd("EXPIRE").arg(key).arg(expire_arg(secs)).clone())
    }

    pub fn incr(&mut self, key: &str, amount: i64) -> &mut Self {
        self.cmd(redis::cmd("INCRBY").arg(key).arg(amount).clone())
    }

    pub fn hset<T: Serialize + ?Sized>(
        &mut self,
        key: &str,
        field: &str,
        value: &T,
    ) -> DbResult<&mut Self> {
        let bytes = codec::encode(value)?;
        Ok(self.cmd(redis::cmd("HSET").arg(key).arg(field).arg(bytes).clone()))
    }

    pub fn rpush<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> DbResult<&mut Self> {
        let bytes = codec::encode(value)?;
        Ok(self.cmd(redis::cmd("RPUSH").arg(key).arg(bytes).clone()))
    }

    pub fn sadd<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> DbResult<&mut Self> {
        let bytes = codec::encode(value)?;
        Ok(self.cmd(redis::cmd("SADD").arg(key).arg(bytes).clone()))
    }

    /// Send the batch as one MULTI/EXEC and return one reply per command.
    pub async fn execute(mut self) -> DbResult<Vec<Value>> {
        if self.queued == 0 {
            return Ok(Vec::new());
        }
        let queued = std::mem::take(&mut self.queued);
        let replies: Vec<Value> = self.pipe.query_async(&mut self.conn).await?;
        debug!(commands = queued, "Cache batch executed");
        Ok(replies)
    }
}

impl Drop for CacheBatch {
    fn drop(&mut self) {
        if self.queued > 0 {
            debug!(commands = self.queued, "Cache batch discarded without executing");
        }
    }
}
