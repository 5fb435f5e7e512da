//! Single-initialization slot for shared backend handles.
//!
//! A `ResourceSlot` holds at most one live handle. Creation goes through an async
//! mutex with a double check, so concurrent first callers build the resource
//! exactly once. Reads only touch a short synchronous lock and never wait on an
//! in-progress initialization.

use crate::error::{DbError, DbResult};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct ResourceSlot<T> {
    name: &'static str,
    value: RwLock<Option<Arc<T>>>,
    init_lock: Mutex<()>,
    created: AtomicU64,
}

impl<T> ResourceSlot<T> {
    /// Create an empty slot. `name` appears in `NotInitialized` errors.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            value: RwLock::new(None),
            init_lock: Mutex::new(()),
            created: AtomicU64::new(0),
        }
    }

    fn read(&self) -> Option<Arc<T>> {
        match self.value.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, value: Option<Arc<T>>) -> Option<Arc<T>> {
        let mut guard = match self.value.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, value)
    }

    /// Get the live handle.
    pub fn get(&self) -> DbResult<Arc<T>> {
        self.read()
            .ok_or_else(|| DbError::not_initialized(self.name))
    }

    pub fn is_initialized(&self) -> bool {
        self.read().is_some()
    }

    /// Return the live handle, creating it with `factory` when the slot is empty.
    ///
    /// Returns `(handle, created)` where `created` is true only for the caller
    /// whose factory ran. A failed factory leaves the slot empty.
    pub async fn get_or_init<F, Fut>(&self, factory: F) -> DbResult<(Arc<T>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        if let Some(existing) = self.read() {
            return Ok((existing, false));
        }

        let _guard = self.init_lock.lock().await;
        if let Some(existing) = self.read() {
            return Ok((existing, false));
        }

        let created = Arc::new(factory().await?);
        self.replace(Some(Arc::clone(&created)));
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok((created, true))
    }

    /// Remove the live handle, if any.
    ///
    /// Waits for an in-progress initialization so a close never races a create.
    pub async fn take(&self) -> Option<Arc<T>> {
        let _guard = self.init_lock.lock().await;
        self.replace(None)
    }

    /// Number of times a handle has been created in this slot.
    pub fn generation(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_get_before_init() {
        let slot: ResourceSlot<u32> = ResourceSlot::new("test pool");
        let err = slot.get().unwrap_err();
        assert!(matches!(err, DbError::NotInitialized { .. }));
        assert!(!slot.is_initialized());
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let slot = ResourceSlot::new("test pool");
        let (first, created) = slot.get_or_init(|| async { Ok(1u32) }).await.unwrap();
        assert!(created);
        let (second, created) = slot.get_or_init(|| async { Ok(2u32) }).await.unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second, 1);
        assert_eq!(slot.generation(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_init_creates_once() {
        let slot = Arc::new(ResourceSlot::new("test pool"));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..16u32 {
            let slot = Arc::clone(&slot);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                slot.get_or_init(|| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(i)
                })
                .await
                .map(|(v, _)| v)
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(slot.generation(), 1);
    }

    #[tokio::test]
    async fn test_failed_init_leaves_slot_empty() {
        let slot: ResourceSlot<u32> = ResourceSlot::new("test pool");
        let result = slot
            .get_or_init(|| async { Err(DbError::connection("refused", "start it")) })
            .await;
        assert!(result.is_err());
        assert!(!slot.is_initialized());

        slot.get_or_init(|| async { Ok(3) }).await.unwrap();
        assert_eq!(*slot.get().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_take_then_reinit() {
        let slot = ResourceSlot::new("test pool");
        slot.get_or_init(|| async { Ok(1u32) }).await.unwrap();
        assert_eq!(slot.take().await.map(|v| *v), Some(1));
        assert!(slot.take().await.is_none());
        assert!(slot.get().is_err());

        slot.get_or_init(|| async { Ok(2u32) }).await.unwrap();
        assert_eq!(*slot.get().unwrap(), 2);
        assert_eq!(slot.generation(), 2);
    }
}
