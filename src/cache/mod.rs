//! Redis cache layer.
//!
//! This module provides:
//! - `CacheManager`: a shared single-node or cluster connection with typed
//!   helpers for values, strings, hashes, lists, sets and counters
//! - `CacheBatch`: atomic MULTI/EXEC batches
//! - `CacheQueue`: a JSON work queue on a Redis list

pub mod batch;
pub mod client;
pub mod codec;
pub mod manager;
pub mod queue;

pub use batch::CacheBatch;
pub use client::{CacheConnection, CacheSettings};
pub use manager::CacheManager;
pub use queue::CacheQueue;
