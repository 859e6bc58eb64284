//! Quarry Storage - Store Cache Layer
//!
//! The backing store contract ([`StoreAdapter`]), the per-model write-behind
//! cache with its query merge and flush logic, an in-memory reference store,
//! and SQL rendering of store-side queries for relational adapters.

pub mod adapter;
pub mod cache;
pub mod memory;
pub mod sql;

pub use adapter::{StoreAdapter, StoreQuery};
pub use cache::{
    CacheEntry, CachedModel, EntityCache, FlushSnapshot, FlushSummary, ModelStats, RemovedEntry,
    StoreCache,
};
pub use memory::{MemoryStore, MemoryTransaction};
pub use sql::{quote_ident, SqlQuery};
