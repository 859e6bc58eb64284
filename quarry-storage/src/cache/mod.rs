//! Write-behind cache between the indexer's mutation API and the store.
//!
//! Each entity type gets a [`CachedModel`]: writes land in its
//! [`EntityCache`] tagged with a block height and a sequence number drawn
//! from a shared [`quarry_core::SequenceGenerator`]; reads merge the cache
//! with the backing store; [`CachedModel::flush`] hands buffered writes to
//! the store inside a caller-owned transaction and evicts what it wrote.
//!
//! # Example
//!
//! ```ignore
//! let cache = StoreCache::new(NodeConfig::from_env(), Arc::new(store))?;
//! let transfers = cache.register(schema, false)?;
//!
//! transfers.set("0xabc", row, height)?;
//! let page = transfers
//!     .get_by_fields(&[FilterExpr::eq("token", json!("DOT"))], &QueryOptions::new().with_limit(50))
//!     .await?;
//!
//! if cache.is_flushable()? {
//!     let mut tx = db.begin().await?;
//!     cache.flush(&mut tx, height).await?;
//!     tx.commit().await?;
//! }
//! ```

pub mod entry;
pub mod model;
pub mod store_cache;

pub use entry::{CacheEntry, EntityCache, FlushSnapshot, RemovedEntry};
pub use model::{CachedModel, FlushSummary, ModelStats};
pub use store_cache::StoreCache;
