//! Cached model: the write-behind cache of one entity type.
//!
//! Reads go cache first. The cache is authoritative for every id it holds,
//! live or removed, so the store is only asked for the complement.
//!
//! # Merge order
//!
//! [`CachedModel::get_by_fields`] sorts each source on its own and then
//! concatenates them, cache rows first. The result matches a global sort for
//! the default primary-key order, where buffered rows are the ones being
//! created or updated. It does NOT interleave the sources for other order
//! keys: a store row that sorts ahead of a cached row still comes after it,
//! and offsets are counted over the concatenation. Callers rely on this exact
//! sequence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use quarry_core::{
    compare_rows, compare_values, field_value, validate_filters, BlockHeight, EntityId,
    FilterExpr, ModelSchema, NodeConfig, QuarryError, QuarryResult, QueryOptions, Row, Sequence,
    SequenceGenerator, StorageError, ValidationError,
};
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};

use super::entry::{EntityCache, FlushSnapshot};
use crate::adapter::{StoreAdapter, StoreQuery};

/// `last_flushed` value before the first flush.
const NOT_FLUSHED: u64 = u64::MAX;

/// Outcome of one flush of one model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub model: String,
    pub height: BlockHeight,
    /// Rows handed to `upsert_batch`
    pub upserted: usize,
    /// Ids handed to `delete_batch`
    pub deleted: usize,
    /// Writes removed from the cache after the store accepted them
    pub evicted: usize,
    /// Snapshotted writes kept because a newer write replaced them
    pub superseded: usize,
}

impl FlushSummary {
    fn empty(model: &str, height: BlockHeight) -> Self {
        Self {
            model: model.to_string(),
            height,
            ..Self::default()
        }
    }

    pub fn written(&self) -> usize {
        self.upserted + self.deleted
    }
}

/// Point-in-time counters for one model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelStats {
    /// Live buffered entries
    pub entries: usize,
    /// Buffered deletions
    pub removed: usize,
    /// Point lookups answered from the cache
    pub cache_hits: u64,
    /// Calls made to the store adapter's read methods
    pub store_reads: u64,
    /// Height of the last successful flush
    pub last_flushed_height: Option<BlockHeight>,
}

impl ModelStats {
    /// Fraction of point lookups served without a store read.
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.store_reads;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

/// Write-behind cache for one entity type over a [`StoreAdapter`].
pub struct CachedModel<S: StoreAdapter> {
    schema: ModelSchema,
    historical: bool,
    config: Arc<NodeConfig>,
    store: Arc<S>,
    cache: RwLock<EntityCache>,
    /// Serializes flushes; holds the last flushed height.
    flush_state: Mutex<Option<BlockHeight>>,
    /// Copy of the flushed height readable without waiting on a flush.
    last_flushed: AtomicU64,
    cache_hits: AtomicU64,
    store_reads: AtomicU64,
}

impl<S: StoreAdapter> std::fmt::Debug for CachedModel<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedModel")
            .field("model", &self.schema.name)
            .field("historical", &self.historical)
            .finish_non_exhaustive()
    }
}

impl<S: StoreAdapter> CachedModel<S> {
    pub fn new(
        schema: ModelSchema,
        historical: bool,
        config: Arc<NodeConfig>,
        store: Arc<S>,
        sequence: Arc<SequenceGenerator>,
    ) -> Self {
        Self {
            schema,
            historical,
            config,
            store,
            cache: RwLock::new(EntityCache::new(sequence)),
            flush_state: Mutex::new(None),
            last_flushed: AtomicU64::new(NOT_FLUSHED),
            cache_hits: AtomicU64::new(0),
            store_reads: AtomicU64::new(0),
        }
    }

    pub fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Historical-tracking toggle. Stored for the surrounding pipeline; the
    /// cache itself does not branch on it.
    pub fn historical(&self) -> bool {
        self.historical
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn read_cache(&self) -> QuarryResult<RwLockReadGuard<'_, EntityCache>> {
        self.cache
            .read()
            .map_err(|_| QuarryError::Storage(StorageError::LockPoisoned))
    }

    fn write_cache(&self) -> QuarryResult<RwLockWriteGuard<'_, EntityCache>> {
        self.cache
            .write()
            .map_err(|_| QuarryError::Storage(StorageError::LockPoisoned))
    }

    /// Make `value` carry `id` under the primary key.
    fn bind_primary_key(&self, id: &str, value: &mut Row) -> Result<(), ValidationError> {
        let pk = &self.schema.primary_key;
        match value.get(pk) {
            None | Some(Value::Null) => {
                value.insert(pk.clone(), Value::String(id.to_string()));
                Ok(())
            }
            Some(Value::String(existing)) if existing == id => Ok(()),
            Some(other) => Err(ValidationError::InvalidValue {
                field: pk.clone(),
                reason: format!("primary key {other} does not match id {id}"),
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Buffer `value` as the latest state of `id` at `height`.
    pub fn set(
        &self,
        id: impl Into<EntityId>,
        mut value: Row,
        height: BlockHeight,
    ) -> QuarryResult<Sequence> {
        let id = id.into();
        self.bind_primary_key(&id, &mut value)?;
        let sequence = self.write_cache()?.set(id, value, height);
        Ok(sequence)
    }

    /// Buffer several rows keyed by their primary key. Nothing is written if
    /// any row lacks a string primary key.
    pub fn set_many(&self, rows: Vec<Row>, height: BlockHeight) -> QuarryResult<usize> {
        let pk = &self.schema.primary_key;
        let keyed = rows
            .into_iter()
            .map(|row| match row.get(pk) {
                Some(Value::String(id)) => Ok((id.clone(), row)),
                _ => Err(ValidationError::MissingPrimaryKey {
                    model: self.schema.name.clone(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let count = keyed.len();
        let mut cache = self.write_cache()?;
        for (id, row) in keyed {
            cache.set(id, row, height);
        }
        Ok(count)
    }

    /// Buffer a deletion of `id` at `height`.
    pub fn remove(&self, id: impl Into<EntityId>, height: BlockHeight) -> QuarryResult<Sequence> {
        let sequence = self.write_cache()?.remove(id.into(), height);
        Ok(sequence)
    }

    /// Buffered value for `id`, without consulting the store.
    pub fn get(&self, id: &str) -> QuarryResult<Option<Row>> {
        Ok(self.read_cache()?.get(id).map(|e| e.value.clone()))
    }

    /// Buffered rows matching `filters`, in insertion order, without
    /// consulting the store.
    pub fn scan(&self, filters: &[FilterExpr]) -> QuarryResult<Vec<Row>> {
        validate_filters(filters, &self.schema)?;
        let cache = self.read_cache()?;
        Ok(cache
            .scan(filters)
            .into_iter()
            .map(|e| e.value.clone())
            .collect())
    }

    // ------------------------------------------------------------------------
    // Merged reads
    // ------------------------------------------------------------------------

    /// One row where `field == value`, cache first.
    pub async fn get_one_by_field(&self, field: &str, value: &Value) -> QuarryResult<Option<Row>> {
        self.schema.require_field(field)?;

        if self.schema.is_primary_key(field) {
            if let Some(id) = value.as_str() {
                let cache = self.read_cache()?;
                if cache.is_removed(id) {
                    self.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(None);
                }
                if let Some(entry) = cache.get(id) {
                    self.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.value.clone()));
                }
            }
            tracing::debug!(model = %self.schema.name, field, "Point lookup missed cache");
            self.store_reads.fetch_add(1, Ordering::Relaxed);
            return self.store.lookup(&self.schema, field, value).await;
        }

        let held_ids = {
            let cache = self.read_cache()?;
            let newest = cache
                .scan(&[])
                .into_iter()
                .filter(|e| compare_values(field_value(&e.value, field), value).is_eq())
                .max_by_key(|e| e.sequence);
            if let Some(entry) = newest {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.value.clone()));
            }
            cache.held_ids()
        };

        tracing::debug!(
            model = %self.schema.name,
            field,
            excluded = held_ids.len(),
            "Field lookup missed cache"
        );
        let query = StoreQuery::new(vec![FilterExpr::eq(field, value.clone())])
            .excluding(held_ids)
            .with_limit(1);
        self.store_reads.fetch_add(1, Ordering::Relaxed);
        let mut rows = self.store.query(&self.schema, &query).await?;
        Ok(rows.pop())
    }

    /// Rows matching every filter: sorted cache matches, then sorted store
    /// matches for ids the cache does not hold, sliced by offset and limit.
    pub async fn get_by_fields(
        &self,
        filters: &[FilterExpr],
        options: &QueryOptions,
    ) -> QuarryResult<Vec<Row>> {
        validate_filters(filters, &self.schema)?;
        options.validate(&self.schema)?;

        let order_by = options.order_key(&self.schema);
        let pk = &self.schema.primary_key;

        let (cached, held_ids) = {
            let cache = self.read_cache()?;
            let mut rows: Vec<Row> = cache
                .scan(filters)
                .into_iter()
                .map(|e| e.value.clone())
                .collect();
            rows.sort_by(|a, b| compare_rows(a, b, order_by, options.order_direction, pk));
            (rows, cache.held_ids())
        };

        let cached_total = cached.len();
        let mut results: Vec<Row> = cached
            .into_iter()
            .skip(options.offset)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect();

        let remaining = match options.limit {
            Some(limit) => limit - results.len(),
            None => usize::MAX,
        };
        if remaining == 0 {
            tracing::debug!(
                model = %self.schema.name,
                cached = results.len(),
                "Query satisfied from cache"
            );
            return Ok(results);
        }

        let mut query = StoreQuery::new(filters.to_vec())
            .excluding(held_ids)
            .with_offset(options.offset.saturating_sub(cached_total));
        query.order_by = Some(order_by.to_string());
        query.order_direction = options.order_direction;
        if options.limit.is_some() {
            query.limit = Some(remaining);
        }

        self.store_reads.fetch_add(1, Ordering::Relaxed);
        let stored = self.store.query(&self.schema, &query).await?;
        tracing::debug!(
            model = %self.schema.name,
            cached = results.len(),
            stored = stored.len(),
            store_offset = query.offset,
            "Merged cache and store rows"
        );
        results.extend(stored);
        Ok(results)
    }

    // ------------------------------------------------------------------------
    // Flush
    // ------------------------------------------------------------------------

    /// Acquire this model's flush slot. Held for the whole of one flush.
    pub(crate) async fn lock_flush(&self) -> MutexGuard<'_, Option<BlockHeight>> {
        self.flush_state.lock().await
    }

    pub(crate) fn check_height(&self, last: Option<BlockHeight>, height: BlockHeight) {
        if let Some(last) = last {
            if height < last {
                tracing::warn!(
                    model = %self.schema.name,
                    height,
                    last_flushed = last,
                    "Flush height went backwards"
                );
            }
        }
    }

    fn record_flushed(&self, state: &mut Option<BlockHeight>, height: BlockHeight) {
        *state = Some(height);
        self.last_flushed.store(height, Ordering::Release);
    }

    pub(crate) fn snapshot(&self, height: BlockHeight) -> QuarryResult<FlushSnapshot> {
        Ok(self.read_cache()?.snapshot(height))
    }

    /// Hand a snapshot to the store inside `tx`.
    pub(crate) async fn write_snapshot(
        &self,
        tx: &mut S::Transaction,
        snapshot: &FlushSnapshot,
    ) -> QuarryResult<()> {
        if !snapshot.entries.is_empty() {
            self.store
                .upsert_batch(tx, &self.schema, snapshot.rows())
                .await?;
        }
        if !snapshot.removed.is_empty() {
            self.store
                .delete_batch(tx, &self.schema, snapshot.removed_ids())
                .await?;
        }
        Ok(())
    }

    /// Evict what `snapshot` covered and record the flushed height.
    pub(crate) fn finish_flush(
        &self,
        state: &mut Option<BlockHeight>,
        snapshot: &FlushSnapshot,
    ) -> QuarryResult<FlushSummary> {
        let evicted = self.write_cache()?.evict(snapshot);
        self.record_flushed(state, snapshot.height);

        Ok(FlushSummary {
            model: self.schema.name.clone(),
            height: snapshot.height,
            upserted: snapshot.entries.len(),
            deleted: snapshot.removed.len(),
            evicted,
            superseded: snapshot.len() - evicted,
        })
    }

    /// Write every buffered change with height `<= height` through `tx`, then
    /// evict the ones that were not overwritten meanwhile.
    ///
    /// The transaction is neither committed nor rolled back here. If the
    /// store rejects a write the error is returned and the cache is left as
    /// it was.
    pub async fn flush(
        &self,
        tx: &mut S::Transaction,
        height: BlockHeight,
    ) -> QuarryResult<FlushSummary> {
        let mut state = self.lock_flush().await;
        self.check_height(*state, height);

        let snapshot = self.snapshot(height)?;
        if snapshot.is_empty() {
            self.record_flushed(&mut state, height);
            return Ok(FlushSummary::empty(&self.schema.name, height));
        }

        if let Err(e) = self.write_snapshot(tx, &snapshot).await {
            tracing::error!(
                model = %self.schema.name,
                height,
                error = %e,
                "Flush write failed; cache left intact"
            );
            return Err(e);
        }

        let summary = self.finish_flush(&mut state, &snapshot)?;
        tracing::info!(
            model = %summary.model,
            height,
            upserted = summary.upserted,
            deleted = summary.deleted,
            evicted = summary.evicted,
            superseded = summary.superseded,
            "Flushed cached model"
        );
        Ok(summary)
    }

    /// Drop buffered changes without writing them: all of them, or only those
    /// above `height`.
    pub fn clear(&self, height: Option<BlockHeight>) -> QuarryResult<usize> {
        let dropped = self.write_cache()?.clear(height);
        tracing::debug!(
            model = %self.schema.name,
            above = ?height,
            dropped,
            "Cleared cached model"
        );
        Ok(dropped)
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Live buffered entries.
    pub fn len(&self) -> QuarryResult<usize> {
        Ok(self.read_cache()?.len())
    }

    pub fn is_empty(&self) -> QuarryResult<bool> {
        Ok(self.read_cache()?.is_empty())
    }

    /// Buffered writes (entries and deletions) a flush at `height` would
    /// cover; all of them when `height` is `None`.
    pub fn flushable_count(&self, height: Option<BlockHeight>) -> QuarryResult<usize> {
        Ok(self.read_cache()?.flushable_count(height))
    }

    /// Counters for this model. Never waits on a flush in progress.
    pub fn stats(&self) -> QuarryResult<ModelStats> {
        let last_flushed_height = match self.last_flushed.load(Ordering::Acquire) {
            NOT_FLUSHED => None,
            height => Some(height),
        };
        let cache = self.read_cache()?;
        Ok(ModelStats {
            entries: cache.len(),
            removed: cache.removed_len(),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            store_reads: self.store_reads.load(Ordering::Relaxed),
            last_flushed_height,
        })
    }
}
