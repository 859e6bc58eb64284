//! Registry of cached models sharing one store, one sequence and one config.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use quarry_core::{
    BlockHeight, ModelSchema, NodeConfig, QuarryError, QuarryResult, SequenceGenerator,
    StorageError,
};

use super::model::{CachedModel, FlushSummary};
use crate::adapter::StoreAdapter;

/// All cached models of one indexer process.
///
/// Models are keyed by name; [`StoreCache::flush`] writes every model inside
/// one caller transaction so a block's effects land together.
pub struct StoreCache<S: StoreAdapter> {
    config: Arc<NodeConfig>,
    store: Arc<S>,
    sequence: Arc<SequenceGenerator>,
    models: RwLock<BTreeMap<String, Arc<CachedModel<S>>>>,
}

impl<S: StoreAdapter> StoreCache<S> {
    /// Create an empty registry. Fails if `config` does not validate.
    pub fn new(config: NodeConfig, store: Arc<S>) -> QuarryResult<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            store,
            sequence: Arc::new(SequenceGenerator::new()),
            models: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn sequence(&self) -> &Arc<SequenceGenerator> {
        &self.sequence
    }

    /// Time-based flush cadence for the driver.
    pub fn flush_interval(&self) -> Duration {
        self.config.flush_interval()
    }

    fn all_models(&self) -> QuarryResult<Vec<Arc<CachedModel<S>>>> {
        let models = self
            .models
            .read()
            .map_err(|_| QuarryError::Storage(StorageError::LockPoisoned))?;
        Ok(models.values().cloned().collect())
    }

    /// Register a model, or return the existing one with the same name.
    pub fn register(
        &self,
        schema: ModelSchema,
        historical: bool,
    ) -> QuarryResult<Arc<CachedModel<S>>> {
        let mut models = self
            .models
            .write()
            .map_err(|_| QuarryError::Storage(StorageError::LockPoisoned))?;
        if let Some(existing) = models.get(&schema.name) {
            return Ok(Arc::clone(existing));
        }

        tracing::debug!(model = %schema.name, historical, "Registered cached model");
        let name = schema.name.clone();
        let model = Arc::new(CachedModel::new(
            schema,
            historical,
            Arc::clone(&self.config),
            Arc::clone(&self.store),
            Arc::clone(&self.sequence),
        ));
        models.insert(name, Arc::clone(&model));
        Ok(model)
    }

    pub fn model(&self, name: &str) -> QuarryResult<Option<Arc<CachedModel<S>>>> {
        let models = self
            .models
            .read()
            .map_err(|_| QuarryError::Storage(StorageError::LockPoisoned))?;
        Ok(models.get(name).cloned())
    }

    pub fn model_names(&self) -> QuarryResult<Vec<String>> {
        let models = self
            .models
            .read()
            .map_err(|_| QuarryError::Storage(StorageError::LockPoisoned))?;
        Ok(models.keys().cloned().collect())
    }

    /// Buffered writes across every model.
    pub fn flushable_record_count(&self) -> QuarryResult<usize> {
        let mut total = 0;
        for model in self.all_models()? {
            total += model.flushable_count(None)?;
        }
        Ok(total)
    }

    /// Whether enough writes are buffered that a flush is due.
    pub fn is_flushable(&self) -> QuarryResult<bool> {
        Ok(self.flushable_record_count()? >= self.config.store_cache_threshold)
    }

    /// Whether the driver must stop and flush before processing more blocks.
    pub fn is_full(&self) -> QuarryResult<bool> {
        Ok(self.flushable_record_count()? >= self.config.store_cache_upper_limit)
    }

    /// Flush every model up to `height` through `tx`.
    ///
    /// All writes are issued before anything is evicted, so a failure in any
    /// model leaves every model's cache as it was.
    pub async fn flush(
        &self,
        tx: &mut S::Transaction,
        height: BlockHeight,
    ) -> QuarryResult<Vec<FlushSummary>> {
        let models = self.all_models()?;

        // Name order, so concurrent registry flushes cannot deadlock.
        let mut guards = Vec::with_capacity(models.len());
        for model in &models {
            guards.push(model.lock_flush().await);
        }

        let mut snapshots = Vec::with_capacity(models.len());
        for (model, guard) in models.iter().zip(guards.iter()) {
            model.check_height(**guard, height);
            snapshots.push(model.snapshot(height)?);
        }

        for (model, snapshot) in models.iter().zip(snapshots.iter()) {
            if snapshot.is_empty() {
                continue;
            }
            if let Err(e) = model.write_snapshot(tx, snapshot).await {
                tracing::error!(
                    model = %model.name(),
                    height,
                    error = %e,
                    "Store cache flush failed; caches left intact"
                );
                return Err(e);
            }
        }

        let mut summaries = Vec::with_capacity(models.len());
        for ((model, guard), snapshot) in models.iter().zip(guards.iter_mut()).zip(&snapshots) {
            summaries.push(model.finish_flush(guard, snapshot)?);
        }

        let written: usize = summaries.iter().map(FlushSummary::written).sum();
        tracing::info!(
            height,
            models = summaries.len(),
            written,
            "Flushed store cache"
        );
        Ok(summaries)
    }

    /// Drop buffered changes of every model; see [`CachedModel::clear`].
    pub fn clear(&self, height: Option<BlockHeight>) -> QuarryResult<usize> {
        let mut dropped = 0;
        for model in self.all_models()? {
            dropped += model.clear(height)?;
        }
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use quarry_core::{row_from_pairs, FieldKind, Row};
    use serde_json::json;

    fn registry(threshold: usize, upper: usize) -> StoreCache<MemoryStore> {
        StoreCache::new(
            NodeConfig::new()
                .with_store_cache_threshold(threshold)
                .with_store_cache_upper_limit(upper),
            Arc::new(MemoryStore::new()),
        )
        .unwrap()
    }

    fn row(id: &str) -> Row {
        row_from_pairs([("id", json!(id)), ("field1", json!(1))])
    }

    fn schema(name: &str) -> ModelSchema {
        ModelSchema::new(name).with_field("field1", FieldKind::Integer)
    }

    #[test]
    fn test_rejects_invalid_config() {
        let result = StoreCache::new(
            NodeConfig::new().with_store_cache_threshold(0),
            Arc::new(MemoryStore::new()),
        );
        assert!(matches!(result, Err(QuarryError::Config(_))));
    }

    #[test]
    fn test_register_is_idempotent_and_shares_sequence() {
        let cache = registry(10, 20);
        let a = cache.register(schema("a"), false).unwrap();
        let again = cache.register(schema("a"), true).unwrap();
        let b = cache.register(schema("b"), true).unwrap();

        assert!(Arc::ptr_eq(&a, &again));
        assert!(!again.historical());
        assert!(b.historical());
        assert_eq!(cache.model_names().unwrap(), vec!["a", "b"]);

        let first = a.set("x", row("x"), 1).unwrap();
        let second = b.set("x", row("x"), 1).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_thresholds() {
        let cache = registry(2, 3);
        let a = cache.register(schema("a"), false).unwrap();
        let b = cache.register(schema("b"), false).unwrap();

        a.set("1", row("1"), 1).unwrap();
        assert!(!cache.is_flushable().unwrap());
        b.remove("2", 1).unwrap();
        assert!(cache.is_flushable().unwrap());
        assert!(!cache.is_full().unwrap());
        a.set("3", row("3"), 2).unwrap();
        assert!(cache.is_full().unwrap());
        assert_eq!(cache.flushable_record_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_flush_all_models_in_one_transaction() {
        let cache = registry(10, 20);
        let a = cache.register(schema("a"), false).unwrap();
        let b = cache.register(schema("b"), false).unwrap();
        a.set("1", row("1"), 1).unwrap();
        b.set("2", row("2"), 1).unwrap();
        b.set("3", row("3"), 4).unwrap();

        let mut tx = cache.store().begin();
        let summaries = cache.flush(&mut tx, 2).await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(tx.staged_batches(), 2);
        cache.store().commit(tx).unwrap();

        assert!(cache.store().get(a.schema(), "1").unwrap().is_some());
        assert!(cache.store().get(b.schema(), "2").unwrap().is_some());
        assert_eq!(b.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_flush_failure_keeps_every_model() {
        let cache = registry(10, 20);
        let a = cache.register(schema("a"), false).unwrap();
        let b = cache.register(schema("b"), false).unwrap();
        a.set("1", row("1"), 1).unwrap();
        b.set("2", row("2"), 1).unwrap();

        // "a" is written first and succeeds; "b" fails.
        cache
            .store()
            .fail_next_write_to(
                "b",
                StorageError::WriteFailed {
                    model: "b".to_string(),
                    reason: "constraint".to_string(),
                },
            )
            .unwrap();
        let mut tx = cache.store().begin();

        let err = cache.flush(&mut tx, 1).await.unwrap_err();
        assert!(matches!(err, QuarryError::Storage(StorageError::WriteFailed { .. })));
        assert_eq!(tx.staged_batches(), 1);
        assert_eq!(a.len().unwrap(), 1);
        assert_eq!(b.len().unwrap(), 1);
    }

    #[test]
    fn test_clear_all_models() {
        let cache = registry(10, 20);
        let a = cache.register(schema("a"), false).unwrap();
        let b = cache.register(schema("b"), false).unwrap();
        a.set("1", row("1"), 1).unwrap();
        b.set("2", row("2"), 5).unwrap();

        assert_eq!(cache.clear(Some(3)).unwrap(), 1);
        assert_eq!(cache.clear(None).unwrap(), 1);
        assert_eq!(cache.flushable_record_count().unwrap(), 0);
    }
}
