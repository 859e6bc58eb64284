#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use quarry_core::{EntityId, ModelSchema, QuarryResult, Row, SequenceGenerator};
use quarry_storage::{CachedModel, MemoryStore, MemoryTransaction, StoreAdapter, StoreQuery};
use quarry_test_utils::fixtures::{entity_id, entity_row, entity_rows, test_config, test_schema};
use serde_json::Value;
use tokio::sync::Notify;

pub fn cached_model<S: StoreAdapter>(store: Arc<S>) -> CachedModel<S> {
    CachedModel::new(
        test_schema(),
        false,
        Arc::new(test_config()),
        store,
        Arc::new(SequenceGenerator::new()),
    )
}

pub fn memory_model() -> CachedModel<MemoryStore> {
    cached_model(Arc::new(MemoryStore::new()))
}

/// Store holds `000..099` with `field1 = 1`. The cache rewrites `020..029`
/// to `field1 = id % 2` and adds `100..129` with `field1 = 2`.
pub async fn seeded_model() -> CachedModel<MemoryStore> {
    let model = memory_model();
    let store = Arc::clone(model.store());

    let mut tx = store.begin();
    store
        .upsert_batch(&mut tx, model.schema(), entity_rows(0..100, 1))
        .await
        .expect("seed upsert");
    store.commit(tx).expect("seed commit");

    for n in 20..30 {
        model
            .set(entity_id(n), entity_row(n, (n % 2) as i64), 1)
            .expect("cache update");
    }
    for n in 100..130 {
        model
            .set(entity_id(n), entity_row(n, 2), 1)
            .expect("cache insert");
    }
    model
}

/// Memory store whose `upsert_batch` parks until released, so a test can act
/// between a flush's snapshot and its eviction.
#[derive(Debug, Default)]
pub struct GatedStore {
    pub inner: MemoryStore,
    pub entered: Notify,
    pub release: Notify,
}

#[async_trait]
impl StoreAdapter for GatedStore {
    type Transaction = MemoryTransaction;

    async fn lookup(
        &self,
        schema: &ModelSchema,
        field: &str,
        value: &Value,
    ) -> QuarryResult<Option<Row>> {
        self.inner.lookup(schema, field, value).await
    }

    async fn query(&self, schema: &ModelSchema, query: &StoreQuery) -> QuarryResult<Vec<Row>> {
        self.inner.query(schema, query).await
    }

    async fn upsert_batch(
        &self,
        tx: &mut MemoryTransaction,
        schema: &ModelSchema,
        rows: Vec<Row>,
    ) -> QuarryResult<()> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.upsert_batch(tx, schema, rows).await
    }

    async fn delete_batch(
        &self,
        tx: &mut MemoryTransaction,
        schema: &ModelSchema,
        ids: Vec<EntityId>,
    ) -> QuarryResult<()> {
        self.inner.delete_batch(tx, schema, ids).await
    }
}
