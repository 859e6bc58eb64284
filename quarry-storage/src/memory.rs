//! In-memory backing store.
//!
//! [`MemoryStore`] implements [`StoreAdapter`] over per-model tables held in
//! process memory, with staged transactions: writes made through a
//! [`MemoryTransaction`] become visible only when [`MemoryStore::commit`] is
//! called, and a dropped transaction is a rollback. It is the reference
//! adapter used by the test suites and by embedders without a database.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use quarry_core::{
    compare_rows, compare_values, field_value, matches_all, row_id, EntityId, ModelSchema,
    QuarryError, QuarryResult, Row, StorageError, ValidationError,
};
use serde_json::Value;

use crate::adapter::{StoreAdapter, StoreQuery};

type Table = BTreeMap<EntityId, Row>;

#[derive(Debug)]
struct InjectedFailure {
    /// Only writes to this table fail; `None` matches any table
    table: Option<String>,
    error: StorageError,
}

#[derive(Debug, Clone)]
enum StagedWrite {
    Upsert { table: String, rows: Vec<(EntityId, Row)> },
    Delete { table: String, ids: Vec<EntityId> },
}

/// Transaction handle for [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryTransaction {
    id: u64,
    staged: Vec<StagedWrite>,
}

impl MemoryTransaction {
    /// Transaction number, unique per store.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of staged write batches.
    pub fn staged_batches(&self) -> usize {
        self.staged.len()
    }
}

/// In-memory store with transactional writes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
    next_tx: AtomicU64,
    reads: AtomicU64,
    injected_failure: Mutex<Option<InjectedFailure>>,
    injected_read_failure: Mutex<Option<StorageError>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transaction.
    pub fn begin(&self) -> MemoryTransaction {
        MemoryTransaction {
            id: self.next_tx.fetch_add(1, Ordering::SeqCst),
            staged: Vec::new(),
        }
    }

    /// Apply every staged write of `tx` atomically.
    pub fn commit(&self, tx: MemoryTransaction) -> QuarryResult<()> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| QuarryError::Storage(StorageError::LockPoisoned))?;

        for write in tx.staged {
            match write {
                StagedWrite::Upsert { table, rows } => {
                    let table = tables.entry(table).or_default();
                    for (id, row) in rows {
                        table.insert(id, row);
                    }
                }
                StagedWrite::Delete { table, ids } => {
                    if let Some(table) = tables.get_mut(&table) {
                        for id in ids {
                            table.remove(&id);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Discard `tx`. Equivalent to dropping it.
    pub fn rollback(&self, tx: MemoryTransaction) {
        drop(tx);
    }

    /// Insert rows directly, outside any transaction.
    pub fn seed(&self, schema: &ModelSchema, rows: Vec<Row>) -> QuarryResult<()> {
        let keyed = key_rows(schema, rows)?;
        let mut tables = self
            .tables
            .write()
            .map_err(|_| QuarryError::Storage(StorageError::LockPoisoned))?;
        let table = tables.entry(schema.name.clone()).or_default();
        for (id, row) in keyed {
            table.insert(id, row);
        }
        Ok(())
    }

    /// Committed row for `id`, if any.
    pub fn get(&self, schema: &ModelSchema, id: &str) -> QuarryResult<Option<Row>> {
        let tables = self
            .tables
            .read()
            .map_err(|_| QuarryError::Storage(StorageError::LockPoisoned))?;
        Ok(tables.get(&schema.name).and_then(|t| t.get(id)).cloned())
    }

    /// Number of committed rows for `schema`.
    pub fn row_count(&self, schema: &ModelSchema) -> QuarryResult<usize> {
        let tables = self
            .tables
            .read()
            .map_err(|_| QuarryError::Storage(StorageError::LockPoisoned))?;
        Ok(tables.get(&schema.name).map_or(0, BTreeMap::len))
    }

    /// Number of `lookup` and `query` calls served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Make the next write call fail with `error`.
    pub fn fail_next_write(&self, error: StorageError) -> QuarryResult<()> {
        self.inject(None, error)
    }

    /// Make the next write call against `table` fail with `error`.
    pub fn fail_next_write_to(&self, table: &str, error: StorageError) -> QuarryResult<()> {
        self.inject(Some(table.to_string()), error)
    }

    /// Make the next `lookup` or `query` call fail with `error`.
    pub fn fail_next_read(&self, error: StorageError) -> QuarryResult<()> {
        let mut slot = self
            .injected_read_failure
            .lock()
            .map_err(|_| QuarryError::Storage(StorageError::LockPoisoned))?;
        *slot = Some(error);
        Ok(())
    }

    fn take_read_failure(&self) -> QuarryResult<()> {
        let mut slot = self
            .injected_read_failure
            .lock()
            .map_err(|_| QuarryError::Storage(StorageError::LockPoisoned))?;
        match slot.take() {
            Some(error) => Err(QuarryError::Storage(error)),
            None => Ok(()),
        }
    }

    fn inject(&self, table: Option<String>, error: StorageError) -> QuarryResult<()> {
        let mut slot = self
            .injected_failure
            .lock()
            .map_err(|_| QuarryError::Storage(StorageError::LockPoisoned))?;
        *slot = Some(InjectedFailure { table, error });
        Ok(())
    }

    fn take_injected_failure(&self, table: &str) -> QuarryResult<()> {
        let mut slot = self
            .injected_failure
            .lock()
            .map_err(|_| QuarryError::Storage(StorageError::LockPoisoned))?;
        let fires = slot
            .as_ref()
            .is_some_and(|f| f.table.as_deref().map_or(true, |t| t == table));
        if !fires {
            return Ok(());
        }
        match slot.take() {
            Some(failure) => Err(QuarryError::Storage(failure.error)),
            None => Ok(()),
        }
    }
}

fn key_rows(schema: &ModelSchema, rows: Vec<Row>) -> QuarryResult<Vec<(EntityId, Row)>> {
    rows.into_iter()
        .map(|row| -> QuarryResult<(EntityId, Row)> {
            let id = row_id(&row, &schema.primary_key)
                .ok_or_else(|| ValidationError::MissingPrimaryKey {
                    model: schema.name.clone(),
                })?
                .to_string();
            Ok((id, row))
        })
        .collect()
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    type Transaction = MemoryTransaction;

    async fn lookup(
        &self,
        schema: &ModelSchema,
        field: &str,
        value: &Value,
    ) -> QuarryResult<Option<Row>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.take_read_failure()?;
        let tables = self
            .tables
            .read()
            .map_err(|_| QuarryError::Storage(StorageError::LockPoisoned))?;
        let Some(table) = tables.get(&schema.name) else {
            return Ok(None);
        };

        if schema.is_primary_key(field) {
            return Ok(value.as_str().and_then(|id| table.get(id)).cloned());
        }
        Ok(table
            .values()
            .find(|row| compare_values(field_value(row, field), value).is_eq())
            .cloned())
    }

    async fn query(&self, schema: &ModelSchema, query: &StoreQuery) -> QuarryResult<Vec<Row>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.take_read_failure()?;
        let tables = self
            .tables
            .read()
            .map_err(|_| QuarryError::Storage(StorageError::LockPoisoned))?;
        let Some(table) = tables.get(&schema.name) else {
            return Ok(Vec::new());
        };

        let mut rows: Vec<&Row> = table
            .iter()
            .filter(|(id, _)| !query.exclude_ids.contains(*id))
            .map(|(_, row)| row)
            .filter(|row| matches_all(&query.filters, row))
            .collect();

        let order_by = query.order_key(schema);
        rows.sort_by(|a, b| {
            compare_rows(a, b, order_by, query.order_direction, &schema.primary_key)
        });

        Ok(rows
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn upsert_batch(
        &self,
        tx: &mut MemoryTransaction,
        schema: &ModelSchema,
        rows: Vec<Row>,
    ) -> QuarryResult<()> {
        self.take_injected_failure(&schema.name)?;
        let rows = key_rows(schema, rows)?;
        tx.staged.push(StagedWrite::Upsert {
            table: schema.name.clone(),
            rows,
        });
        Ok(())
    }

    async fn delete_batch(
        &self,
        tx: &mut MemoryTransaction,
        schema: &ModelSchema,
        ids: Vec<EntityId>,
    ) -> QuarryResult<()> {
        self.take_injected_failure(&schema.name)?;
        tx.staged.push(StagedWrite::Delete {
            table: schema.name.clone(),
            ids,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{row_from_pairs, FieldKind, FilterExpr, OrderDirection};
    use serde_json::json;

    fn schema() -> ModelSchema {
        ModelSchema::new("entity").with_field("field1", FieldKind::Integer)
    }

    fn row(id: &str, field1: i64) -> Row {
        row_from_pairs([("id", json!(id)), ("field1", json!(field1))])
    }

    #[tokio::test]
    async fn test_writes_invisible_until_commit() {
        let store = MemoryStore::new();
        let schema = schema();

        let mut tx = store.begin();
        store
            .upsert_batch(&mut tx, &schema, vec![row("a", 1)])
            .await
            .unwrap();
        assert_eq!(tx.staged_batches(), 1);
        assert_eq!(store.row_count(&schema).unwrap(), 0);

        store.commit(tx).unwrap();
        assert_eq!(store.row_count(&schema).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = MemoryStore::new();
        let schema = schema();

        let mut tx = store.begin();
        store
            .upsert_batch(&mut tx, &schema, vec![row("a", 1)])
            .await
            .unwrap();
        store.rollback(tx);
        assert_eq!(store.row_count(&schema).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_batch() {
        let store = MemoryStore::new();
        let schema = schema();
        store.seed(&schema, vec![row("a", 1), row("b", 2)]).unwrap();

        let mut tx = store.begin();
        store
            .delete_batch(&mut tx, &schema, vec!["a".to_string(), "zz".to_string()])
            .await
            .unwrap();
        store.commit(tx).unwrap();

        assert!(store.get(&schema, "a").unwrap().is_none());
        assert!(store.get(&schema, "b").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_query_filters_excludes_orders_and_pages() {
        let store = MemoryStore::new();
        let schema = schema();
        store
            .seed(
                &schema,
                vec![row("a", 1), row("b", 3), row("c", 2), row("d", 3), row("e", 1)],
            )
            .unwrap();

        let query = StoreQuery::new(vec![FilterExpr::new(
            "field1",
            quarry_core::FilterOperator::Gt,
            json!(1),
        )])
        .excluding(["c".to_string()].into_iter().collect())
        .ordered_by("field1", OrderDirection::Desc);
        let rows = store.query(&schema, &query).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!("b"), json!("d")]);

        let page = store
            .query(&schema, &StoreQuery::default().with_offset(1).with_limit(2))
            .await
            .unwrap();
        let ids: Vec<_> = page.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!("b"), json!("c")]);
        assert_eq!(store.read_count(), 2);
    }

    #[tokio::test]
    async fn test_lookup_by_primary_key_and_field() {
        let store = MemoryStore::new();
        let schema = schema();
        store.seed(&schema, vec![row("a", 1), row("b", 2)]).unwrap();

        let by_id = store.lookup(&schema, "id", &json!("b")).await.unwrap();
        assert_eq!(by_id, Some(row("b", 2)));

        let by_field = store.lookup(&schema, "field1", &json!(1)).await.unwrap();
        assert_eq!(by_field, Some(row("a", 1)));

        let missing = store.lookup(&schema, "field1", &json!(9)).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let store = MemoryStore::new();
        let schema = schema();
        store
            .fail_next_write(StorageError::TransactionFailed {
                reason: "connection reset".to_string(),
            })
            .unwrap();

        let mut tx = store.begin();
        let err = store
            .upsert_batch(&mut tx, &schema, vec![row("a", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, QuarryError::Storage(StorageError::TransactionFailed { .. })));
        assert_eq!(tx.staged_batches(), 0);

        store
            .upsert_batch(&mut tx, &schema, vec![row("a", 1)])
            .await
            .unwrap();
        assert_eq!(tx.staged_batches(), 1);
    }

    #[tokio::test]
    async fn test_injected_read_failure_fires_once() {
        let store = MemoryStore::new();
        let schema = schema();
        store.seed(&schema, vec![row("a", 1)]).unwrap();
        store
            .fail_next_read(StorageError::QueryFailed {
                model: "entity".to_string(),
                reason: "statement timeout".to_string(),
            })
            .unwrap();

        let err = store.query(&schema, &StoreQuery::default()).await.unwrap_err();
        assert!(matches!(err, QuarryError::Storage(StorageError::QueryFailed { .. })));

        let rows = store.query(&schema, &StoreQuery::default()).await.unwrap();
        assert_eq!(rows, vec![row("a", 1)]);
        assert_eq!(store.read_count(), 2);
    }

    #[test]
    fn test_seed_requires_primary_key() {
        let store = MemoryStore::new();
        let err = store
            .seed(&schema(), vec![row_from_pairs([("field1", json!(1))])])
            .unwrap_err();
        assert!(matches!(
            err,
            QuarryError::Validation(ValidationError::MissingPrimaryKey { .. })
        ));
    }
}
