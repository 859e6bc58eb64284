//! Backing store adapter contract.
//!
//! The cache layer consumes a relational store through [`StoreAdapter`]: a
//! point lookup, a filtered/ordered/paginated query that can exclude ids, and
//! transactional batch writes. The adapter is the source of truth for every
//! id the cache does not hold.

use std::collections::BTreeSet;

use async_trait::async_trait;
use quarry_core::{
    EntityId, FilterExpr, ModelSchema, OrderDirection, QuarryResult, Row,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Store-side half of a merged query.
///
/// Built by the cache for the rows it does not hold: the same filters as the
/// cache scan, every cached id excluded, and pagination already adjusted for
/// the rows the cache contributes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StoreQuery {
    /// Conjunction of predicates
    pub filters: Vec<FilterExpr>,
    /// Ids the store must not return
    pub exclude_ids: BTreeSet<EntityId>,
    /// Order key; `None` means the primary key
    pub order_by: Option<String>,
    pub order_direction: OrderDirection,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl StoreQuery {
    pub fn new(filters: Vec<FilterExpr>) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }

    pub fn excluding(mut self, ids: BTreeSet<EntityId>) -> Self {
        self.exclude_ids = ids;
        self
    }

    pub fn ordered_by(mut self, field: impl Into<String>, direction: OrderDirection) -> Self {
        self.order_by = Some(field.into());
        self.order_direction = direction;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The effective order key for `schema`.
    pub fn order_key<'a>(&'a self, schema: &'a ModelSchema) -> &'a str {
        self.order_by.as_deref().unwrap_or(&schema.primary_key)
    }
}

/// Backing store consumed by the cache layer.
///
/// Implementations should propagate driver failures as
/// [`quarry_core::StorageError`]s; the cache never retries or suppresses them.
/// The transaction type is created, committed and rolled back by the caller;
/// the cache only writes through it.
#[async_trait]
pub trait StoreAdapter: Send + Sync + 'static {
    /// Caller-owned transaction handle.
    type Transaction: Send;

    /// Fetch at most one row whose `field` equals `value`.
    async fn lookup(
        &self,
        schema: &ModelSchema,
        field: &str,
        value: &Value,
    ) -> QuarryResult<Option<Row>>;

    /// Fetch rows matching `query`, ordered by its key (ties by primary key
    /// ascending), skipping excluded ids, then sliced by offset/limit.
    async fn query(&self, schema: &ModelSchema, query: &StoreQuery) -> QuarryResult<Vec<Row>>;

    /// Insert or replace `rows` inside `tx`.
    async fn upsert_batch(
        &self,
        tx: &mut Self::Transaction,
        schema: &ModelSchema,
        rows: Vec<Row>,
    ) -> QuarryResult<()>;

    /// Delete the rows with `ids` inside `tx`. Missing ids are not an error.
    async fn delete_batch(
        &self,
        tx: &mut Self::Transaction,
        schema: &ModelSchema,
        ids: Vec<EntityId>,
    ) -> QuarryResult<()>;
}
