//! Quarry Test Utilities
//!
//! Shared test infrastructure for the Quarry workspace:
//! - Fixtures for the entity model used across the store cache suites
//! - Proptest generators for rows, filters and query options
//! - Assertions over `QuarryResult`s and row sequences

pub use quarry_core::{
    BlockHeight, EntityId, FieldKind, FilterExpr, FilterOperator, ModelSchema, NodeConfig,
    OrderDirection, QuarryError, QuarryResult, QueryOptions, Row, StorageError, ValidationError,
};

use serde_json::{json, Value};

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for the store cache scenarios.

    use super::*;

    /// Name of the fixture model.
    pub const TEST_MODEL: &str = "testModel";

    /// Schema with a string `id` primary key and an integer `field1`.
    pub fn test_schema() -> ModelSchema {
        ModelSchema::new(TEST_MODEL).with_field("field1", FieldKind::Integer)
    }

    /// Zero-padded entity id, e.g. `entity1_id_0x007` for `7`.
    ///
    /// Padding keeps lexicographic and numeric order aligned.
    pub fn entity_id(n: usize) -> EntityId {
        format!("entity1_id_0x{n:03}")
    }

    /// `{ id: entity_id(n), field1 }`.
    pub fn entity_row(n: usize, field1: i64) -> Row {
        let mut row = Row::new();
        row.insert("id".to_string(), Value::String(entity_id(n)));
        row.insert("field1".to_string(), json!(field1));
        row
    }

    /// One row per id in `ids`, each with the same `field1`.
    pub fn entity_rows(ids: impl IntoIterator<Item = usize>, field1: i64) -> Vec<Row> {
        ids.into_iter().map(|n| entity_row(n, field1)).collect()
    }

    /// Config with thresholds small enough to trip in tests.
    pub fn test_config() -> NodeConfig {
        NodeConfig::new()
            .with_store_cache_threshold(10)
            .with_store_cache_upper_limit(100)
            .with_monitor_file_size(4096)
    }

    /// Primary keys of `rows`, in order.
    pub fn ids(rows: &[Row]) -> Vec<EntityId> {
        rows.iter()
            .map(|row| {
                row.get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            })
            .collect()
    }

    /// `field1` of `rows`, in order; missing values read as `-1`.
    pub fn field1_values(rows: &[Row]) -> Vec<i64> {
        rows.iter()
            .map(|row| row.get("field1").and_then(Value::as_i64).unwrap_or(-1))
            .collect()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for rows, filters and query options.

    use super::fixtures::entity_row;
    use super::*;
    use proptest::prelude::*;

    /// Small integer values so filters actually hit.
    pub fn arb_field1() -> impl Strategy<Value = i64> {
        0i64..4
    }

    /// A row with an id below `max_id`.
    pub fn arb_row(max_id: usize) -> impl Strategy<Value = Row> {
        (0..max_id, arb_field1()).prop_map(|(n, field1)| entity_row(n, field1))
    }

    pub fn arb_rows(max_id: usize, max_len: usize) -> impl Strategy<Value = Vec<Row>> {
        prop::collection::vec(arb_row(max_id), 0..max_len)
    }

    pub fn arb_direction() -> impl Strategy<Value = OrderDirection> {
        prop_oneof![Just(OrderDirection::Asc), Just(OrderDirection::Desc)]
    }

    pub fn arb_operator() -> impl Strategy<Value = FilterOperator> {
        prop_oneof![
            Just(FilterOperator::Eq),
            Just(FilterOperator::Ne),
            Just(FilterOperator::In),
            Just(FilterOperator::NotIn),
            Just(FilterOperator::Gt),
            Just(FilterOperator::Gte),
            Just(FilterOperator::Lt),
            Just(FilterOperator::Lte),
        ]
    }

    /// A well-formed filter on `field1`.
    pub fn arb_filter() -> impl Strategy<Value = FilterExpr> {
        (
            arb_operator(),
            arb_field1(),
            prop::collection::vec(arb_field1(), 0..3),
        )
            .prop_map(|(operator, scalar, list)| {
                let value = match operator {
                    FilterOperator::In | FilterOperator::NotIn => json!(list),
                    _ => json!(scalar),
                };
                FilterExpr::new("field1", operator, value)
            })
    }

    pub fn arb_filters() -> impl Strategy<Value = Vec<FilterExpr>> {
        prop::collection::vec(arb_filter(), 0..3)
    }

    /// Query options over the fixture schema.
    pub fn arb_query_options() -> impl Strategy<Value = QueryOptions> {
        (
            0usize..40,
            prop::option::of(1usize..40),
            prop::option::of(prop_oneof![Just("id"), Just("field1")]),
            arb_direction(),
        )
            .prop_map(|(offset, limit, order_by, order_direction)| QueryOptions {
                offset,
                limit,
                order_by: order_by.map(str::to_string),
                order_direction,
            })
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Quarry results.

    use super::fixtures::ids;
    use super::*;

    /// Assert that a QuarryResult is a Validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        match result {
            Err(QuarryError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that a QuarryResult is a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        match result {
            Err(QuarryError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert the rows carry exactly `expected` ids, in order.
    #[track_caller]
    pub fn assert_ids(rows: &[Row], expected: &[EntityId]) {
        assert_eq!(ids(rows), expected, "row ids differ");
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;

    #[test]
    fn test_entity_id_padding_sorts() {
        assert_eq!(entity_id(7), "entity1_id_0x007");
        assert!(entity_id(99) < entity_id(100));
    }

    #[test]
    fn test_row_helpers() {
        let rows = entity_rows(1..3, 5);
        assert_eq!(ids(&rows), vec![entity_id(1), entity_id(2)]);
        assert_eq!(field1_values(&rows), vec![5, 5]);
        assert!(test_config().validate().is_ok());
    }
}
