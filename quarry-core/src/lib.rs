//! Quarry Core - Store Types
//!
//! Rows, schemas, the filter grammar, query options, the shared sequence
//! generator, configuration and the error hierarchy. Every other crate in the
//! workspace depends on this one.

pub mod config;
pub mod error;
pub mod filter;
pub mod identity;
pub mod query;
pub mod schema;
pub mod sequence;
pub mod telemetry;

pub use config::NodeConfig;
pub use error::{
    ConfigError, MonitorError, QuarryError, QuarryResult, StorageError, ValidationError,
};
pub use filter::{matches_all, validate_filters, FilterExpr, FilterOperator};
pub use identity::{row_from_pairs, row_id, BlockHeight, EntityId, Row, Sequence};
pub use query::{compare_rows, compare_values, field_value, OrderDirection, QueryOptions};
pub use schema::{FieldDef, FieldKind, ModelSchema};
pub use sequence::SequenceGenerator;
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
