//! Query options and value ordering
//!
//! Both sides of a merged query (cache and store) sort with the same
//! comparator defined here so their orderings agree.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::identity::Row;
use crate::schema::ModelSchema;

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    /// Apply this direction to an ascending ordering.
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            OrderDirection::Asc => ordering,
            OrderDirection::Desc => ordering.reverse(),
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for OrderDirection {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ASC" => Ok(OrderDirection::Asc),
            "DESC" => Ok(OrderDirection::Desc),
            _ => Err(ValidationError::UnknownDirection {
                direction: s.to_string(),
            }),
        }
    }
}

/// Pagination and ordering for `get_by_fields`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Rows to skip from the start of the merged sequence
    pub offset: usize,
    /// Maximum rows to return; `None` is unbounded
    pub limit: Option<usize>,
    /// Order key; `None` means the primary key
    pub order_by: Option<String>,
    pub order_direction: OrderDirection,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    pub fn with_direction(mut self, direction: OrderDirection) -> Self {
        self.order_direction = direction;
        self
    }

    /// The effective order key for `schema`.
    pub fn order_key<'a>(&'a self, schema: &'a ModelSchema) -> &'a str {
        self.order_by.as_deref().unwrap_or(&schema.primary_key)
    }

    /// Check the order key exists and the limit is positive.
    pub fn validate(&self, schema: &ModelSchema) -> Result<(), ValidationError> {
        if let Some(field) = &self.order_by {
            schema.require_field(field)?;
        }
        if self.limit == Some(0) {
            return Err(ValidationError::InvalidValue {
                field: "limit".to_string(),
                reason: "limit must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Rank of a JSON value's type in the cross-type total order.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON scalars.
///
/// Values of different types order by type (`null < bool < number < string <
/// array < object`); numbers compare numerically, strings bytewise.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                x.cmp(&y)
            } else if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                x.cmp(&y)
            } else {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            }
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(x, y)| compare_values(x, y))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Field value of a row, treating a missing field as `null`.
pub fn field_value<'a>(row: &'a Row, field: &str) -> &'a Value {
    row.get(field).unwrap_or(&Value::Null)
}

/// Compare two rows by `order_by` in `direction`, ties broken by primary key
/// ascending.
pub fn compare_rows(
    a: &Row,
    b: &Row,
    order_by: &str,
    direction: OrderDirection,
    primary_key: &str,
) -> Ordering {
    let primary = direction.apply(compare_values(
        field_value(a, order_by),
        field_value(b, order_by),
    ));
    if primary.is_ne() || order_by == primary_key {
        return primary;
    }
    compare_values(field_value(a, primary_key), field_value(b, primary_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::row_from_pairs;
    use crate::schema::FieldKind;
    use serde_json::json;

    #[test]
    fn test_direction_parse() {
        assert_eq!("desc".parse::<OrderDirection>().unwrap(), OrderDirection::Desc);
        assert_eq!("ASC".parse::<OrderDirection>().unwrap(), OrderDirection::Asc);
        assert!("sideways".parse::<OrderDirection>().is_err());
    }

    #[test]
    fn test_compare_values_numbers_and_types() {
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!(2.5), &json!(2)), Ordering::Greater);
        assert_eq!(compare_values(&json!(1), &json!(1.0)), Ordering::Equal);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&Value::Null, &json!(false)), Ordering::Less);
        assert_eq!(compare_values(&json!(99), &json!("1")), Ordering::Less);
    }

    #[test]
    fn test_compare_rows_tie_breaks_on_primary_key() {
        let a = row_from_pairs([("id", json!("a")), ("n", json!(1))]);
        let b = row_from_pairs([("id", json!("b")), ("n", json!(1))]);
        assert_eq!(
            compare_rows(&a, &b, "n", OrderDirection::Desc, "id"),
            Ordering::Less
        );
        assert_eq!(
            compare_rows(&a, &b, "id", OrderDirection::Desc, "id"),
            Ordering::Greater
        );
    }

    #[test]
    fn test_options_validate() {
        let schema = ModelSchema::new("t").with_field("n", FieldKind::Integer);
        assert!(QueryOptions::new().with_order_by("n").validate(&schema).is_ok());
        assert!(QueryOptions::new().with_order_by("m").validate(&schema).is_err());
        assert!(QueryOptions::new().with_limit(0).validate(&schema).is_err());
        assert_eq!(QueryOptions::new().order_key(&schema), "id");
    }
}
