//! Filter expressions for cache scans and store queries
//!
//! A filter is an ordered list of [`FilterExpr`] triples, implicitly ANDed.
//! The operator set is closed; the in-memory evaluator lives here
//! ([`FilterExpr::matches`]) and the storage crate renders the same triples
//! for relational stores.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::identity::Row;
use crate::query::{compare_values, field_value};
use crate::schema::ModelSchema;

/// Filter operator for field comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// In list of values
    In,
    /// Not in list of values
    NotIn,
    /// Greater than
    Gt,
    /// Greater than or equal
    Gte,
    /// Less than
    Lt,
    /// Less than or equal
    Lte,
}

impl FilterOperator {
    /// Textual form used in filter triples.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::Ne => "!=",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not in",
            FilterOperator::Gt => ">",
            FilterOperator::Gte => ">=",
            FilterOperator::Lt => "<",
            FilterOperator::Lte => "<=",
        }
    }

    fn is_set(&self) -> bool {
        matches!(self, FilterOperator::In | FilterOperator::NotIn)
    }

    fn is_range(&self) -> bool {
        matches!(
            self,
            FilterOperator::Gt | FilterOperator::Gte | FilterOperator::Lt | FilterOperator::Lte
        )
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOperator {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_lowercase().as_str() {
            "=" | "==" => Ok(FilterOperator::Eq),
            "!=" | "<>" => Ok(FilterOperator::Ne),
            "in" => Ok(FilterOperator::In),
            "not in" | "!in" => Ok(FilterOperator::NotIn),
            ">" => Ok(FilterOperator::Gt),
            ">=" => Ok(FilterOperator::Gte),
            "<" => Ok(FilterOperator::Lt),
            "<=" => Ok(FilterOperator::Lte),
            _ => Err(ValidationError::UnknownOperator {
                operator: s.to_string(),
            }),
        }
    }
}

/// One `(field, operator, operand)` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExpr {
    /// Field to filter on
    pub field: String,
    /// Operator to apply
    pub operator: FilterOperator,
    /// Operand; an array for `in` / `not in`
    pub value: Value,
}

impl FilterExpr {
    /// Create a new filter expression.
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Parse a textual triple such as `("field1", "in", [0, 1])`.
    pub fn parse(
        field: impl Into<String>,
        operator: &str,
        value: Value,
    ) -> Result<Self, ValidationError> {
        Ok(Self::new(field, operator.parse()?, value))
    }

    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOperator::Eq, value)
    }

    /// Create a set-membership filter.
    pub fn in_list(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(field, FilterOperator::In, Value::Array(values))
    }

    /// Operand list for set operators, empty otherwise.
    pub fn operand_list(&self) -> &[Value] {
        match &self.value {
            Value::Array(items) if self.operator.is_set() => items,
            _ => &[],
        }
    }

    /// Check the field exists on `schema` and the operand fits the operator
    /// and the field's declared kind.
    pub fn validate(&self, schema: &ModelSchema) -> Result<(), ValidationError> {
        let kind = schema.require_field(&self.field)?;
        let invalid = |reason: &str| ValidationError::InvalidOperand {
            field: self.field.clone(),
            operator: self.operator.to_string(),
            reason: reason.to_string(),
        };

        if self.operator.is_set() {
            let Value::Array(items) = &self.value else {
                return Err(invalid("expected an array of values"));
            };
            if items.iter().any(|v| v.is_array() || v.is_object()) {
                return Err(invalid("set members must be scalars"));
            }
            if items.iter().any(|v| !kind.accepts(v)) {
                return Err(invalid("set member does not match field type"));
            }
            return Ok(());
        }

        if self.value.is_array() || self.value.is_object() {
            return Err(invalid("expected a scalar value"));
        }
        if self.operator.is_range() && !(self.value.is_number() || self.value.is_string()) {
            return Err(invalid("range comparison needs a number or string"));
        }
        if !kind.accepts(&self.value) {
            return Err(invalid("value does not match field type"));
        }
        Ok(())
    }

    /// Evaluate against an in-memory row. A missing field reads as `null`.
    ///
    /// Range operators never match `null` or a value of a different type.
    pub fn matches(&self, row: &Row) -> bool {
        let actual = field_value(row, &self.field);
        match self.operator {
            FilterOperator::Eq => compare_values(actual, &self.value).is_eq(),
            FilterOperator::Ne => compare_values(actual, &self.value).is_ne(),
            FilterOperator::In => self
                .operand_list()
                .iter()
                .any(|v| compare_values(actual, v).is_eq()),
            FilterOperator::NotIn => self
                .operand_list()
                .iter()
                .all(|v| compare_values(actual, v).is_ne()),
            FilterOperator::Gt | FilterOperator::Gte | FilterOperator::Lt | FilterOperator::Lte => {
                let comparable = matches!(
                    (actual, &self.value),
                    (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_))
                );
                if !comparable {
                    return false;
                }
                let ord = compare_values(actual, &self.value);
                match self.operator {
                    FilterOperator::Gt => ord.is_gt(),
                    FilterOperator::Gte => ord.is_ge(),
                    FilterOperator::Lt => ord.is_lt(),
                    _ => ord.is_le(),
                }
            }
        }
    }
}

/// Validate every expression of a conjunction.
pub fn validate_filters(filters: &[FilterExpr], schema: &ModelSchema) -> Result<(), ValidationError> {
    filters.iter().try_for_each(|f| f.validate(schema))
}

/// Evaluate a conjunction; the empty conjunction matches everything.
pub fn matches_all(filters: &[FilterExpr], row: &Row) -> bool {
    filters.iter().all(|f| f.matches(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::row_from_pairs;
    use crate::schema::FieldKind;
    use proptest::prelude::*;
    use serde_json::json;

    fn schema() -> ModelSchema {
        ModelSchema::new("entity")
            .with_field("field1", FieldKind::Integer)
            .with_field("name", FieldKind::String)
    }

    fn row(id: &str, field1: i64) -> Row {
        row_from_pairs([("id", json!(id)), ("field1", json!(field1))])
    }

    #[test]
    fn test_operator_parse() {
        assert_eq!("=".parse::<FilterOperator>().unwrap(), FilterOperator::Eq);
        assert_eq!("IN".parse::<FilterOperator>().unwrap(), FilterOperator::In);
        assert_eq!("not  in".parse::<FilterOperator>().unwrap(), FilterOperator::NotIn);
        assert_eq!(">=".parse::<FilterOperator>().unwrap(), FilterOperator::Gte);
        assert!(matches!(
            "like".parse::<FilterOperator>(),
            Err(ValidationError::UnknownOperator { .. })
        ));
    }

    #[test]
    fn test_eq_and_in_match() {
        let r = row("a", 1);
        assert!(FilterExpr::eq("field1", json!(1)).matches(&r));
        assert!(!FilterExpr::eq("field1", json!(2)).matches(&r));
        assert!(FilterExpr::in_list("field1", vec![json!(0), json!(1)]).matches(&r));
        assert!(!FilterExpr::in_list("field1", vec![]).matches(&r));
        assert!(FilterExpr::new("field1", FilterOperator::NotIn, json!([])).matches(&r));
    }

    #[test]
    fn test_missing_field_reads_null() {
        let r = row("a", 1);
        assert!(FilterExpr::eq("name", Value::Null).matches(&r));
        assert!(!FilterExpr::new("name", FilterOperator::Gt, json!("a")).matches(&r));
    }

    #[test]
    fn test_range_operators() {
        let r = row("a", 5);
        assert!(FilterExpr::new("field1", FilterOperator::Gt, json!(4)).matches(&r));
        assert!(FilterExpr::new("field1", FilterOperator::Gte, json!(5)).matches(&r));
        assert!(!FilterExpr::new("field1", FilterOperator::Lt, json!(5)).matches(&r));
        assert!(FilterExpr::new("field1", FilterOperator::Lte, json!(5)).matches(&r));
        assert!(!FilterExpr::new("field1", FilterOperator::Lt, json!("9")).matches(&r));
    }

    #[test]
    fn test_validate_rejects_bad_triples() {
        let s = schema();
        assert!(matches!(
            FilterExpr::eq("nope", json!(1)).validate(&s),
            Err(ValidationError::UnknownField { .. })
        ));
        assert!(matches!(
            FilterExpr::new("field1", FilterOperator::In, json!(1)).validate(&s),
            Err(ValidationError::InvalidOperand { .. })
        ));
        assert!(matches!(
            FilterExpr::eq("field1", json!("one")).validate(&s),
            Err(ValidationError::InvalidOperand { .. })
        ));
        assert!(matches!(
            FilterExpr::new("name", FilterOperator::Gt, Value::Null).validate(&s),
            Err(ValidationError::InvalidOperand { .. })
        ));
        assert!(FilterExpr::parse("field1", "in", json!([0, 1])).unwrap().validate(&s).is_ok());
        assert!(FilterExpr::eq("id", json!("x")).validate(&s).is_ok());
    }

    proptest! {
        #[test]
        fn prop_in_is_disjunction_of_eq(v in 0i64..5, set in prop::collection::vec(0i64..5, 0..4)) {
            let r = row("x", v);
            let values: Vec<Value> = set.iter().map(|n| json!(n)).collect();
            let via_in = FilterExpr::in_list("field1", values.clone()).matches(&r);
            let via_eq = values.into_iter().any(|n| FilterExpr::eq("field1", n).matches(&r));
            prop_assert_eq!(via_in, via_eq);
        }

        #[test]
        fn prop_not_in_negates_in(v in 0i64..5, set in prop::collection::vec(0i64..5, 0..4)) {
            let r = row("x", v);
            let values: Vec<Value> = set.iter().map(|n| json!(n)).collect();
            let yes = FilterExpr::new("field1", FilterOperator::In, Value::Array(values.clone()));
            let no = FilterExpr::new("field1", FilterOperator::NotIn, Value::Array(values));
            prop_assert_eq!(yes.matches(&r), !no.matches(&r));
        }
    }
}
