//! SQL rendering of store queries.
//!
//! Relational adapters translate a [`StoreQuery`] into one parameterised
//! `SELECT` with `$n` placeholders. The rendering follows the in-memory
//! evaluator exactly: missing/`NULL` columns behave like `null` operands,
//! range operators never match `NULL`, and `NULL` sorts lowest.

use quarry_core::{FilterExpr, FilterOperator, ModelSchema, OrderDirection};
use serde_json::Value;

use crate::adapter::StoreQuery;

/// A rendered statement and its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub text: String,
    pub params: Vec<Value>,
}

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

struct Renderer {
    params: Vec<Value>,
}

impl Renderer {
    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }

    fn bind_list(&mut self, values: &[Value]) -> String {
        values
            .iter()
            .map(|v| self.bind(v.clone()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn condition(&mut self, filter: &FilterExpr) -> String {
        let column = quote_ident(&filter.field);
        match filter.operator {
            FilterOperator::Eq if filter.value.is_null() => format!("{column} IS NULL"),
            FilterOperator::Eq => format!("{column} = {}", self.bind(filter.value.clone())),
            FilterOperator::Ne if filter.value.is_null() => format!("{column} IS NOT NULL"),
            FilterOperator::Ne => {
                format!("{column} IS DISTINCT FROM {}", self.bind(filter.value.clone()))
            }
            FilterOperator::In => {
                let (nulls, values) = split_nulls(filter.operand_list());
                match (values.is_empty(), nulls) {
                    (true, false) => "FALSE".to_string(),
                    (true, true) => format!("{column} IS NULL"),
                    (false, false) => format!("{column} IN ({})", self.bind_list(&values)),
                    (false, true) => format!(
                        "({column} IN ({}) OR {column} IS NULL)",
                        self.bind_list(&values)
                    ),
                }
            }
            FilterOperator::NotIn => {
                let (nulls, values) = split_nulls(filter.operand_list());
                match (values.is_empty(), nulls) {
                    (true, false) => "TRUE".to_string(),
                    (true, true) => format!("{column} IS NOT NULL"),
                    (false, false) => format!(
                        "({column} IS NULL OR {column} NOT IN ({}))",
                        self.bind_list(&values)
                    ),
                    (false, true) => format!(
                        "({column} IS NOT NULL AND {column} NOT IN ({}))",
                        self.bind_list(&values)
                    ),
                }
            }
            FilterOperator::Gt | FilterOperator::Gte | FilterOperator::Lt | FilterOperator::Lte => {
                format!(
                    "{column} {} {}",
                    filter.operator.as_str(),
                    self.bind(filter.value.clone())
                )
            }
        }
    }
}

fn split_nulls(values: &[Value]) -> (bool, Vec<Value>) {
    let has_null = values.iter().any(Value::is_null);
    let rest = values.iter().filter(|v| !v.is_null()).cloned().collect();
    (has_null, rest)
}

impl StoreQuery {
    /// Render as a `SELECT` against `schema`'s table, optionally qualified by
    /// a database schema `namespace`.
    pub fn to_sql(&self, namespace: Option<&str>, schema: &ModelSchema) -> SqlQuery {
        let mut renderer = Renderer { params: Vec::new() };
        let pk = quote_ident(&schema.primary_key);

        let table = match namespace {
            Some(ns) => format!("{}.{}", quote_ident(ns), quote_ident(&schema.name)),
            None => quote_ident(&schema.name),
        };

        let mut conditions: Vec<String> = self
            .filters
            .iter()
            .map(|f| renderer.condition(f))
            .collect();

        if !self.exclude_ids.is_empty() {
            let ids = self
                .exclude_ids
                .iter()
                .map(|id| Value::String(id.clone()))
                .collect();
            conditions.push(format!("{pk} <> ALL({})", renderer.bind(Value::Array(ids))));
        }

        let mut text = format!("SELECT * FROM {table}");
        if !conditions.is_empty() {
            text.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }

        let order_key = self.order_key(schema);
        let nulls = match self.order_direction {
            OrderDirection::Asc => "NULLS FIRST",
            OrderDirection::Desc => "NULLS LAST",
        };
        text.push_str(&format!(
            " ORDER BY {} {} {}",
            quote_ident(order_key),
            self.order_direction.as_sql(),
            nulls
        ));
        if !schema.is_primary_key(order_key) {
            text.push_str(&format!(", {pk} ASC"));
        }

        if let Some(limit) = self.limit {
            text.push_str(&format!(" LIMIT {limit}"));
        }
        if self.offset > 0 {
            text.push_str(&format!(" OFFSET {}", self.offset));
        }

        SqlQuery {
            text,
            params: renderer.params,
        }
    }
}
