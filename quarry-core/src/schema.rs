//! Model schema handles
//!
//! A [`ModelSchema`] names an entity type, its primary key, and the typed
//! fields filters and orderings may reference. Filter validation runs against
//! it so unknown fields fail before the store is touched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Declared type of a model field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    /// Arbitrary JSON, never type-checked
    Json,
}

impl FieldKind {
    /// Whether a scalar operand is acceptable for a field of this kind.
    /// `null` is accepted for every kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldKind::Json, _) => true,
            (FieldKind::String, Value::String(_)) => true,
            (FieldKind::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (FieldKind::Float, Value::Number(_)) => true,
            (FieldKind::Boolean, Value::Bool(_)) => true,
            _ => false,
        }
    }
}

/// A single field declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

/// Schema handle for one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    /// Model (table) name
    pub name: String,
    /// Primary key field; always a string
    pub primary_key: String,
    /// Non-key fields
    pub fields: Vec<FieldDef>,
}

impl ModelSchema {
    /// Create a schema with an `id` primary key and no other fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: "id".to_string(),
            fields: Vec::new(),
        }
    }

    /// Override the primary key field name.
    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    /// Add a typed field.
    pub fn with_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            kind,
        });
        self
    }

    /// Whether `field` is the primary key.
    pub fn is_primary_key(&self, field: &str) -> bool {
        self.primary_key == field
    }

    /// Declared kind of `field`, if the model has it.
    pub fn field_kind(&self, field: &str) -> Option<FieldKind> {
        if self.is_primary_key(field) {
            return Some(FieldKind::String);
        }
        self.fields.iter().find(|f| f.name == field).map(|f| f.kind)
    }

    /// Fail with [`ValidationError::UnknownField`] unless the model has `field`.
    pub fn require_field(&self, field: &str) -> Result<FieldKind, ValidationError> {
        self.field_kind(field)
            .ok_or_else(|| ValidationError::UnknownField {
                model: self.name.clone(),
                field: field.to_string(),
            })
    }
}
