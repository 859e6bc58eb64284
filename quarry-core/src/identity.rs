//! Identity types for indexed entities

use serde_json::{Map, Value};

/// Primary key of an indexed entity. Unique within one model.
pub type EntityId = String;

/// Chain position at which a value was produced.
pub type BlockHeight = u64;

/// Global write sequence number, see [`crate::SequenceGenerator`].
pub type Sequence = u64;

/// Full entity snapshot: field name to scalar value.
pub type Row = Map<String, Value>;

/// Read the string primary key out of a row.
pub fn row_id<'a>(row: &'a Row, primary_key: &str) -> Option<&'a str> {
    row.get(primary_key).and_then(Value::as_str)
}

/// Build a row from `(field, value)` pairs.
pub fn row_from_pairs<I, K>(pairs: I) -> Row
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_id_reads_string_key() {
        let row = row_from_pairs([("id", json!("0x01")), ("amount", json!(5))]);
        assert_eq!(row_id(&row, "id"), Some("0x01"));
        assert_eq!(row_id(&row, "amount"), None);
        assert_eq!(row_id(&row, "missing"), None);
    }
}
