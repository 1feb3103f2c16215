//! Documents and field values
//!
//! A document is a flat map of named fields. Values are primitives or
//! timestamps; `ServerTimestamp` is a write-only placeholder the collection
//! replaces with its own clock reading when the write is applied.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    /// Resolved to the collection's clock at write time; never stored
    ServerTimestamp,
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Rank of the value's type in query ordering
    ///
    /// Mixed-type fields order null < bool < number < timestamp < string.
    fn type_rank(&self) -> u8 {
        match self {
            FieldValue::Null | FieldValue::ServerTimestamp => 0,
            FieldValue::Bool(_) => 1,
            FieldValue::Integer(_) | FieldValue::Float(_) => 2,
            FieldValue::Timestamp(_) => 3,
            FieldValue::String(_) => 4,
        }
    }

    /// Total order used by ordered queries
    pub fn query_cmp(&self, other: &FieldValue) -> Ordering {
        use FieldValue::*;

        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Integer(a), Float(b)) => (*a as f64).total_cmp(b),
            (Float(a), Integer(b)) => a.total_cmp(&(*b as f64)),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (String(a), String(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Integer(n)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(ts: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(ts)
    }
}

/// Field map of a document
pub type Fields = BTreeMap<String, FieldValue>;

/// A stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(FieldValue::as_bool)
    }

    pub fn get_timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get(key).and_then(FieldValue::as_timestamp)
    }
}

/// Sort direction of an ordered query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Ascending,
    Descending,
}

/// Sort documents by one field
///
/// Missing fields order as null. Ties break on document id so the result is
/// deterministic; a descending sort reverses the tie-break too.
pub fn sort_documents(documents: &mut [Document], order_by: &str, direction: Direction) {
    static MISSING: FieldValue = FieldValue::Null;

    documents.sort_by(|a, b| {
        let av = a.get(order_by).unwrap_or(&MISSING);
        let bv = b.get(order_by).unwrap_or(&MISSING);
        let ord = av.query_cmp(bv).then_with(|| a.id.cmp(&b.id));
        match direction {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn doc_at(id: &str, secs: i64) -> Document {
        let mut fields = Fields::new();
        fields.insert(
            "createdAt".to_string(),
            FieldValue::Timestamp(Utc.timestamp_opt(secs, 0).unwrap()),
        );
        Document::new(id, fields)
    }

    fn ids(docs: &[Document]) -> Vec<&str> {
        docs.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn test_sort_descending_by_timestamp() {
        let mut docs = vec![doc_at("a", 10), doc_at("b", 30), doc_at("c", 20)];
        sort_documents(&mut docs, "createdAt", Direction::Descending);
        assert_eq!(ids(&docs), vec!["b", "c", "a"]);

        sort_documents(&mut docs, "createdAt", Direction::Ascending);
        assert_eq!(ids(&docs), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_sort_missing_field_orders_as_null() {
        let mut docs = vec![doc_at("a", 10), Document::new("z", Fields::new())];
        sort_documents(&mut docs, "createdAt", Direction::Ascending);
        assert_eq!(ids(&docs), vec!["z", "a"]);
    }

    #[test]
    fn test_sort_ties_break_on_id() {
        let mut docs = vec![doc_at("b", 10), doc_at("a", 10)];
        sort_documents(&mut docs, "createdAt", Direction::Ascending);
        assert_eq!(ids(&docs), vec!["a", "b"]);
        sort_documents(&mut docs, "createdAt", Direction::Descending);
        assert_eq!(ids(&docs), vec!["b", "a"]);
    }

    #[test]
    fn test_mixed_numbers_compare_by_value() {
        assert_eq!(
            FieldValue::Integer(2).query_cmp(&FieldValue::Float(1.5)),
            Ordering::Greater
        );
        assert_eq!(
            FieldValue::Bool(true).query_cmp(&FieldValue::Integer(0)),
            Ordering::Less
        );
    }

    #[test]
    fn test_typed_getters() {
        let mut fields = Fields::new();
        fields.insert("title".to_string(), "A".into());
        fields.insert("completed".to_string(), true.into());
        let doc = Document::new("x", fields);

        assert_eq!(doc.get_str("title"), Some("A"));
        assert_eq!(doc.get_bool("completed"), Some(true));
        assert_eq!(doc.get_bool("title"), None);
        assert!(doc.get_timestamp("createdAt").is_none());
    }
}
