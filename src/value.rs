//! Raw values and result records.
//!
//! [`Value`] is the boundary-safe data model: constants inside the portable
//! AST, rows produced by a data source, and raw results travelling back to
//! the caller all use it. Shared or cyclic object graphs are expressed with
//! [`Value::Ref`] tokens pointing at a [`Record`] id seen earlier.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Identity of a record within one raw result graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A self-describing value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
    Record(Record),
    /// Back-reference to a record with this id, already emitted in the same graph.
    Ref(ObjectId),
}

/// An order-preserving field map with an optional identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Option<ObjectId>,
    pub fields: IndexMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record carrying an object id.
    pub fn with_id(id: u64) -> Self {
        Self {
            id: Some(ObjectId(id)),
            fields: IndexMap::new(),
        }
    }

    /// Add a field (builder style).
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Exact, case-sensitive lookup.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Exact lookup first, then an ASCII case-insensitive fallback.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).or_else(|| {
            self.fields
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of `Int` and `Float`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Short name of the variant, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Timestamp(_) => "timestamp",
            Value::List(_) => "list",
            Value::Record(_) => "record",
            Value::Ref(_) => "ref",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Str(_) => 3,
            Value::Timestamp(_) => 4,
            Value::List(_) => 5,
            Value::Record(_) => 6,
            Value::Ref(_) => 7,
        }
    }

    /// Total order used for sorting, min/max and key comparison.
    ///
    /// Nulls sort first; integers and floats compare numerically.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                let (a, b) = (self.as_f64().unwrap_or_default(), other.as_f64().unwrap_or_default());
                a.total_cmp(&b)
            }
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Ref(a), Value::Ref(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Record(a), Value::Record(b)) => {
                for ((ka, va), (kb, vb)) in a.fields.iter().zip(&b.fields) {
                    let ord = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }

    /// Equality with numeric widening (`Int(1) == Float(1.0)`).
    pub fn loose_eq(&self, other: &Value) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "'{}'", s),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Record(r) => {
                if let Some(id) = r.id {
                    write!(f, "{} ", id)?;
                }
                write!(f, "{{")?;
                for (i, (k, v)) in r.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Ref(id) => write!(f, "ref {}", id),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Value::Record(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Make each element of a result list self-contained.
///
/// A [`Value::Ref`] inside one element may point at a record that was first
/// emitted in another. Such a reference is replaced by a copy of its target
/// (id included) at its first occurrence in the element; later references to
/// the same id inside that element stay references. Dangling references are
/// left as they are.
pub fn detach(items: Vec<Value>) -> Vec<Value> {
    let mut targets = HashMap::new();
    for item in &items {
        index_records(item, &mut targets);
    }
    if targets.is_empty() {
        return items;
    }
    items
        .into_iter()
        .map(|mut item| {
            let mut defined = HashSet::new();
            collect_ids(&item, &mut defined);
            inline_refs(&mut item, &targets, &mut defined, false);
            item
        })
        .collect()
}

fn index_records(value: &Value, out: &mut HashMap<ObjectId, Record>) {
    match value {
        Value::Record(record) => {
            if let Some(id) = record.id {
                out.entry(id).or_insert_with(|| record.clone());
            }
            for field in record.fields.values() {
                index_records(field, out);
            }
        }
        Value::List(items) => items.iter().for_each(|v| index_records(v, out)),
        _ => {}
    }
}

fn collect_ids(value: &Value, out: &mut HashSet<ObjectId>) {
    match value {
        Value::Record(record) => {
            out.extend(record.id);
            record.fields.values().for_each(|v| collect_ids(v, out));
        }
        Value::List(items) => items.iter().for_each(|v| collect_ids(v, out)),
        _ => {}
    }
}

/// `copied` is set while walking a record copied in from another element:
/// its nested records may already exist in this element and then become
/// references themselves.
fn inline_refs(
    value: &mut Value,
    targets: &HashMap<ObjectId, Record>,
    defined: &mut HashSet<ObjectId>,
    copied: bool,
) {
    match value {
        Value::Ref(id) if !defined.contains(id) => {
            let id = *id;
            let Some(target) = targets.get(&id) else {
                return;
            };
            defined.insert(id);
            let mut copy = target.clone();
            for field in copy.fields.values_mut() {
                inline_refs(field, targets, defined, true);
            }
            *value = Value::Record(copy);
        }
        Value::Record(record) => {
            if copied {
                if let Some(id) = record.id {
                    if !defined.insert(id) {
                        *value = Value::Ref(id);
                        return;
                    }
                }
            }
            for field in record.fields.values_mut() {
                inline_refs(field, targets, defined, copied);
            }
        }
        Value::List(items) => {
            for item in items {
                inline_refs(item, targets, defined, copied);
            }
        }
        _ => {}
    }
}

/// Convert a JSON document into a [`Value`].
///
/// Objects become records; a `"$id"` key becomes the record id and an object
/// of the form `{"$ref": n}` becomes [`Value::Ref`].
pub fn from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => Value::List(items.iter().map(from_json).collect()),
        serde_json::Value::Object(map) => {
            if let (1, Some(id)) = (map.len(), map.get("$ref").and_then(|v| v.as_u64())) {
                return Value::Ref(ObjectId(id));
            }
            let mut record = Record::new();
            for (k, v) in map {
                if k == "$id" {
                    record.id = v.as_u64().map(ObjectId);
                } else {
                    record.insert(k.clone(), from_json(v));
                }
            }
            Value::Record(record)
        }
    }
}

/// Convert a [`Value`] into plain JSON (inverse of [`from_json`]).
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::Number((*i).into()),
        Value::Float(x) => serde_json::Number::from_f64(*x)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Timestamp(t) => serde_json::Value::String(t.to_rfc3339()),
        Value::List(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Record(r) => {
            let mut map = serde_json::Map::new();
            if let Some(id) = r.id {
                map.insert("$id".to_string(), serde_json::Value::Number(id.0.into()));
            }
            for (k, v) in &r.fields {
                map.insert(k.clone(), to_json(v));
            }
            serde_json::Value::Object(map)
        }
        Value::Ref(id) => serde_json::json!({ "$ref": id.0 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_from() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42i32), Value::Int(42));
        assert_eq!(Value::from("hello"), Value::Str("hello".to_string()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn test_record_preserves_field_order() {
        let r = Record::new().field("b", 1).field("a", 2).field("c", 3);
        let names: Vec<&str> = r.fields.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_lookup_falls_back_to_case_insensitive() {
        let r = Record::new().field("Name", "Ann").field("name", "ann");
        assert_eq!(r.lookup("name"), Some(&Value::from("ann")));
        assert_eq!(r.lookup("NAME"), Some(&Value::from("Ann")));
        assert_eq!(r.lookup("age"), None);
    }

    #[test]
    fn test_total_cmp_mixes_numbers() {
        assert_eq!(Value::Int(2).total_cmp(&Value::Float(1.5)), Ordering::Greater);
        assert!(Value::Int(1).loose_eq(&Value::Float(1.0)));
        assert_eq!(Value::Null.total_cmp(&Value::Int(0)), Ordering::Less);
    }

    #[test]
    fn test_json_refs() {
        let json = serde_json::json!({ "$id": 1, "name": "root", "self": { "$ref": 1 } });
        let value = from_json(&json);
        let record = value.as_record().unwrap();
        assert_eq!(record.id, Some(ObjectId(1)));
        assert_eq!(record.get("self"), Some(&Value::Ref(ObjectId(1))));
        assert_eq!(to_json(&value), json);
    }

    #[test]
    fn test_detach_inlines_foreign_targets() {
        let team = Record::with_id(1).field("Name", "core");
        let items = vec![
            Value::from(Record::new().field("Team", team.clone())),
            Value::from(
                Record::new()
                    .field("Team", Value::Ref(ObjectId(1)))
                    .field("Lead", Value::Ref(ObjectId(1))),
            ),
            Value::from(Record::new().field("Team", Value::Ref(ObjectId(9)))),
        ];
        let detached = detach(items.clone());
        assert_eq!(detached[0], items[0]);
        assert_eq!(
            detached[1],
            Value::from(
                Record::new()
                    .field("Team", team)
                    .field("Lead", Value::Ref(ObjectId(1)))
            )
        );
        assert_eq!(detached[2], items[2]);
    }

    #[test]
    fn test_detach_keeps_cycles_as_refs() {
        let root = Record::with_id(1)
            .field("Name", "root")
            .field("Child", Record::with_id(2).field("Parent", Value::Ref(ObjectId(1))));
        let items = vec![
            Value::from(root.clone()),
            Value::from(Record::new().field("Owner", Value::Ref(ObjectId(2)))),
        ];
        let detached = detach(items);
        let owner = detached[1].as_record().unwrap().get("Owner").unwrap();
        let owner = owner.as_record().unwrap();
        assert_eq!(owner.id, Some(ObjectId(2)));
        let parent = owner.get("Parent").unwrap().as_record().unwrap();
        assert_eq!(parent.id, Some(ObjectId(1)));
        assert_eq!(
            parent.get("Child"),
            Some(&Value::Ref(ObjectId(2)))
        );
    }
}
