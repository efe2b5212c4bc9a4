//! Raw result → typed result mapping.
//!
//! A raw [`Value`] graph is mapped into the caller's Rust type through
//! [`FromRaw`]. Record types implement [`FromRecord`] and register with
//! [`impl_from_raw!`](crate::impl_from_raw); unit-only enums register with
//! [`impl_enum_from_raw!`](crate::impl_enum_from_raw).
//!
//! Records carrying an id can be shared. Mapping such a record as `Arc<T>`
//! caches the instance for the rest of the mapping call, so every later
//! `Ref` to that id yields the same allocation. A back-reference to an object
//! that is still being built is only representable as `Weak<T>`:
//!
//! ```rust,ignore
//! #[derive(Default)]
//! struct Node {
//!     name: String,
//!     parent: Weak<Node>,
//!     children: Vec<Arc<Node>>,
//! }
//!
//! impl FromRecord for Node {
//!     fn from_record(r: &mut RecordReader<'_, '_>) -> Result<Self> {
//!         Ok(Node {
//!             name: r.field("Name")?,
//!             parent: r.field("Parent")?,
//!             children: r.field("Children")?,
//!         })
//!     }
//! }
//! impl_from_raw!(Node);
//! ```

mod convert;

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use crate::error::{Error, Result};
use crate::value::{ObjectId, Record, Value};

pub use self::convert::enum_from_raw;

/// How a Rust result type relates to the static type of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// A single value or record.
    Scalar,
    /// A collection of elements.
    Sequence,
    /// Accepts either.
    Dynamic,
}

/// Types that can be reconstructed from a raw result.
pub trait FromRaw: Sized {
    fn from_raw<'a>(raw: &'a Value, ctx: &mut MapContext<'a>) -> Result<Self>;

    /// Value used when a record field is absent. `None` makes the field required.
    fn missing() -> Option<Self> {
        None
    }

    fn shape() -> ResultShape {
        ResultShape::Scalar
    }
}

/// Record types read field by field.
pub trait FromRecord: Sized + Default {
    fn from_record(reader: &mut RecordReader<'_, '_>) -> Result<Self>;
}

/// Map a raw result graph into `T`.
pub fn map<T: FromRaw>(raw: &Value) -> Result<T> {
    let mut ctx = MapContext::new(raw);
    T::from_raw(raw, &mut ctx)
}

type Key = (ObjectId, TypeId);

/// Per-call mapping state: the id index of the raw graph plus the shared and
/// in-construction instances.
pub struct MapContext<'a> {
    index: HashMap<ObjectId, &'a Value>,
    shared: HashMap<Key, Box<dyn Any>>,
    pending: HashMap<Key, Box<dyn Any>>,
    visiting: HashSet<ObjectId>,
}

impl<'a> MapContext<'a> {
    pub fn new(root: &'a Value) -> Self {
        let mut index = HashMap::new();
        index_ids(root, &mut index);
        Self {
            index,
            shared: HashMap::new(),
            pending: HashMap::new(),
            visiting: HashSet::new(),
        }
    }

    /// Follow a `Ref` to the record it points at.
    pub fn deref(&self, raw: &'a Value) -> Result<&'a Value> {
        match raw {
            Value::Ref(id) => self
                .index
                .get(id)
                .copied()
                .ok_or_else(|| Error::mapping(format!("dangling reference to {}", id))),
            other => Ok(other),
        }
    }

    /// Run `read` over the record behind `raw`, detecting cycles through
    /// plain (non-shared) values.
    pub fn read_record<T>(
        &mut self,
        raw: &'a Value,
        read: impl FnOnce(&mut RecordReader<'_, 'a>) -> Result<T>,
    ) -> Result<T> {
        let record = match self.deref(raw)? {
            Value::Record(record) => record,
            other => {
                return Err(Error::mapping(format!(
                    "expected a record, got {}",
                    other.kind()
                )));
            }
        };
        if let Some(id) = record.id {
            if !self.visiting.insert(id) {
                return Err(Error::mapping(format!(
                    "object {} references itself; map the back-reference as Weak",
                    id
                )));
            }
        }
        let result = read(&mut RecordReader { record, ctx: self });
        if let Some(id) = record.id {
            self.visiting.remove(&id);
        }
        result
    }

    fn shared<T: 'static>(&self, id: ObjectId) -> Option<Arc<T>> {
        self.shared
            .get(&(id, TypeId::of::<T>()))
            .and_then(|any| any.downcast_ref::<Arc<T>>())
            .cloned()
    }

    fn pending<T: 'static>(&self, id: ObjectId) -> Option<Weak<T>> {
        self.pending
            .get(&(id, TypeId::of::<T>()))
            .and_then(|any| any.downcast_ref::<Weak<T>>())
            .cloned()
    }
}

fn index_ids<'a>(value: &'a Value, index: &mut HashMap<ObjectId, &'a Value>) {
    match value {
        Value::Record(record) => {
            if let Some(id) = record.id {
                index.entry(id).or_insert(value);
            }
            for field in record.fields.values() {
                index_ids(field, index);
            }
        }
        Value::List(items) => {
            for item in items {
                index_ids(item, index);
            }
        }
        _ => {}
    }
}

fn object_id(raw: &Value) -> Option<ObjectId> {
    match raw {
        Value::Record(record) => record.id,
        Value::Ref(id) => Some(*id),
        _ => None,
    }
}

/// Field access for [`FromRecord`] implementations.
pub struct RecordReader<'r, 'a> {
    record: &'a Record,
    ctx: &'r mut MapContext<'a>,
}

impl<'a> RecordReader<'_, 'a> {
    pub fn id(&self) -> Option<ObjectId> {
        self.record.id
    }

    pub fn record(&self) -> &'a Record {
        self.record
    }

    /// Read a field. Lookup is exact first, then case-insensitive; an absent
    /// field takes `T::missing()`.
    pub fn field<T: FromRaw>(&mut self, name: &str) -> Result<T> {
        match self.record.lookup(name) {
            Some(raw) => T::from_raw(raw, self.ctx).map_err(|e| match e {
                Error::Mapping(m) => Error::mapping(format!("field '{}': {}", name, m)),
                other => other,
            }),
            None => T::missing()
                .ok_or_else(|| Error::mapping(format!("missing required field '{}'", name))),
        }
    }
}

/// Register [`FromRecord`] types as [`FromRaw`].
#[macro_export]
macro_rules! impl_from_raw {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::mapper::FromRaw for $ty {
                fn from_raw<'a>(
                    raw: &'a $crate::value::Value,
                    ctx: &mut $crate::mapper::MapContext<'a>,
                ) -> $crate::error::Result<Self> {
                    ctx.read_record(raw, <$ty as $crate::mapper::FromRecord>::from_record)
                }

                fn missing() -> Option<Self> {
                    Some(<$ty as Default>::default())
                }
            }
        )+
    };
}

/// Register a unit-only enum as [`FromRaw`], by variant name or ordinal.
#[macro_export]
macro_rules! impl_enum_from_raw {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $crate::mapper::FromRaw for $ty {
            fn from_raw<'a>(
                raw: &'a $crate::value::Value,
                _ctx: &mut $crate::mapper::MapContext<'a>,
            ) -> $crate::error::Result<Self> {
                $crate::mapper::enum_from_raw(
                    raw,
                    stringify!($ty),
                    &[$((stringify!($variant), $ty::$variant)),+],
                )
            }
        }
    };
}

impl<T: FromRaw + Default + 'static> FromRaw for Arc<T> {
    fn from_raw<'a>(raw: &'a Value, ctx: &mut MapContext<'a>) -> Result<Self> {
        let Some(id) = object_id(raw) else {
            return T::from_raw(raw, ctx).map(Arc::new);
        };
        if let Some(shared) = ctx.shared::<T>(id) {
            return Ok(shared);
        }
        if ctx.pending::<T>(id).is_some() {
            return Err(Error::mapping(format!(
                "object {} is part of a reference cycle and must be mapped as Weak",
                id
            )));
        }

        let target = ctx.deref(raw)?;
        let key = (id, TypeId::of::<T>());
        let mut failure = None;
        let instance = Arc::new_cyclic(|weak: &Weak<T>| {
            ctx.pending.insert(key, Box::new(weak.clone()));
            T::from_raw(target, ctx).unwrap_or_else(|e| {
                failure = Some(e);
                T::default()
            })
        });
        ctx.pending.remove(&key);
        if let Some(e) = failure {
            return Err(e);
        }
        ctx.shared.insert(key, Box::new(instance.clone()));
        Ok(instance)
    }

    fn shape() -> ResultShape {
        T::shape()
    }
}

/// A back-reference. Resolves to the instance under construction when the
/// target is an ancestor; a missing or null value is an empty `Weak`.
impl<T: FromRaw + Default + 'static> FromRaw for Weak<T> {
    fn from_raw<'a>(raw: &'a Value, ctx: &mut MapContext<'a>) -> Result<Self> {
        if raw.is_null() {
            return Ok(Weak::new());
        }
        if let Some(weak) = object_id(raw).and_then(|id| ctx.pending::<T>(id)) {
            return Ok(weak);
        }
        <Arc<T> as FromRaw>::from_raw(raw, ctx).map(|shared| Arc::downgrade(&shared))
    }

    fn missing() -> Option<Self> {
        Some(Weak::new())
    }

    fn shape() -> ResultShape {
        T::shape()
    }
}

impl<T: FromRaw> FromRaw for Box<T> {
    fn from_raw<'a>(raw: &'a Value, ctx: &mut MapContext<'a>) -> Result<Self> {
        T::from_raw(raw, ctx).map(Box::new)
    }

    fn missing() -> Option<Self> {
        T::missing().map(Box::new)
    }

    fn shape() -> ResultShape {
        T::shape()
    }
}

impl<T: FromRaw> FromRaw for Option<T> {
    fn from_raw<'a>(raw: &'a Value, ctx: &mut MapContext<'a>) -> Result<Self> {
        match raw {
            Value::Null => Ok(None),
            other => T::from_raw(other, ctx).map(Some),
        }
    }

    fn missing() -> Option<Self> {
        Some(None)
    }

    fn shape() -> ResultShape {
        T::shape()
    }
}

impl<T: FromRaw> FromRaw for Vec<T> {
    fn from_raw<'a>(raw: &'a Value, ctx: &mut MapContext<'a>) -> Result<Self> {
        match ctx.deref(raw)? {
            Value::Null => Ok(Vec::new()),
            Value::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    T::from_raw(item, ctx).map_err(|e| match e {
                        Error::Mapping(m) => Error::mapping(format!("element {}: {}", i, m)),
                        other => other,
                    })
                })
                .collect(),
            other => Err(Error::mapping(format!(
                "expected a list, got {}",
                other.kind()
            ))),
        }
    }

    fn missing() -> Option<Self> {
        Some(Vec::new())
    }

    fn shape() -> ResultShape {
        ResultShape::Sequence
    }
}

impl FromRaw for Value {
    fn from_raw<'a>(raw: &'a Value, _ctx: &mut MapContext<'a>) -> Result<Self> {
        Ok(raw.clone())
    }

    fn missing() -> Option<Self> {
        Some(Value::Null)
    }

    fn shape() -> ResultShape {
        ResultShape::Dynamic
    }
}

impl FromRaw for Record {
    fn from_raw<'a>(raw: &'a Value, ctx: &mut MapContext<'a>) -> Result<Self> {
        match ctx.deref(raw)? {
            Value::Record(record) => Ok(record.clone()),
            other => Err(Error::mapping(format!(
                "expected a record, got {}",
                other.kind()
            ))),
        }
    }

    fn shape() -> ResultShape {
        ResultShape::Dynamic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Default)]
    struct Node {
        name: String,
        parent: Weak<Node>,
        children: Vec<Arc<Node>>,
    }

    impl FromRecord for Node {
        fn from_record(r: &mut RecordReader<'_, '_>) -> Result<Self> {
            Ok(Node {
                name: r.field("Name")?,
                parent: r.field("Parent")?,
                children: r.field("Children")?,
            })
        }
    }

    #[derive(Debug, Default, PartialEq)]
    struct Person {
        name: String,
        age: i32,
        nickname: Option<String>,
        color: Color,
    }

    impl FromRecord for Person {
        fn from_record(r: &mut RecordReader<'_, '_>) -> Result<Self> {
            Ok(Person {
                name: r.field("Name")?,
                age: r.field("Age")?,
                nickname: r.field("Nickname")?,
                color: r.field("Color")?,
            })
        }
    }

    #[derive(Debug, Default)]
    struct Chain {
        next: Option<Box<Chain>>,
    }

    impl FromRecord for Chain {
        fn from_record(r: &mut RecordReader<'_, '_>) -> Result<Self> {
            Ok(Chain {
                next: r.field("Next")?,
            })
        }
    }

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    enum Color {
        #[default]
        Red,
        Green,
        Blue,
    }

    crate::impl_from_raw!(Node, Person, Chain);
    crate::impl_enum_from_raw!(Color { Red, Green, Blue });

    fn tree() -> Value {
        let child = |id: u64, name: &str| {
            Value::from(
                Record::with_id(id)
                    .field("Name", name)
                    .field("Parent", Value::Ref(ObjectId(1)))
                    .field("Children", Vec::<Value>::new()),
            )
        };
        Value::from(
            Record::with_id(1)
                .field("Name", "root")
                .field("Children", vec![child(2, "a"), child(3, "b")]),
        )
    }

    #[test]
    fn test_cyclic_graph_shares_one_instance() {
        let root: Arc<Node> = map(&tree()).unwrap();
        assert_eq!(root.name, "root");
        assert_eq!(root.children.len(), 2);
        for child in &root.children {
            let parent = child.parent.upgrade().unwrap();
            assert!(Arc::ptr_eq(&parent, &root));
        }
        assert!(root.parent.upgrade().is_none());
    }

    #[test]
    fn test_repeated_refs_share_allocation() {
        let raw = Value::List(vec![
            Value::from(Record::with_id(7).field("Name", "shared")),
            Value::Ref(ObjectId(7)),
        ]);
        let nodes: Vec<Arc<Node>> = map(&raw).unwrap();
        assert!(Arc::ptr_eq(&nodes[0], &nodes[1]));
    }

    #[test]
    fn test_forward_ref_resolves() {
        let raw = Value::List(vec![
            Value::Ref(ObjectId(9)),
            Value::from(Record::with_id(9).field("Name", "later")),
        ]);
        let nodes: Vec<Arc<Node>> = map(&raw).unwrap();
        assert_eq!(nodes[0].name, "later");
        assert!(Arc::ptr_eq(&nodes[0], &nodes[1]));
    }

    #[test]
    fn test_cycle_requested_as_strong_is_an_error() {
        #[derive(Debug, Default)]
        struct Strong {
            parent: Option<Arc<Strong>>,
            children: Vec<Arc<Strong>>,
        }
        impl FromRecord for Strong {
            fn from_record(r: &mut RecordReader<'_, '_>) -> Result<Self> {
                Ok(Strong {
                    parent: r.field("Parent")?,
                    children: r.field("Children")?,
                })
            }
        }
        crate::impl_from_raw!(Strong);

        let err = map::<Arc<Strong>>(&tree()).unwrap_err();
        assert!(matches!(&err, Error::Mapping(m) if m.contains("cycle")), "{}", err);
    }

    #[test]
    fn test_plain_cycle_is_an_error() {
        let raw = Value::from(Record::with_id(1).field("Next", Value::Ref(ObjectId(1))));
        assert!(matches!(map::<Chain>(&raw), Err(Error::Mapping(_))));
    }

    #[test]
    fn test_dangling_ref() {
        let raw = Value::List(vec![Value::Ref(ObjectId(42))]);
        let err = map::<Vec<Arc<Node>>>(&raw).unwrap_err();
        assert!(matches!(&err, Error::Mapping(m) if m.contains("dangling")), "{}", err);
    }

    #[test]
    fn test_record_conversions() {
        let raw = Value::from(
            Record::new()
                .field("name", "Ada")
                .field("Age", 36.0)
                .field("Color", "green")
                .field("Extra", true),
        );
        let person: Person = map(&raw).unwrap();
        assert_eq!(
            person,
            Person {
                name: "Ada".to_string(),
                age: 36,
                nickname: None,
                color: Color::Green,
            }
        );
    }

    #[test]
    fn test_missing_required_field() {
        #[derive(Debug, Default)]
        struct Stamp {
            _at: chrono::DateTime<chrono::Utc>,
        }
        impl FromRecord for Stamp {
            fn from_record(r: &mut RecordReader<'_, '_>) -> Result<Self> {
                Ok(Stamp { _at: r.field("At")? })
            }
        }
        crate::impl_from_raw!(Stamp);

        let err = map::<Stamp>(&Value::from(Record::new())).unwrap_err();
        assert!(matches!(&err, Error::Mapping(m) if m.contains("'At'")), "{}", err);
    }

    #[test]
    fn test_missing_nested_record_takes_default() {
        #[derive(Debug, Default, PartialEq)]
        struct Badge {
            owner: Person,
            label: String,
        }
        impl FromRecord for Badge {
            fn from_record(r: &mut RecordReader<'_, '_>) -> Result<Self> {
                Ok(Badge {
                    owner: r.field("Owner")?,
                    label: r.field("Label")?,
                })
            }
        }
        crate::impl_from_raw!(Badge);

        let badge: Badge = map(&Value::from(Record::new().field("Label", "x"))).unwrap();
        assert_eq!(
            badge,
            Badge {
                owner: Person::default(),
                label: "x".to_string(),
            }
        );
    }

    #[test]
    fn test_enum_by_ordinal_and_unknown_name() {
        assert_eq!(map::<Color>(&Value::Int(2)).unwrap(), Color::Blue);
        assert!(map::<Color>(&Value::Int(3)).is_err());
        assert!(map::<Color>(&Value::from("Purple")).is_err());
    }

    #[test]
    fn test_shapes() {
        assert_eq!(<Vec<Person>>::shape(), ResultShape::Sequence);
        assert_eq!(<Option<Person>>::shape(), ResultShape::Scalar);
        assert_eq!(<Arc<Node>>::shape(), ResultShape::Scalar);
        assert_eq!(Value::shape(), ResultShape::Dynamic);
    }
}
