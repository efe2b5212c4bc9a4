//! Type metadata catalog.
//!
//! The catalog maps host types to portable [`TypeDescriptor`]s and back.
//! Records, enums and functions are keyed by the descriptor fingerprint of
//! their (declaring) type, so resolving a descriptor that arrived over the
//! wire is a single hash lookup.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use chrono::Duration;

use crate::ast::{CORE_NAMESPACE, MemberDescriptor, TypeDescriptor};
use crate::error::{Error, Result};
use crate::host::{FunctionDef, HostType};
use crate::value::Value;

/// Source of type metadata for translation and re-binding.
pub trait TypeInfoProvider: Send + Sync {
    /// Describe a host type portably.
    fn describe(&self, ty: &HostType) -> TypeDescriptor;

    /// Resolve a descriptor to a local host type.
    fn resolve(&self, descriptor: &TypeDescriptor) -> Result<HostType>;

    /// Static type of `ty.member`, if the member exists.
    fn member_type(&self, ty: &HostType, member: &str) -> Option<HostType>;

    /// Look up a function by declaring type and name.
    fn function(&self, declaring: &HostType, name: &str) -> Option<Arc<FunctionDef>>;
}

/// A named record type and its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDef {
    pub name: String,
    pub fields: IndexMap<String, HostType>,
}

impl RecordDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, ty: HostType) -> Self {
        self.fields.insert(name.into(), ty);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDef {
    pub name: String,
    pub variants: Vec<String>,
}

impl EnumDef {
    pub fn new(name: impl Into<String>, variants: &[&str]) -> Self {
        Self {
            name: name.into(),
            variants: variants.iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// Split `a.b.Name` into (`Some("a.b")`, `"Name"`).
fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.rsplit_once('.') {
        Some((ns, simple)) => (Some(ns), simple),
        None => (None, name),
    }
}

/// In-memory [`TypeInfoProvider`].
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    records: HashMap<u64, RecordDef>,
    enums: HashMap<u64, EnumDef>,
    functions: HashMap<(u64, String), Arc<FunctionDef>>,
}

impl TypeCatalog {
    /// A catalog holding only the built-in functions.
    pub fn new() -> Self {
        let mut catalog = Self::default();
        for def in builtins() {
            catalog.insert_function(def.clone());
        }
        catalog
    }

    pub fn with_record(mut self, def: RecordDef) -> Self {
        self.insert_record(def);
        self
    }

    pub fn with_enum(mut self, def: EnumDef) -> Self {
        self.insert_enum(def);
        self
    }

    pub fn with_function(mut self, def: FunctionDef) -> Self {
        self.insert_function(Arc::new(def));
        self
    }

    pub fn insert_record(&mut self, def: RecordDef) {
        let key = self.describe(&HostType::Record(def.name.clone())).fingerprint();
        self.records.insert(key, def);
    }

    pub fn insert_enum(&mut self, def: EnumDef) {
        let key = self.describe(&HostType::Enum(def.name.clone())).fingerprint();
        self.enums.insert(key, def);
    }

    pub fn insert_function(&mut self, def: Arc<FunctionDef>) {
        let key = self.describe(&def.declaring).fingerprint();
        self.functions.insert((key, def.name.clone()), def);
    }

    pub fn record(&self, name: &str) -> Option<&RecordDef> {
        let key = self.describe(&HostType::record(name)).fingerprint();
        self.records.get(&key)
    }

    pub fn enumeration(&self, name: &str) -> Option<&EnumDef> {
        let key = self.describe(&HostType::enumeration(name)).fingerprint();
        self.enums.get(&key)
    }

    /// Registered record definitions, in no particular order.
    pub fn records(&self) -> impl Iterator<Item = &RecordDef> {
        self.records.values()
    }
}

impl TypeInfoProvider for TypeCatalog {
    fn describe(&self, ty: &HostType) -> TypeDescriptor {
        match ty {
            HostType::Unit => TypeDescriptor::unit(),
            HostType::Bool => TypeDescriptor::boolean(),
            HostType::Int => TypeDescriptor::int64(),
            HostType::Float => TypeDescriptor::double(),
            HostType::Str => TypeDescriptor::string(),
            HostType::Timestamp => TypeDescriptor::timestamp(),
            HostType::Record(name) => {
                let (ns, simple) = split_qualified(name);
                TypeDescriptor::new(ns, simple)
            }
            HostType::Enum(name) => {
                let (ns, simple) = split_qualified(name);
                TypeDescriptor::new(ns, simple).enumeration()
            }
            HostType::Seq(element) => TypeDescriptor::sequence(self.describe(element)),
            HostType::Option(inner) => self.describe(inner).nullable(),
            HostType::Group { key, element } => {
                TypeDescriptor::grouping(self.describe(key), self.describe(element))
            }
            HostType::Anonymous(members) => TypeDescriptor::anonymous(
                members
                    .iter()
                    .map(|(name, ty)| MemberDescriptor {
                        name: name.clone(),
                        ty: self.describe(ty),
                    })
                    .collect(),
            ),
            HostType::Dynamic => TypeDescriptor::dynamic(),
            HostType::Infer => TypeDescriptor::core("Infer"),
        }
    }

    fn resolve(&self, descriptor: &TypeDescriptor) -> Result<HostType> {
        if descriptor.is_nullable {
            return Ok(HostType::optional(self.resolve(&descriptor.non_nullable())?));
        }
        let generic = |i: usize| {
            descriptor
                .generic_args
                .get(i)
                .ok_or_else(|| Error::UnknownType(descriptor.to_string()))
                .and_then(|arg| self.resolve(arg))
        };
        let is_core = descriptor.namespace.as_deref() == Some(CORE_NAMESPACE);
        let core = match descriptor.name.as_str() {
            _ if !is_core => None,
            "Unit" => Some(HostType::Unit),
            "Boolean" => Some(HostType::Bool),
            "Int64" => Some(HostType::Int),
            "Double" => Some(HostType::Float),
            "String" => Some(HostType::Str),
            "DateTime" => Some(HostType::Timestamp),
            "Dynamic" => Some(HostType::Dynamic),
            "Sequence" => Some(HostType::seq(generic(0)?)),
            "Grouping" => Some(HostType::group(generic(0)?, generic(1)?)),
            "Anonymous" => Some(HostType::Anonymous(
                descriptor
                    .members
                    .iter()
                    .map(|m| Ok((m.name.clone(), self.resolve(&m.ty)?)))
                    .collect::<Result<_>>()?,
            )),
            _ => None,
        };
        if let Some(ty) = core {
            return Ok(ty);
        }

        let key = descriptor.fingerprint();
        if descriptor.is_enum {
            if let Some(def) = self.enums.get(&key) {
                return Ok(HostType::Enum(def.name.clone()));
            }
        } else if let Some(def) = self.records.get(&key) {
            return Ok(HostType::Record(def.name.clone()));
        }
        Err(Error::UnknownType(descriptor.to_string()))
    }

    fn member_type(&self, ty: &HostType, member: &str) -> Option<HostType> {
        match ty {
            HostType::Record(name) => self.record(name)?.fields.get(member).cloned(),
            HostType::Anonymous(members) => members
                .iter()
                .find(|(name, _)| name == member)
                .map(|(_, ty)| ty.clone()),
            HostType::Group { key, .. } if member == "Key" => Some((**key).clone()),
            HostType::Seq(_) | HostType::Group { .. } if member == "Count" => Some(HostType::Int),
            HostType::Str if member == "Length" => Some(HostType::Int),
            HostType::Timestamp if matches!(member, "Year" | "Month" | "Day") => {
                Some(HostType::Int)
            }
            HostType::Option(inner) => self.member_type(inner, member).map(HostType::optional),
            HostType::Dynamic => Some(HostType::Dynamic),
            _ => None,
        }
    }

    fn function(&self, declaring: &HostType, name: &str) -> Option<Arc<FunctionDef>> {
        let key = self.describe(declaring).fingerprint();
        self.functions.get(&(key, name.to_string())).cloned()
    }
}

fn expect_str<'a>(args: &'a [Value], i: usize, func: &str) -> Result<&'a str> {
    args.get(i)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::execution(format!("{} expects a string argument {}", func, i)))
}

fn expect_f64(args: &[Value], i: usize, func: &str) -> Result<f64> {
    args.get(i)
        .and_then(Value::as_f64)
        .ok_or_else(|| Error::execution(format!("{} expects a numeric argument {}", func, i)))
}

fn string_predicate(name: &'static str, test: fn(&str, &str) -> bool) -> FunctionDef {
    FunctionDef::native(HostType::Str, name, HostType::Bool, move |args| {
        Ok(Value::Bool(test(
            expect_str(args, 0, name)?,
            expect_str(args, 1, name)?,
        )))
    })
}

fn string_map(name: &'static str, map: fn(&str) -> String) -> FunctionDef {
    FunctionDef::native(HostType::Str, name, HostType::Str, move |args| {
        Ok(Value::Str(map(expect_str(args, 0, name)?)))
    })
}

/// Functions every catalog knows, in namespace `core`.
pub fn builtins() -> &'static [Arc<FunctionDef>] {
    static BUILTINS: OnceLock<Vec<Arc<FunctionDef>>> = OnceLock::new();
    BUILTINS.get_or_init(|| {
        vec![
            string_predicate("Contains", |s, sub| s.contains(sub)),
            string_predicate("StartsWith", |s, p| s.starts_with(p)),
            string_predicate("EndsWith", |s, p| s.ends_with(p)),
            string_map("ToUpper", str::to_uppercase),
            string_map("ToLower", str::to_lowercase),
            string_map("Trim", |s| s.trim().to_string()),
            FunctionDef::native(HostType::Int, "Abs", HostType::Int, |args| match args.first() {
                Some(Value::Int(i)) => i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| Error::execution("Abs overflow")),
                _ => Err(Error::execution("Abs expects an integer")),
            }),
            FunctionDef::native(HostType::Float, "Abs", HostType::Float, |args| {
                Ok(Value::Float(expect_f64(args, 0, "Abs")?.abs()))
            }),
            FunctionDef::native(HostType::Float, "Round", HostType::Float, |args| {
                Ok(Value::Float(expect_f64(args, 0, "Round")?.round()))
            }),
            FunctionDef::native(HostType::Float, "Floor", HostType::Float, |args| {
                Ok(Value::Float(expect_f64(args, 0, "Floor")?.floor()))
            }),
            FunctionDef::native(HostType::Timestamp, "AddDays", HostType::Timestamp, |args| {
                match (args.first(), args.get(1).and_then(Value::as_i64)) {
                    (Some(Value::Timestamp(t)), Some(days)) => Duration::try_days(days)
                        .and_then(|d| t.checked_add_signed(d))
                        .map(Value::Timestamp)
                        .ok_or_else(|| Error::execution("AddDays out of range")),
                    _ => Err(Error::execution("AddDays expects (timestamp, int)")),
                }
            }),
        ]
        .into_iter()
        .map(Arc::new)
        .collect()
    })
}

/// Look up a built-in by declaring type and name.
pub fn builtin(declaring: &HostType, name: &str) -> Option<Arc<FunctionDef>> {
    builtins()
        .iter()
        .find(|def| &def.declaring == declaring && def.name == name)
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn catalog() -> TypeCatalog {
        TypeCatalog::new()
            .with_record(
                RecordDef::new("shop.Person")
                    .field("Name", HostType::Str)
                    .field("Age", HostType::Int)
                    .field("Parent", HostType::optional(HostType::record("shop.Person"))),
            )
            .with_enum(EnumDef::new("shop.Color", &["Red", "Green"]))
    }

    #[test]
    fn test_describe_resolve_round_trip() {
        let catalog = catalog();
        let types = vec![
            HostType::seq(HostType::record("shop.Person")),
            HostType::optional(HostType::Int),
            HostType::group(HostType::Str, HostType::record("shop.Person")),
            HostType::Anonymous(vec![
                ("n".to_string(), HostType::Str),
                ("c".to_string(), HostType::enumeration("shop.Color")),
            ]),
        ];
        for ty in types {
            let descriptor = catalog.describe(&ty);
            assert_eq!(catalog.resolve(&descriptor).unwrap(), ty);
        }
    }

    #[test]
    fn test_resolve_unknown_type() {
        let descriptor = TypeDescriptor::new(Some("shop"), "Order");
        assert!(matches!(
            catalog().resolve(&descriptor),
            Err(Error::UnknownType(_))
        ));
    }

    #[test]
    fn test_member_type_through_option() {
        let catalog = catalog();
        let person = HostType::record("shop.Person");
        assert_eq!(
            catalog.member_type(&person, "Parent"),
            Some(HostType::optional(person.clone()))
        );
        assert_eq!(
            catalog.member_type(&HostType::optional(person.clone()), "Name"),
            Some(HostType::optional(HostType::Str))
        );
        assert_eq!(catalog.member_type(&person, "Missing"), None);
    }

    #[test]
    fn test_builtin_lookup() {
        let catalog = catalog();
        let contains = catalog.function(&HostType::Str, "Contains").unwrap();
        let body = contains.body.clone().unwrap();
        assert_eq!(
            body(&[Value::from("hello"), Value::from("ell")]).unwrap(),
            Value::Bool(true)
        );
        assert!(builtin(&HostType::Str, "Nope").is_none());
    }
}
