//! Portable type descriptors.
//!
//! A [`TypeDescriptor`] stands in for a native type handle so that an AST can
//! cross a serialization boundary. Descriptors render to a compact text form
//! and parse back from it:
//!
//! ```text
//! enum shop.Color?                    nullable enum
//! core.Sequence<shop.Person>[]        collection with one generic argument
//! core.Anonymous{name: core.String}   projection type with members
//! ```

use nom::{
    IResult,
    bytes::complete::{tag, take_while1},
    character::complete::{char, multispace0},
    combinator::{map, opt},
    multi::separated_list1,
    sequence::{delimited, preceded, separated_pair, tuple},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Namespace of the built-in types.
pub const CORE_NAMESPACE: &str = "core";

/// A language-neutral description of a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub generic_args: Vec<TypeDescriptor>,
    #[serde(default)]
    pub is_collection: bool,
    #[serde(default)]
    pub is_enum: bool,
    #[serde(default)]
    pub is_nullable: bool,
    /// Members of anonymous projection types, in declaration order.
    #[serde(default)]
    pub members: Vec<MemberDescriptor>,
}

/// A named member of an anonymous type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberDescriptor {
    pub name: String,
    pub ty: TypeDescriptor,
}

impl TypeDescriptor {
    /// Create a plain descriptor.
    pub fn new(namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.map(str::to_string),
            generic_args: vec![],
            is_collection: false,
            is_enum: false,
            is_nullable: false,
            members: vec![],
        }
    }

    /// A built-in type in the `core` namespace.
    pub fn core(name: &str) -> Self {
        Self::new(Some(CORE_NAMESPACE), name)
    }

    pub fn boolean() -> Self {
        Self::core("Boolean")
    }

    pub fn int64() -> Self {
        Self::core("Int64")
    }

    pub fn double() -> Self {
        Self::core("Double")
    }

    pub fn string() -> Self {
        Self::core("String")
    }

    pub fn timestamp() -> Self {
        Self::core("DateTime")
    }

    pub fn unit() -> Self {
        Self::core("Unit")
    }

    pub fn dynamic() -> Self {
        Self::core("Dynamic")
    }

    /// `core.Sequence<element>[]`
    pub fn sequence(element: TypeDescriptor) -> Self {
        Self::core("Sequence").with_generics(vec![element]).collection()
    }

    /// `core.Grouping<key, element>[]`
    pub fn grouping(key: TypeDescriptor, element: TypeDescriptor) -> Self {
        Self::core("Grouping")
            .with_generics(vec![key, element])
            .collection()
    }

    /// `core.Anonymous{...}`
    pub fn anonymous(members: Vec<MemberDescriptor>) -> Self {
        let mut ty = Self::core("Anonymous");
        ty.members = members;
        ty
    }

    pub fn with_generics(mut self, args: Vec<TypeDescriptor>) -> Self {
        self.generic_args = args;
        self
    }

    pub fn collection(mut self) -> Self {
        self.is_collection = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.is_nullable = true;
        self
    }

    pub fn enumeration(mut self) -> Self {
        self.is_enum = true;
        self
    }

    /// Same descriptor without the nullable wrapper.
    pub fn non_nullable(&self) -> Self {
        let mut ty = self.clone();
        ty.is_nullable = false;
        ty
    }

    /// Element type of a collection descriptor.
    ///
    /// Groupings enumerate their elements, so the second generic argument
    /// is returned for them.
    pub fn element(&self) -> Option<&TypeDescriptor> {
        if !self.is_collection {
            return None;
        }
        self.generic_args.last()
    }

    pub fn is_core(&self, name: &str) -> bool {
        self.namespace.as_deref() == Some(CORE_NAMESPACE) && self.name == name
    }

    /// `namespace.Name`, or just `Name` without namespace.
    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(ns) if !ns.is_empty() => format!("{}.{}", ns, self.name),
            _ => self.name.clone(),
        }
    }

    /// Stable 64-bit fingerprint (FNV-1a over the canonical text form).
    pub fn fingerprint(&self) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;
        self.to_string()
            .bytes()
            .fold(OFFSET, |hash, b| (hash ^ b as u64).wrapping_mul(PRIME))
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_enum {
            write!(f, "enum ")?;
        }
        write!(f, "{}", self.qualified_name())?;
        if !self.generic_args.is_empty() {
            write!(f, "<")?;
            for (i, arg) in self.generic_args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", arg)?;
            }
            write!(f, ">")?;
        }
        if !self.members.is_empty() {
            write!(f, "{{")?;
            for (i, m) in self.members.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {}", m.name, m.ty)?;
            }
            write!(f, "}}")?;
        }
        if self.is_collection {
            write!(f, "[]")?;
        }
        if self.is_nullable {
            write!(f, "?")?;
        }
        Ok(())
    }
}

impl FromStr for TypeDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let input = s.trim();
        match parse_descriptor(input) {
            Ok(("", ty)) => Ok(ty),
            Ok((rest, _)) => Err(Error::UnknownType(format!(
                "unexpected trailing content '{}' in '{}'",
                rest, input
            ))),
            Err(e) => Err(Error::UnknownType(format!("cannot parse '{}': {:?}", input, e))),
        }
    }
}

fn parse_identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

fn parse_descriptor(input: &str) -> IResult<&str, TypeDescriptor> {
    let (input, is_enum) = map(opt(tag("enum ")), |e| e.is_some())(input)?;
    let (input, _) = multispace0(input)?;
    let (input, path) = separated_list1(char('.'), parse_identifier)(input)?;
    let (input, generic_args) = opt(delimited(
        char('<'),
        separated_list1(
            tuple((multispace0, char(','), multispace0)),
            parse_descriptor,
        ),
        char('>'),
    ))(input)?;
    let (input, members) = opt(delimited(
        char('{'),
        separated_list1(
            tuple((multispace0, char(','), multispace0)),
            parse_member,
        ),
        char('}'),
    ))(input)?;
    let (input, is_collection) = map(opt(tag("[]")), |c| c.is_some())(input)?;
    let (input, is_nullable) = map(opt(char('?')), |n| n.is_some())(input)?;

    let mut path = path;
    let name = path.pop().unwrap_or_default();
    let namespace = (!path.is_empty()).then(|| path.join("."));

    Ok((
        input,
        TypeDescriptor {
            name: name.to_string(),
            namespace,
            generic_args: generic_args.unwrap_or_default(),
            is_collection,
            is_enum,
            is_nullable,
            members: members.unwrap_or_default(),
        },
    ))
}

fn parse_member(input: &str) -> IResult<&str, MemberDescriptor> {
    map(
        separated_pair(
            preceded(multispace0, parse_identifier),
            tuple((multispace0, char(':'), multispace0)),
            parse_descriptor,
        ),
        |(name, ty)| MemberDescriptor {
            name: name.to_string(),
            ty,
        },
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_display_sequence() {
        let person = TypeDescriptor::new(Some("shop"), "Person");
        let seq = TypeDescriptor::sequence(person);
        assert_eq!(seq.to_string(), "core.Sequence<shop.Person>[]");
        assert_eq!(seq.element().map(|e| e.name.as_str()), Some("Person"));
    }

    #[test]
    fn test_parse_round_trip() {
        let ty = TypeDescriptor::anonymous(vec![
            MemberDescriptor {
                name: "name".to_string(),
                ty: TypeDescriptor::string(),
            },
            MemberDescriptor {
                name: "color".to_string(),
                ty: TypeDescriptor::new(Some("shop"), "Color").enumeration().nullable(),
            },
        ]);
        let text = ty.to_string();
        assert_eq!(text, "core.Anonymous{name: core.String, color: enum shop.Color?}");
        assert_eq!(text.parse::<TypeDescriptor>().unwrap(), ty);
    }

    #[test]
    fn test_parse_nested_namespace() {
        let ty: TypeDescriptor = "acme.sales.Order".parse().unwrap();
        assert_eq!(ty.namespace.as_deref(), Some("acme.sales"));
        assert_eq!(ty.name, "Order");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("core.Sequence<".parse::<TypeDescriptor>().is_err());
        assert!("".parse::<TypeDescriptor>().is_err());
    }

    #[test]
    fn test_equality_and_fingerprint() {
        let a = TypeDescriptor::sequence(TypeDescriptor::int64());
        let b = TypeDescriptor::sequence(TypeDescriptor::int64());
        let c = TypeDescriptor::sequence(TypeDescriptor::int64()).nullable();
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a, c);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
