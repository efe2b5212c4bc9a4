//! Host query-builder model.
//!
//! [`HostExpr`] is the locally-bound, executable form of a query: it can hold
//! captured closure values and native function bodies, neither of which can
//! cross a process boundary. The translator turns it into a portable
//! [`crate::ast::Expr`], and the executor turns a portable tree back into one.

pub mod builder;

use std::fmt;
use std::sync::Arc;

use crate::ast::{AggregateFunc, BinaryOp, UnaryOp};
use crate::error::Result;
use crate::value::Value;

pub use self::builder::{Queryable, captured, constant, lambda, lambda2, lit, param, source, typed_lambda};

static DYNAMIC: HostType = HostType::Dynamic;

/// Static type of a host expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostType {
    Unit,
    Bool,
    Int,
    Float,
    Str,
    Timestamp,
    /// A catalog record, by qualified name (`shop.Person`).
    Record(String),
    /// A catalog enum, by qualified name.
    Enum(String),
    Seq(Box<HostType>),
    Option(Box<HostType>),
    /// Result element of a group-by: a key plus the grouped elements.
    Group {
        key: Box<HostType>,
        element: Box<HostType>,
    },
    /// Projection type with named members in declaration order.
    Anonymous(Vec<(String, HostType)>),
    /// Untyped records; member access yields `Dynamic`.
    Dynamic,
    /// Not yet known; lambda parameters bound by their query operator.
    Infer,
}

impl HostType {
    pub fn record(name: impl Into<String>) -> Self {
        HostType::Record(name.into())
    }

    pub fn enumeration(name: impl Into<String>) -> Self {
        HostType::Enum(name.into())
    }

    pub fn seq(element: HostType) -> Self {
        HostType::Seq(Box::new(element))
    }

    /// Wrap in `Option` unless already optional.
    pub fn optional(inner: HostType) -> Self {
        match inner {
            HostType::Option(_) => inner,
            other => HostType::Option(Box::new(other)),
        }
    }

    pub fn group(key: HostType, element: HostType) -> Self {
        HostType::Group {
            key: Box::new(key),
            element: Box::new(element),
        }
    }

    /// Element type when this type can be enumerated.
    pub fn element(&self) -> Option<&HostType> {
        match self {
            HostType::Seq(inner) => Some(inner),
            HostType::Group { element, .. } => Some(element),
            HostType::Option(inner) => inner.element(),
            HostType::Dynamic => Some(&DYNAMIC),
            _ => None,
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, HostType::Seq(_) | HostType::Group { .. })
    }

    /// The type without an `Option` wrapper.
    pub fn unwrap_optional(&self) -> &HostType {
        match self {
            HostType::Option(inner) => inner,
            other => other,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.unwrap_optional(), HostType::Int | HostType::Float)
    }

    /// Whether the type still contains an unresolved `Infer`.
    pub fn is_inferred(&self) -> bool {
        match self {
            HostType::Infer => false,
            HostType::Seq(inner) | HostType::Option(inner) => inner.is_inferred(),
            HostType::Group { key, element } => key.is_inferred() && element.is_inferred(),
            HostType::Anonymous(members) => members.iter().all(|(_, t)| t.is_inferred()),
            _ => true,
        }
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostType::Unit => write!(f, "()"),
            HostType::Bool => write!(f, "bool"),
            HostType::Int => write!(f, "i64"),
            HostType::Float => write!(f, "f64"),
            HostType::Str => write!(f, "String"),
            HostType::Timestamp => write!(f, "DateTime"),
            HostType::Record(name) | HostType::Enum(name) => write!(f, "{}", name),
            HostType::Seq(inner) => write!(f, "Seq<{}>", inner),
            HostType::Option(inner) => write!(f, "Option<{}>", inner),
            HostType::Group { key, element } => write!(f, "Group<{}, {}>", key, element),
            HostType::Anonymous(members) => {
                write!(f, "{{ ")?;
                for (i, (name, ty)) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, ty)?;
                }
                write!(f, " }}")
            }
            HostType::Dynamic => write!(f, "dynamic"),
            HostType::Infer => write!(f, "_"),
        }
    }
}

/// Native implementation of a function.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// A non-query function that may appear in an expression.
///
/// Functions without a body can only run on the remote side; the executor
/// re-binds them by `(declaring, name)` through its catalog.
#[derive(Clone)]
pub struct FunctionDef {
    pub declaring: HostType,
    pub name: String,
    pub returns: HostType,
    pub body: Option<NativeFn>,
}

impl FunctionDef {
    pub fn native<F>(declaring: HostType, name: &str, returns: HostType, body: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            declaring,
            name: name.to_string(),
            returns,
            body: Some(Arc::new(body)),
        }
    }

    /// A function known only by signature.
    pub fn remote(declaring: HostType, name: &str, returns: HostType) -> Self {
        Self {
            declaring,
            name: name.to_string(),
            returns,
            body: None,
        }
    }
}

impl fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDef")
            .field("declaring", &self.declaring)
            .field("name", &self.name)
            .field("returns", &self.returns)
            .field("native", &self.body.is_some())
            .finish()
    }
}

/// Recognized query operators. The first argument of a call is always the
/// source query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMethod {
    Where,
    Select,
    SelectMany,
    OrderBy,
    OrderByDescending,
    ThenBy,
    ThenByDescending,
    Skip,
    Take,
    GroupBy,
    Join,
    Include,
    ThenInclude,
    Aggregate(AggregateFunc),
}

impl QueryMethod {
    pub fn name(&self) -> &'static str {
        match self {
            QueryMethod::Where => "Where",
            QueryMethod::Select => "Select",
            QueryMethod::SelectMany => "SelectMany",
            QueryMethod::OrderBy => "OrderBy",
            QueryMethod::OrderByDescending => "OrderByDescending",
            QueryMethod::ThenBy => "ThenBy",
            QueryMethod::ThenByDescending => "ThenByDescending",
            QueryMethod::Skip => "Skip",
            QueryMethod::Take => "Take",
            QueryMethod::GroupBy => "GroupBy",
            QueryMethod::Join => "Join",
            QueryMethod::Include => "Include",
            QueryMethod::ThenInclude => "ThenInclude",
            QueryMethod::Aggregate(func) => func.name(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum HostMethod {
    Query(QueryMethod),
    Function(Arc<FunctionDef>),
}

impl HostMethod {
    pub fn name(&self) -> &str {
        match self {
            HostMethod::Query(m) => m.name(),
            HostMethod::Function(def) => &def.name,
        }
    }
}

/// A value captured from the caller's environment, read when the
/// expression is evaluated locally.
#[derive(Clone)]
pub struct Captured {
    pub name: String,
    pub ty: HostType,
    read: Arc<dyn Fn() -> Value + Send + Sync>,
}

impl Captured {
    pub fn new<F>(name: impl Into<String>, ty: HostType, read: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            ty,
            read: Arc::new(read),
        }
    }

    pub fn read(&self) -> Value {
        (self.read)()
    }
}

impl fmt::Debug for Captured {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Captured({}: {})", self.name, self.ty)
    }
}

/// A host expression node.
#[derive(Debug, Clone)]
pub enum HostExpr {
    Constant {
        value: Value,
        ty: HostType,
    },
    Captured(Captured),
    /// The queryable resource of the given element type.
    Source(HostType),
    Parameter {
        name: String,
        ty: HostType,
    },
    Member {
        target: Box<HostExpr>,
        member: String,
    },
    Unary {
        op: UnaryOp,
        operand: Box<HostExpr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<HostExpr>,
        right: Box<HostExpr>,
    },
    Conditional {
        test: Box<HostExpr>,
        if_true: Box<HostExpr>,
        if_false: Box<HostExpr>,
    },
    Lambda {
        params: Vec<(String, HostType)>,
        body: Box<HostExpr>,
    },
    Call {
        method: HostMethod,
        args: Vec<HostExpr>,
    },
    New {
        members: Vec<(String, HostExpr)>,
    },
    NewArray {
        element: HostType,
        items: Vec<HostExpr>,
    },
    ListInit {
        element: HostType,
        items: Vec<HostExpr>,
    },
    MemberInit {
        ty: HostType,
        bindings: Vec<(String, HostExpr)>,
    },
}

impl HostExpr {
    /// Direct children in evaluation order.
    pub fn children(&self) -> Vec<&HostExpr> {
        match self {
            HostExpr::Constant { .. }
            | HostExpr::Captured(_)
            | HostExpr::Source(_)
            | HostExpr::Parameter { .. } => vec![],
            HostExpr::Member { target, .. } => vec![target],
            HostExpr::Unary { operand, .. } => vec![operand],
            HostExpr::Binary { left, right, .. } => vec![left, right],
            HostExpr::Conditional {
                test,
                if_true,
                if_false,
            } => vec![test, if_true, if_false],
            HostExpr::Lambda { body, .. } => vec![body],
            HostExpr::Call { args, .. } => args.iter().collect(),
            HostExpr::NewArray { items, .. } | HostExpr::ListInit { items, .. } => {
                items.iter().collect()
            }
            HostExpr::New { members } | HostExpr::MemberInit {
                bindings: members, ..
            } => members.iter().map(|(_, e)| e).collect(),
        }
    }

    /// Rebuild this node with every direct child replaced by `f(child)`.
    pub fn try_map_children<F>(&self, mut f: F) -> Result<HostExpr>
    where
        F: FnMut(&HostExpr) -> Result<HostExpr>,
    {
        let mut b = |e: &HostExpr| f(e).map(Box::new);
        Ok(match self {
            HostExpr::Constant { .. }
            | HostExpr::Captured(_)
            | HostExpr::Source(_)
            | HostExpr::Parameter { .. } => self.clone(),
            HostExpr::Member { target, member } => HostExpr::Member {
                target: b(target)?,
                member: member.clone(),
            },
            HostExpr::Unary { op, operand } => HostExpr::Unary {
                op: *op,
                operand: b(operand)?,
            },
            HostExpr::Binary { op, left, right } => HostExpr::Binary {
                op: *op,
                left: b(left)?,
                right: b(right)?,
            },
            HostExpr::Conditional {
                test,
                if_true,
                if_false,
            } => HostExpr::Conditional {
                test: b(test)?,
                if_true: b(if_true)?,
                if_false: b(if_false)?,
            },
            HostExpr::Lambda { params, body } => HostExpr::Lambda {
                params: params.clone(),
                body: b(body)?,
            },
            HostExpr::Call { method, args } => HostExpr::Call {
                method: method.clone(),
                args: args
                    .iter()
                    .map(|a| b(a).map(|x| *x))
                    .collect::<Result<_>>()?,
            },
            HostExpr::New { members } => HostExpr::New {
                members: members
                    .iter()
                    .map(|(n, e)| b(e).map(|x| (n.clone(), *x)))
                    .collect::<Result<_>>()?,
            },
            HostExpr::NewArray { element, items } => HostExpr::NewArray {
                element: element.clone(),
                items: items
                    .iter()
                    .map(|a| b(a).map(|x| *x))
                    .collect::<Result<_>>()?,
            },
            HostExpr::ListInit { element, items } => HostExpr::ListInit {
                element: element.clone(),
                items: items
                    .iter()
                    .map(|a| b(a).map(|x| *x))
                    .collect::<Result<_>>()?,
            },
            HostExpr::MemberInit { ty, bindings } => HostExpr::MemberInit {
                ty: ty.clone(),
                bindings: bindings
                    .iter()
                    .map(|(n, e)| b(e).map(|x| (n.clone(), *x)))
                    .collect::<Result<_>>()?,
            },
        })
    }

    /// The recognized query operator, if this node is one.
    pub fn query_method(&self) -> Option<QueryMethod> {
        match self {
            HostExpr::Call {
                method: HostMethod::Query(m),
                ..
            } => Some(*m),
            _ => None,
        }
    }
}

impl fmt::Display for HostExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostExpr::Constant { value, .. } => write!(f, "{}", value),
            HostExpr::Captured(c) => write!(f, "<{}>", c.name),
            HostExpr::Source(ty) => write!(f, "Source<{}>", ty),
            HostExpr::Parameter { name, .. } => write!(f, "{}", name),
            HostExpr::Member { target, member } => write!(f, "{}.{}", target, member),
            HostExpr::Unary { op, operand } => write!(f, "{}{}", op, operand),
            HostExpr::Binary { op, left, right } => write!(f, "({} {} {})", left, op, right),
            HostExpr::Conditional {
                test,
                if_true,
                if_false,
            } => write!(f, "({} ? {} : {})", test, if_true, if_false),
            HostExpr::Lambda { params, body } => {
                let names: Vec<&str> = params.iter().map(|(n, _)| n.as_str()).collect();
                if names.len() == 1 {
                    write!(f, "{} => {}", names[0], body)
                } else {
                    write!(f, "({}) => {}", names.join(", "), body)
                }
            }
            HostExpr::Call { method, args } => {
                let rest: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                match method {
                    HostMethod::Query(m) => match rest.split_first() {
                        Some((source, rest)) => {
                            write!(f, "{}.{}({})", source, m.name(), rest.join(", "))
                        }
                        None => write!(f, "{}()", m.name()),
                    },
                    HostMethod::Function(def) => {
                        write!(f, "{}.{}({})", def.declaring, def.name, rest.join(", "))
                    }
                }
            }
            HostExpr::New { members } | HostExpr::MemberInit {
                bindings: members, ..
            } => {
                let parts: Vec<String> =
                    members.iter().map(|(n, e)| format!("{} = {}", n, e)).collect();
                match self {
                    HostExpr::MemberInit { ty, .. } => write!(f, "new {} {{ {} }}", ty, parts.join(", ")),
                    _ => write!(f, "new {{ {} }}", parts.join(", ")),
                }
            }
            HostExpr::NewArray { element, items } | HostExpr::ListInit { element, items } => {
                let parts: Vec<String> = items.iter().map(|a| a.to_string()).collect();
                write!(f, "new {}[] {{ {} }}", element, parts.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_types() {
        let group = HostType::group(HostType::Str, HostType::record("shop.Person"));
        assert_eq!(group.element(), Some(&HostType::record("shop.Person")));
        assert_eq!(HostType::seq(HostType::Int).element(), Some(&HostType::Int));
        assert_eq!(HostType::Int.element(), None);
    }

    #[test]
    fn test_optional_does_not_nest() {
        let once = HostType::optional(HostType::Int);
        assert_eq!(HostType::optional(once.clone()), once);
    }

    #[test]
    fn test_inferred() {
        assert!(HostType::seq(HostType::Int).is_inferred());
        assert!(!HostType::seq(HostType::Infer).is_inferred());
    }

    #[test]
    fn test_captured_reads_current_value() {
        let cell = Arc::new(std::sync::atomic::AtomicI64::new(1));
        let reader = cell.clone();
        let c = Captured::new("limit", HostType::Int, move || {
            Value::Int(reader.load(std::sync::atomic::Ordering::SeqCst))
        });
        cell.store(7, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(c.read(), Value::Int(7));
    }
}
