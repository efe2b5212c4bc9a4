//! Portable query AST.
//!
//! The tree is plain data: every node carries the [`TypeDescriptor`] of the
//! value it produces, nodes compare structurally, and transformations such as
//! [`Expr::rewrite`] build new trees instead of editing in place.

pub mod display;
pub mod operators;
pub mod query_op;
pub mod types;

use serde::{Deserialize, Serialize};

use crate::value::Value;

pub use self::operators::{BinaryOp, UnaryOp};
pub use self::query_op::{AggregateFunc, QueryOp, SortDirection};
pub use self::types::{CORE_NAMESPACE, MemberDescriptor, TypeDescriptor};

/// A lambda parameter, or a reference to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterExpr {
    pub name: String,
    pub ty: TypeDescriptor,
}

/// `member = value` inside a [`Expr::MemberInit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberBinding {
    pub member: String,
    pub value: Expr,
}

/// A portable expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Constant {
        value: Value,
        ty: TypeDescriptor,
    },
    /// `target.member`, carrying the declaring type so the receiver can
    /// re-bind it without the caller's type library.
    Member {
        target: Box<Expr>,
        declaring: TypeDescriptor,
        member: String,
        ty: TypeDescriptor,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        ty: TypeDescriptor,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        ty: TypeDescriptor,
    },
    /// `test ? if_true : if_false`
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
        ty: TypeDescriptor,
    },
    /// `ty` is the type of the body.
    Lambda {
        params: Vec<ParameterExpr>,
        body: Box<Expr>,
        ty: TypeDescriptor,
    },
    Parameter(ParameterExpr),
    /// A call to a non-query function, e.g. `core.String.Contains`.
    MethodCall {
        declaring: TypeDescriptor,
        method: String,
        args: Vec<Expr>,
        ty: TypeDescriptor,
    },
    /// Anonymous object construction: `new { a = x, b = y }`.
    New {
        members: Vec<String>,
        args: Vec<Expr>,
        ty: TypeDescriptor,
    },
    NewArray {
        items: Vec<Expr>,
        ty: TypeDescriptor,
    },
    ListInit {
        items: Vec<Expr>,
        ty: TypeDescriptor,
    },
    /// Named record construction: `new ns.T { a = x }`.
    MemberInit {
        bindings: Vec<MemberBinding>,
        ty: TypeDescriptor,
    },
    /// One key of a [`QueryOp::Sort`].
    SortKey {
        key: Box<Expr>,
        direction: SortDirection,
    },
    Query {
        op: QueryOp,
        ty: TypeDescriptor,
    },
}

impl Expr {
    pub fn constant(value: impl Into<Value>, ty: TypeDescriptor) -> Self {
        Expr::Constant {
            value: value.into(),
            ty,
        }
    }

    pub fn parameter(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Expr::Parameter(ParameterExpr {
            name: name.into(),
            ty,
        })
    }

    pub fn sort_key(key: Expr, direction: SortDirection) -> Self {
        Expr::SortKey {
            key: Box::new(key),
            direction,
        }
    }

    pub fn query(op: QueryOp, ty: TypeDescriptor) -> Self {
        Expr::Query { op, ty }
    }

    /// Static type of the value this node produces.
    pub fn ty(&self) -> &TypeDescriptor {
        match self {
            Expr::Constant { ty, .. }
            | Expr::Member { ty, .. }
            | Expr::Unary { ty, .. }
            | Expr::Binary { ty, .. }
            | Expr::Conditional { ty, .. }
            | Expr::Lambda { ty, .. }
            | Expr::MethodCall { ty, .. }
            | Expr::New { ty, .. }
            | Expr::NewArray { ty, .. }
            | Expr::ListInit { ty, .. }
            | Expr::MemberInit { ty, .. }
            | Expr::Query { ty, .. } => ty,
            Expr::Parameter(p) => &p.ty,
            Expr::SortKey { key, .. } => key.ty(),
        }
    }

    pub fn is_query(&self) -> bool {
        matches!(self, Expr::Query { .. })
    }

    /// Direct children in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Constant { .. } | Expr::Parameter(_) => vec![],
            Expr::Member { target, .. } => vec![target],
            Expr::Unary { operand, .. } => vec![operand],
            Expr::Binary { left, right, .. } => vec![left, right],
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => vec![test, if_true, if_false],
            Expr::Lambda { body, .. } => vec![body],
            Expr::MethodCall { args, .. } | Expr::New { args, .. } => args.iter().collect(),
            Expr::NewArray { items, .. } | Expr::ListInit { items, .. } => items.iter().collect(),
            Expr::MemberInit { bindings, .. } => bindings.iter().map(|b| &b.value).collect(),
            Expr::SortKey { key, .. } => vec![key],
            Expr::Query { op, .. } => match op {
                QueryOp::Source { .. } => vec![],
                QueryOp::Filter { source, predicate } => vec![source, predicate],
                QueryOp::Project {
                    source, selector, ..
                } => vec![source, selector],
                QueryOp::Sort { source, keys } => {
                    let mut out: Vec<&Expr> = vec![source];
                    out.extend(keys.iter());
                    out
                }
                QueryOp::Skip { source, .. }
                | QueryOp::Take { source, .. }
                | QueryOp::Include { source, .. } => vec![source],
                QueryOp::GroupBy {
                    source,
                    key,
                    element,
                } => {
                    let mut out: Vec<&Expr> = vec![source, key];
                    out.extend(element.as_deref());
                    out
                }
                QueryOp::Join {
                    outer,
                    inner,
                    outer_key,
                    inner_key,
                    result,
                } => vec![outer, inner, outer_key, inner_key, result],
                QueryOp::Aggregate {
                    source, argument, ..
                } => {
                    let mut out: Vec<&Expr> = vec![source];
                    out.extend(argument.as_deref());
                    out
                }
            },
        }
    }

    /// Rebuild this node with every direct child replaced by `f(child)`.
    pub fn map_children<F>(&self, mut f: F) -> Expr
    where
        F: FnMut(&Expr) -> Expr,
    {
        let mut b = |e: &Expr| Box::new(f(e));
        match self {
            Expr::Constant { .. } | Expr::Parameter(_) => self.clone(),
            Expr::Member {
                target,
                declaring,
                member,
                ty,
            } => Expr::Member {
                target: b(target),
                declaring: declaring.clone(),
                member: member.clone(),
                ty: ty.clone(),
            },
            Expr::Unary { op, operand, ty } => Expr::Unary {
                op: *op,
                operand: b(operand),
                ty: ty.clone(),
            },
            Expr::Binary {
                op,
                left,
                right,
                ty,
            } => Expr::Binary {
                op: *op,
                left: b(left),
                right: b(right),
                ty: ty.clone(),
            },
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ty,
            } => Expr::Conditional {
                test: b(test),
                if_true: b(if_true),
                if_false: b(if_false),
                ty: ty.clone(),
            },
            Expr::Lambda { params, body, ty } => Expr::Lambda {
                params: params.clone(),
                body: b(body),
                ty: ty.clone(),
            },
            Expr::MethodCall {
                declaring,
                method,
                args,
                ty,
            } => Expr::MethodCall {
                declaring: declaring.clone(),
                method: method.clone(),
                args: args.iter().map(|a| *b(a)).collect(),
                ty: ty.clone(),
            },
            Expr::New { members, args, ty } => Expr::New {
                members: members.clone(),
                args: args.iter().map(|a| *b(a)).collect(),
                ty: ty.clone(),
            },
            Expr::NewArray { items, ty } => Expr::NewArray {
                items: items.iter().map(|a| *b(a)).collect(),
                ty: ty.clone(),
            },
            Expr::ListInit { items, ty } => Expr::ListInit {
                items: items.iter().map(|a| *b(a)).collect(),
                ty: ty.clone(),
            },
            Expr::MemberInit { bindings, ty } => Expr::MemberInit {
                bindings: bindings
                    .iter()
                    .map(|mb| MemberBinding {
                        member: mb.member.clone(),
                        value: *b(&mb.value),
                    })
                    .collect(),
                ty: ty.clone(),
            },
            Expr::SortKey { key, direction } => Expr::SortKey {
                key: b(key),
                direction: *direction,
            },
            Expr::Query { op, ty } => {
                let op = match op {
                    QueryOp::Source { .. } => op.clone(),
                    QueryOp::Filter { source, predicate } => QueryOp::Filter {
                        source: b(source),
                        predicate: b(predicate),
                    },
                    QueryOp::Project {
                        source,
                        selector,
                        many,
                    } => QueryOp::Project {
                        source: b(source),
                        selector: b(selector),
                        many: *many,
                    },
                    QueryOp::Sort { source, keys } => QueryOp::Sort {
                        source: b(source),
                        keys: keys.iter().map(|k| *b(k)).collect(),
                    },
                    QueryOp::Skip { source, count } => QueryOp::Skip {
                        source: b(source),
                        count: *count,
                    },
                    QueryOp::Take { source, count } => QueryOp::Take {
                        source: b(source),
                        count: *count,
                    },
                    QueryOp::GroupBy {
                        source,
                        key,
                        element,
                    } => QueryOp::GroupBy {
                        source: b(source),
                        key: b(key),
                        element: element.as_deref().map(&mut b),
                    },
                    QueryOp::Join {
                        outer,
                        inner,
                        outer_key,
                        inner_key,
                        result,
                    } => QueryOp::Join {
                        outer: b(outer),
                        inner: b(inner),
                        outer_key: b(outer_key),
                        inner_key: b(inner_key),
                        result: b(result),
                    },
                    QueryOp::Include { source, path } => QueryOp::Include {
                        source: b(source),
                        path: path.clone(),
                    },
                    QueryOp::Aggregate {
                        source,
                        func,
                        argument,
                    } => QueryOp::Aggregate {
                        source: b(source),
                        func: *func,
                        argument: argument.as_deref().map(&mut b),
                    },
                };
                Expr::Query { op, ty: ty.clone() }
            }
        }
    }

    /// Bottom-up rewrite: children are rewritten first, then `f` is applied
    /// to the rebuilt node. The receiver is left untouched.
    pub fn rewrite<F>(&self, f: &mut F) -> Expr
    where
        F: FnMut(Expr) -> Expr,
    {
        let rebuilt = self.map_children(|child| child.rewrite(f));
        f(rebuilt)
    }

    /// Visit every node, parents before children.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    /// Include paths in the order the includes were applied.
    pub fn include_paths(&self) -> Vec<String> {
        fn collect(expr: &Expr, out: &mut Vec<String>) {
            for child in expr.children() {
                collect(child, out);
            }
            if let Expr::Query {
                op: QueryOp::Include { path, .. },
                ..
            } = expr
            {
                out.push(path.clone());
            }
        }
        let mut out = Vec::new();
        collect(self, &mut out);
        out
    }

    /// Element type of the innermost query source, if the tree has one.
    pub fn root_element(&self) -> Option<&TypeDescriptor> {
        match self {
            Expr::Query {
                op: QueryOp::Source { element },
                ..
            } => Some(element),
            Expr::Query { op, .. } => op.source().and_then(Expr::root_element),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn person() -> TypeDescriptor {
        TypeDescriptor::new(Some("shop"), "Person")
    }

    fn source() -> Expr {
        Expr::query(
            QueryOp::Source { element: person() },
            TypeDescriptor::sequence(person()),
        )
    }

    fn include(source: Expr, path: &str) -> Expr {
        Expr::query(
            QueryOp::Include {
                source: Box::new(source),
                path: path.to_string(),
            },
            TypeDescriptor::sequence(person()),
        )
    }

    #[test]
    fn test_include_paths_in_call_order() {
        let expr = include(include(source(), "A.B"), "A.C");
        assert_eq!(expr.include_paths(), vec!["A.B".to_string(), "A.C".to_string()]);
        assert_eq!(expr.root_element(), Some(&person()));
    }

    #[test]
    fn test_rewrite_builds_new_tree() {
        let original = Expr::Binary {
            op: BinaryOp::Add,
            left: Box::new(Expr::constant(1, TypeDescriptor::int64())),
            right: Box::new(Expr::constant(2, TypeDescriptor::int64())),
            ty: TypeDescriptor::int64(),
        };
        let doubled = original.rewrite(&mut |e| match e {
            Expr::Constant {
                value: Value::Int(i),
                ty,
            } => Expr::constant(i * 2, ty),
            other => other,
        });

        // The receiver is unchanged.
        assert_eq!(
            original.children()[0],
            &Expr::constant(1, TypeDescriptor::int64())
        );
        assert_eq!(doubled.children()[1], &Expr::constant(4, TypeDescriptor::int64()));
    }

    #[test]
    fn test_sort_key_reports_key_type() {
        let key = Expr::sort_key(
            Expr::parameter("x", TypeDescriptor::string()),
            SortDirection::Descending,
        );
        assert_eq!(key.ty(), &TypeDescriptor::string());
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(source(), source());
        assert_ne!(source(), include(source(), "A"));
    }
}
