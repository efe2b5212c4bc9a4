//! Method-chain rendering of portable expressions.
//!
//! ```text
//! Source<shop.Person>.Where(x => (x.Age > 30)).OrderBy(x => x.Name asc).Take(5)
//! ```

use std::fmt;

use super::{Expr, QueryOp};

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant { value, .. } => write!(f, "{}", value),
            Expr::Member { target, member, .. } => write!(f, "{}.{}", target, member),
            Expr::Unary { op, operand, .. } => write!(f, "{}{}", op, operand),
            Expr::Binary {
                op, left, right, ..
            } => write!(f, "({} {} {})", left, op, right),
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => write!(f, "({} ? {} : {})", test, if_true, if_false),
            Expr::Lambda { params, body, .. } => {
                if params.len() == 1 {
                    write!(f, "{} => {}", params[0].name, body)
                } else {
                    let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
                    write!(f, "({}) => {}", names.join(", "), body)
                }
            }
            Expr::Parameter(p) => write!(f, "{}", p.name),
            Expr::MethodCall {
                declaring,
                method,
                args,
                ..
            } => {
                write!(f, "{}.{}(", declaring.qualified_name(), method)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Expr::New { members, args, .. } => {
                write!(f, "new {{ ")?;
                for (i, (name, arg)) in members.iter().zip(args).enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", name, arg)?;
                }
                write!(f, " }}")
            }
            Expr::NewArray { items, ty } => {
                let element = ty.element().map(|e| e.to_string()).unwrap_or_default();
                write!(f, "new {}[] {{ ", element)?;
                write_list(f, items)?;
                write!(f, " }}")
            }
            Expr::ListInit { items, ty } => {
                let element = ty.element().map(|e| e.to_string()).unwrap_or_default();
                write!(f, "new List<{}> {{ ", element)?;
                write_list(f, items)?;
                write!(f, " }}")
            }
            Expr::MemberInit { bindings, ty } => {
                write!(f, "new {} {{ ", ty.qualified_name())?;
                for (i, b) in bindings.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", b.member, b.value)?;
                }
                write!(f, " }}")
            }
            Expr::SortKey { key, direction } => write!(f, "{} {}", key, direction),
            Expr::Query { op, .. } => write!(f, "{}", op),
        }
    }
}

impl fmt::Display for QueryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryOp::Source { element } => write!(f, "Source<{}>", element),
            QueryOp::Filter { source, predicate } => {
                write!(f, "{}.Where({})", source, predicate)
            }
            QueryOp::Project {
                source, selector, ..
            } => write!(f, "{}.{}({})", source, self.name(), selector),
            QueryOp::Sort { source, keys } => {
                write!(f, "{}.OrderBy(", source)?;
                write_list(f, keys)?;
                write!(f, ")")
            }
            QueryOp::Skip { source, count } => write!(f, "{}.Skip({})", source, count),
            QueryOp::Take { source, count } => write!(f, "{}.Take({})", source, count),
            QueryOp::GroupBy {
                source,
                key,
                element,
            } => match element {
                Some(element) => write!(f, "{}.GroupBy({}, {})", source, key, element),
                None => write!(f, "{}.GroupBy({})", source, key),
            },
            QueryOp::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => write!(
                f,
                "{}.Join({}, {}, {}, {})",
                outer, inner, outer_key, inner_key, result
            ),
            QueryOp::Include { source, path } => write!(f, "{}.Include(\"{}\")", source, path),
            QueryOp::Aggregate {
                source,
                func,
                argument,
            } => match argument {
                Some(arg) => write!(f, "{}.{}({})", source, func, arg),
                None => write!(f, "{}.{}()", source, func),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, ParameterExpr, SortDirection, TypeDescriptor};

    #[test]
    fn test_render_chain() {
        let person = TypeDescriptor::new(Some("shop"), "Person");
        let x = ParameterExpr {
            name: "x".to_string(),
            ty: person.clone(),
        };
        let age = Expr::Member {
            target: Box::new(Expr::Parameter(x.clone())),
            declaring: person.clone(),
            member: "Age".to_string(),
            ty: TypeDescriptor::int64(),
        };
        let source = Expr::query(
            QueryOp::Source {
                element: person.clone(),
            },
            TypeDescriptor::sequence(person.clone()),
        );
        let filter = Expr::query(
            QueryOp::Filter {
                source: Box::new(source),
                predicate: Box::new(Expr::Lambda {
                    params: vec![x.clone()],
                    body: Box::new(Expr::Binary {
                        op: BinaryOp::Gt,
                        left: Box::new(age.clone()),
                        right: Box::new(Expr::constant(30, TypeDescriptor::int64())),
                        ty: TypeDescriptor::boolean(),
                    }),
                    ty: TypeDescriptor::boolean(),
                }),
            },
            TypeDescriptor::sequence(person.clone()),
        );
        let sorted = Expr::query(
            QueryOp::Sort {
                source: Box::new(filter),
                keys: vec![Expr::sort_key(
                    Expr::Lambda {
                        params: vec![x],
                        body: Box::new(age),
                        ty: TypeDescriptor::int64(),
                    },
                    SortDirection::Descending,
                )],
            },
            TypeDescriptor::sequence(person.clone()),
        );
        let take = Expr::query(
            QueryOp::Take {
                source: Box::new(sorted),
                count: 5,
            },
            TypeDescriptor::sequence(person),
        );
        assert_eq!(
            take.to_string(),
            "Source<shop.Person>.Where(x => (x.Age > 30)).OrderBy(x => x.Age desc).Take(5)"
        );
    }
}
