//! Portable AST back to an executable host expression.

use crate::ast::{Expr, QueryOp, SortDirection, TypeDescriptor};
use crate::catalog::TypeInfoProvider;
use crate::error::{Error, Result};
use crate::host::{HostExpr, HostType, lit, source};

/// Re-bind a portable expression against local type metadata.
///
/// Every type descriptor must resolve (`UnknownType` otherwise) and every
/// method call must name a function the provider knows.
pub fn translate_back(expr: &Expr, types: &dyn TypeInfoProvider) -> Result<HostExpr> {
    Back { types }.node(expr)
}

struct Back<'a> {
    types: &'a dyn TypeInfoProvider,
}

impl Back<'_> {
    fn resolve(&self, ty: &TypeDescriptor) -> Result<HostType> {
        self.types.resolve(ty)
    }

    fn boxed(&self, expr: &Expr) -> Result<Box<HostExpr>> {
        self.node(expr).map(Box::new)
    }

    fn all(&self, exprs: &[Expr]) -> Result<Vec<HostExpr>> {
        exprs.iter().map(|e| self.node(e)).collect()
    }

    fn element_of(&self, ty: &TypeDescriptor) -> Result<HostType> {
        let resolved = self.resolve(ty)?;
        resolved
            .element()
            .cloned()
            .ok_or_else(|| Error::UnknownType(format!("{} is not a collection type", ty)))
    }

    fn node(&self, expr: &Expr) -> Result<HostExpr> {
        Ok(match expr {
            Expr::Constant { value, ty } => HostExpr::Constant {
                value: value.clone(),
                ty: self.resolve(ty)?,
            },
            Expr::Member {
                target,
                declaring,
                member,
                ty,
            } => {
                self.resolve(declaring)?;
                self.resolve(ty)?;
                self.node(target)?.member(member)
            }
            Expr::Unary { op, operand, ty } => {
                self.resolve(ty)?;
                HostExpr::Unary {
                    op: *op,
                    operand: self.boxed(operand)?,
                }
            }
            Expr::Binary {
                op,
                left,
                right,
                ty,
            } => {
                self.resolve(ty)?;
                HostExpr::Binary {
                    op: *op,
                    left: self.boxed(left)?,
                    right: self.boxed(right)?,
                }
            }
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ty,
            } => {
                self.resolve(ty)?;
                HostExpr::Conditional {
                    test: self.boxed(test)?,
                    if_true: self.boxed(if_true)?,
                    if_false: self.boxed(if_false)?,
                }
            }
            Expr::Lambda { params, body, .. } => HostExpr::Lambda {
                params: params
                    .iter()
                    .map(|p| Ok((p.name.clone(), self.resolve(&p.ty)?)))
                    .collect::<Result<_>>()?,
                body: self.boxed(body)?,
            },
            Expr::Parameter(p) => HostExpr::Parameter {
                name: p.name.clone(),
                ty: self.resolve(&p.ty)?,
            },
            Expr::MethodCall {
                declaring,
                method,
                args,
                ty,
            } => {
                let owner = self.resolve(declaring)?;
                self.resolve(ty)?;
                let def = self.types.function(&owner, method).ok_or_else(|| {
                    Error::unsupported(format!("unknown function {}.{}", owner, method))
                })?;
                HostExpr::call(def, self.all(args)?)
            }
            Expr::New { members, args, ty } => {
                self.resolve(ty)?;
                if members.len() != args.len() {
                    return Err(Error::unsupported(format!(
                        "object construction has {} members but {} values",
                        members.len(),
                        args.len()
                    )));
                }
                HostExpr::New {
                    members: members.iter().cloned().zip(self.all(args)?).collect(),
                }
            }
            Expr::NewArray { items, ty } => HostExpr::NewArray {
                element: self.element_of(ty)?,
                items: self.all(items)?,
            },
            Expr::ListInit { items, ty } => HostExpr::ListInit {
                element: self.element_of(ty)?,
                items: self.all(items)?,
            },
            Expr::MemberInit { bindings, ty } => HostExpr::MemberInit {
                ty: self.resolve(ty)?,
                bindings: bindings
                    .iter()
                    .map(|b| Ok((b.member.clone(), self.node(&b.value)?)))
                    .collect::<Result<_>>()?,
            },
            Expr::SortKey { .. } => {
                return Err(Error::unsupported(
                    "sort key outside of a sort operator",
                ));
            }
            Expr::Query { op, ty } => {
                self.resolve(ty)?;
                self.query(op)?
            }
        })
    }

    fn query(&self, op: &QueryOp) -> Result<HostExpr> {
        Ok(match op {
            QueryOp::Source { element } => source(self.resolve(element)?),
            QueryOp::Filter { source, predicate } => {
                self.node(source)?.filter(self.node(predicate)?)
            }
            QueryOp::Project {
                source,
                selector,
                many,
            } => {
                let source = self.node(source)?;
                let selector = self.node(selector)?;
                if *many {
                    source.select_many(selector)
                } else {
                    source.select(selector)
                }
            }
            QueryOp::Sort { source, keys } => {
                let mut out = self.node(source)?;
                if keys.is_empty() {
                    return Err(Error::unsupported("sort without keys"));
                }
                for (i, key) in keys.iter().enumerate() {
                    let Expr::SortKey { key, direction } = key else {
                        return Err(Error::unsupported(format!(
                            "'{}' is not a sort key",
                            key
                        )));
                    };
                    let key = self.node(key)?;
                    out = match (i, direction) {
                        (0, SortDirection::Ascending) => out.order_by(key),
                        (0, SortDirection::Descending) => out.order_by_desc(key),
                        (_, SortDirection::Ascending) => out.then_by(key),
                        (_, SortDirection::Descending) => out.then_by_desc(key),
                    };
                }
                out
            }
            QueryOp::Skip { source, count } => self.node(source)?.skip(count_literal(*count)?),
            QueryOp::Take { source, count } => self.node(source)?.take(count_literal(*count)?),
            QueryOp::GroupBy {
                source,
                key,
                element,
            } => {
                let source = self.node(source)?;
                let key = self.node(key)?;
                match element {
                    Some(element) => source.group_by_element(key, self.node(element)?),
                    None => source.group_by(key),
                }
            }
            QueryOp::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => self.node(outer)?.join(
                self.node(inner)?,
                self.node(outer_key)?,
                self.node(inner_key)?,
                self.node(result)?,
            ),
            QueryOp::Include { source, path } => self.node(source)?.include_path(path),
            QueryOp::Aggregate {
                source,
                func,
                argument,
            } => {
                let argument = argument.as_deref().map(|a| self.node(a)).transpose()?;
                self.node(source)?.aggregate(*func, argument)
            }
        })
    }
}

fn count_literal(count: u64) -> Result<HostExpr> {
    i64::try_from(count)
        .map(lit)
        .map_err(|_| Error::unsupported(format!("count {} is out of range", count)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AggregateFunc;
    use crate::catalog::{RecordDef, TypeCatalog};
    use crate::host::{lambda, lambda2};
    use crate::interpreter::{Interpreter, MemoryDataSource};
    use crate::translator::translate;
    use crate::value::{Record, Value};
    use pretty_assertions::assert_eq;

    fn catalog() -> TypeCatalog {
        TypeCatalog::new()
            .with_record(
                RecordDef::new("shop.Person")
                    .field("Name", HostType::Str)
                    .field("Age", HostType::Int)
                    .field("City", HostType::Str)
                    .field("Tags", HostType::seq(HostType::Str)),
            )
            .with_record(
                RecordDef::new("shop.City")
                    .field("Name", HostType::Str)
                    .field("Country", HostType::Str),
            )
    }

    fn data() -> MemoryDataSource {
        let person = |name: &str, age: i64, city: &str, tags: &[&str]| {
            Value::from(
                Record::new()
                    .field("Name", name)
                    .field("Age", age)
                    .field("City", city)
                    .field(
                        "Tags",
                        Value::List(tags.iter().map(|t| Value::from(*t)).collect()),
                    ),
            )
        };
        let city = |name: &str, country: &str| {
            Value::from(Record::new().field("Name", name).field("Country", country))
        };
        MemoryDataSource::new()
            .with(
                "shop.Person",
                vec![
                    person("Ada", 36, "London", &["math", "engines"]),
                    person("Linus", 28, "Helsinki", &["kernels"]),
                    person("Grace", 45, "New York", &["compilers", "navy"]),
                    person("Alan", 41, "London", &[]),
                ],
            )
            .with(
                "shop.City",
                vec![city("London", "UK"), city("Helsinki", "FI")],
            )
    }

    fn persons() -> HostExpr {
        source(HostType::record("shop.Person"))
    }

    fn assert_equivalent(expr: HostExpr) {
        let types = catalog();
        let data = data();
        let interpreter = Interpreter::new(&data);
        let direct = interpreter.evaluate(&expr).unwrap();
        let ast = translate(&expr, &types, None).unwrap();
        let rebuilt = translate_back(&ast, &types).unwrap();
        assert_eq!(interpreter.evaluate(&rebuilt).unwrap(), direct);
        let again = translate(&rebuilt, &types, None).unwrap();
        assert_eq!(again, ast);
    }

    #[test]
    fn test_filter_sort_page_equivalent() {
        assert_equivalent(
            persons()
                .filter(lambda("p", |p| p.member("Age").gt(30)))
                .order_by(lambda("p", |p| p.member("City")))
                .then_by_desc(lambda("p", |p| p.member("Age")))
                .skip(1)
                .take(2),
        );
    }

    #[test]
    fn test_projection_and_aggregate_equivalent() {
        assert_equivalent(
            persons().select(lambda("p", |p| {
                HostExpr::new_object(vec![
                    ("Name", p.clone().member("Name").to_upper()),
                    ("Senior", p.member("Age").ge(40)),
                ])
            })),
        );
        assert_equivalent(persons().sum(lambda("p", |p| p.member("Age"))));
        assert_equivalent(
            persons().aggregate(
                AggregateFunc::FirstOrDefault,
                Some(lambda("p", |p| p.member("City").equals("Paris"))),
            ),
        );
    }

    #[test]
    fn test_group_equivalent() {
        assert_equivalent(
            persons()
                .group_by(lambda("p", |p| p.member("City")))
                .select(lambda("g", |g| {
                    HostExpr::new_object(vec![("City", g.clone().member("Key")), ("Total", g.count())])
                })),
        );
    }

    #[test]
    fn test_join_equivalent() {
        assert_equivalent(
            persons().join(
                source(HostType::record("shop.City")),
                lambda("p", |p| p.member("City")),
                lambda("c", |c| c.member("Name")),
                lambda2("p", "c", |p, c| {
                    HostExpr::new_object(vec![
                        ("Who", p.member("Name")),
                        ("Where", c.member("Country")),
                    ])
                }),
            ),
        );
    }

    #[test]
    fn test_include_equivalent() {
        assert_equivalent(
            persons()
                .include(lambda("p", |p| p.member("Tags")))
                .filter(lambda("p", |p| p.member("Age").lt(40))),
        );
        assert_equivalent(persons().include_path("Tags").take(1));
    }

    #[test]
    fn test_select_many_equivalent() {
        assert_equivalent(persons().select_many(lambda("p", |p| p.member("Tags"))));
        assert_equivalent(
            persons()
                .filter(lambda("p", |p| p.member("City").equals("London")))
                .select_many(lambda("p", |p| p.member("Tags")))
                .count(),
        );
    }

    #[test]
    fn test_unknown_type() {
        let ast = translate(&persons(), &catalog(), None).unwrap();
        let err = translate_back(&ast, &TypeCatalog::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownType(_)));
    }

    #[test]
    fn test_unknown_function() {
        let types = catalog();
        let ast = translate(
            &persons().filter(lambda("p", |p| p.member("Name").starts_with("A"))),
            &types,
            None,
        )
        .unwrap();
        let renamed = ast.rewrite(&mut |e| match e {
            Expr::MethodCall {
                declaring,
                args,
                ty,
                ..
            } => Expr::MethodCall {
                declaring,
                method: "Soundex".to_string(),
                args,
                ty,
            },
            other => other,
        });
        assert!(matches!(
            translate_back(&renamed, &types),
            Err(Error::UnsupportedExpression(_))
        ));
    }

    #[test]
    fn test_standalone_sort_key() {
        let key = Expr::sort_key(
            Expr::constant(1, TypeDescriptor::int64()),
            SortDirection::Ascending,
        );
        assert!(translate_back(&key, &catalog()).is_err());
    }
}
