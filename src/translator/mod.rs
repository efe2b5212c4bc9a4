//! Host expression ↔ portable AST translation.
//!
//! Translation runs in two passes:
//!
//! 1. [`evaluator::freeze`] replaces every locally evaluable sub-tree
//!    (captured values, arithmetic on constants, native function calls on
//!    constants) with a constant.
//! 2. A bottom-up rewrite maps each remaining node to its portable variant,
//!    inferring static types on the way. Lambda parameters declared with
//!    [`HostType::Infer`] take the element type of the operator they belong to.
//!
//! [`translate_back`] is the inverse used by the executor.

pub mod back;
pub mod evaluator;
pub mod include;

use crate::ast::{
    AggregateFunc, BinaryOp, Expr, MemberBinding, ParameterExpr, QueryOp, SortDirection,
    TypeDescriptor, UnaryOp,
};
use crate::catalog::TypeInfoProvider;
use crate::error::{Error, Result};
use crate::host::{HostExpr, HostMethod, HostType, QueryMethod};
use crate::value::Value;

pub use self::back::translate_back;

/// Decides whether a closed sub-expression may be evaluated locally.
pub type LocalPredicate<'a> = &'a dyn Fn(&HostExpr) -> bool;

type Env = Vec<(String, HostType)>;

/// Translate a host expression into a portable AST.
pub fn translate(
    expr: &HostExpr,
    types: &dyn TypeInfoProvider,
    can_evaluate_locally: Option<LocalPredicate<'_>>,
) -> Result<Expr> {
    let mut translator = Translator::new(types);
    if let Some(predicate) = can_evaluate_locally {
        translator = translator.with_local_predicate(predicate);
    }
    translator.translate(expr)
}

pub struct Translator<'a> {
    types: &'a dyn TypeInfoProvider,
    can_evaluate_locally: Option<LocalPredicate<'a>>,
}

impl<'a> Translator<'a> {
    pub fn new(types: &'a dyn TypeInfoProvider) -> Self {
        Self {
            types,
            can_evaluate_locally: None,
        }
    }

    pub fn with_local_predicate(mut self, predicate: LocalPredicate<'a>) -> Self {
        self.can_evaluate_locally = Some(predicate);
        self
    }

    pub fn translate(&self, expr: &HostExpr) -> Result<Expr> {
        let (ast, _) = self.translate_typed(expr)?;
        Ok(ast)
    }

    /// Translate and also return the static host type of the result.
    pub fn translate_typed(&self, expr: &HostExpr) -> Result<(Expr, HostType)> {
        let frozen = evaluator::freeze(expr, self.types, self.can_evaluate_locally)?;
        let (ast, ty) = self.node(&frozen, &mut Vec::new())?;
        tracing::debug!("Translated {} into {}", expr, ast);
        Ok((ast, ty))
    }

    fn describe(&self, ty: &HostType) -> Result<TypeDescriptor> {
        if !ty.is_inferred() {
            return Err(Error::ambiguous(format!(
                "cannot determine a concrete type for {}",
                ty
            )));
        }
        Ok(self.types.describe(ty))
    }

    fn node(&self, expr: &HostExpr, env: &mut Env) -> Result<(Expr, HostType)> {
        match expr {
            HostExpr::Constant { value, ty } => {
                let ty = ty.clone();
                Ok((Expr::constant(value.clone(), self.describe(&ty)?), ty))
            }
            HostExpr::Captured(c) => Err(Error::unsupported(format!(
                "captured value '{}' was not evaluated locally",
                c.name
            ))),
            HostExpr::Source(element) => {
                let ty = HostType::seq(element.clone());
                let op = QueryOp::Source {
                    element: self.describe(element)?,
                };
                Ok((Expr::query(op, self.describe(&ty)?), ty))
            }
            HostExpr::Parameter { name, .. } => {
                let ty = env
                    .iter()
                    .rev()
                    .find(|(n, _)| n == name)
                    .map(|(_, t)| t.clone())
                    .ok_or_else(|| {
                        Error::unsupported(format!("parameter '{}' is not in scope", name))
                    })?;
                Ok((Expr::parameter(name.clone(), self.describe(&ty)?), ty))
            }
            HostExpr::Member { target, member } => {
                let (target, target_ty) = self.node(target, env)?;
                let ty = member_type(self.types, &target_ty, member)?;
                Ok((
                    Expr::Member {
                        target: Box::new(target),
                        declaring: self.describe(&target_ty)?,
                        member: member.clone(),
                        ty: self.describe(&ty)?,
                    },
                    ty,
                ))
            }
            HostExpr::Unary { op, operand } => {
                let (operand, operand_ty) = self.node(operand, env)?;
                let ty = unary_type(*op, &operand_ty)?;
                Ok((
                    Expr::Unary {
                        op: *op,
                        operand: Box::new(operand),
                        ty: self.describe(&ty)?,
                    },
                    ty,
                ))
            }
            HostExpr::Binary { op, left, right } => {
                let (left, left_ty) = self.node(left, env)?;
                let (right, right_ty) = self.node(right, env)?;
                let ty = binary_type(*op, &left_ty, &right_ty)?;
                Ok((
                    Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                        ty: self.describe(&ty)?,
                    },
                    ty,
                ))
            }
            HostExpr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                let (test, _) = self.node(test, env)?;
                let (if_true, true_ty) = self.node(if_true, env)?;
                let (if_false, false_ty) = self.node(if_false, env)?;
                let ty = conditional_type(&true_ty, &false_ty)?;
                Ok((
                    Expr::Conditional {
                        test: Box::new(test),
                        if_true: Box::new(if_true),
                        if_false: Box::new(if_false),
                        ty: self.describe(&ty)?,
                    },
                    ty,
                ))
            }
            HostExpr::Lambda { .. } => self.lambda(expr, &[], env),
            HostExpr::Call {
                method: HostMethod::Query(method),
                args,
            } => self.query(*method, args, env),
            HostExpr::Call {
                method: HostMethod::Function(def),
                args,
            } => {
                let args = args
                    .iter()
                    .map(|a| self.node(a, env).map(|(e, _)| e))
                    .collect::<Result<Vec<_>>>()?;
                let ty = def.returns.clone();
                Ok((
                    Expr::MethodCall {
                        declaring: self.describe(&def.declaring)?,
                        method: def.name.clone(),
                        args,
                        ty: self.describe(&ty)?,
                    },
                    ty,
                ))
            }
            HostExpr::New { members } => {
                let mut names = Vec::with_capacity(members.len());
                let mut args = Vec::with_capacity(members.len());
                let mut member_types = Vec::with_capacity(members.len());
                for (name, value) in members {
                    let (value, value_ty) = self.node(value, env)?;
                    names.push(name.clone());
                    args.push(value);
                    member_types.push((name.clone(), value_ty));
                }
                let ty = HostType::Anonymous(member_types);
                Ok((
                    Expr::New {
                        members: names,
                        args,
                        ty: self.describe(&ty)?,
                    },
                    ty,
                ))
            }
            HostExpr::NewArray { element, items } | HostExpr::ListInit { element, items } => {
                let items = items
                    .iter()
                    .map(|i| self.node(i, env).map(|(e, _)| e))
                    .collect::<Result<Vec<_>>>()?;
                let ty = HostType::seq(element.clone());
                let descriptor = self.describe(&ty)?;
                let ast = match expr {
                    HostExpr::NewArray { .. } => Expr::NewArray {
                        items,
                        ty: descriptor,
                    },
                    _ => Expr::ListInit {
                        items,
                        ty: descriptor,
                    },
                };
                Ok((ast, ty))
            }
            HostExpr::MemberInit { ty, bindings } => {
                let mut out = Vec::with_capacity(bindings.len());
                for (member, value) in bindings {
                    member_type(self.types, ty, member)?;
                    let (value, _) = self.node(value, env)?;
                    out.push(MemberBinding {
                        member: member.clone(),
                        value,
                    });
                }
                Ok((
                    Expr::MemberInit {
                        bindings: out,
                        ty: self.describe(ty)?,
                    },
                    ty.clone(),
                ))
            }
        }
    }

    /// Translate a lambda whose parameters are bound to `bound` types.
    /// Returns the portable lambda and the type of its body.
    fn lambda(
        &self,
        lambda: &HostExpr,
        bound: &[HostType],
        env: &mut Env,
    ) -> Result<(Expr, HostType)> {
        let HostExpr::Lambda { params, body } = lambda else {
            return Err(Error::unsupported(format!(
                "expected a lambda, got '{}'",
                lambda
            )));
        };
        if !bound.is_empty() && bound.len() != params.len() {
            return Err(Error::unsupported(format!(
                "lambda '{}' takes {} parameters, {} supplied",
                lambda,
                params.len(),
                bound.len()
            )));
        }

        let mut portable = Vec::with_capacity(params.len());
        let mut scope = Vec::with_capacity(params.len());
        for (i, (name, declared)) in params.iter().enumerate() {
            let ty = match (declared, bound.get(i)) {
                (HostType::Infer, Some(b)) => b.clone(),
                (HostType::Infer, None) => {
                    return Err(Error::ambiguous(format!(
                        "type of parameter '{}' cannot be inferred",
                        name
                    )));
                }
                (declared, _) => declared.clone(),
            };
            portable.push(ParameterExpr {
                name: name.clone(),
                ty: self.describe(&ty)?,
            });
            scope.push((name.clone(), ty));
        }

        let depth = env.len();
        env.extend(scope);
        let body = self.node(body, env);
        env.truncate(depth);
        let (body, body_ty) = body?;

        Ok((
            Expr::Lambda {
                params: portable,
                body: Box::new(body),
                ty: self.describe(&body_ty)?,
            },
            body_ty,
        ))
    }

    fn predicate(&self, lambda: &HostExpr, element: &HostType, env: &mut Env) -> Result<Expr> {
        let (expr, ty) = self.lambda(lambda, std::slice::from_ref(element), env)?;
        match ty.unwrap_optional() {
            HostType::Bool | HostType::Dynamic => Ok(expr),
            other => Err(Error::unsupported(format!(
                "predicate '{}' returns {}, expected bool",
                lambda, other
            ))),
        }
    }

    fn query(
        &self,
        method: QueryMethod,
        args: &[HostExpr],
        env: &mut Env,
    ) -> Result<(Expr, HostType)> {
        let arg = |i: usize| {
            args.get(i).ok_or_else(|| {
                Error::unsupported(format!("{} is missing argument {}", method.name(), i))
            })
        };
        let (source, source_ty) = self.node(arg(0)?, env)?;
        let element = source_ty.element().cloned().ok_or_else(|| {
            Error::unsupported(format!(
                "{} requires a sequence source, got {}",
                method.name(),
                source_ty
            ))
        })?;
        let source = Box::new(source);
        let element_slice = std::slice::from_ref(&element);

        let (op, ty) = match method {
            QueryMethod::Where => {
                let predicate = self.predicate(arg(1)?, &element, env)?;
                (
                    QueryOp::Filter {
                        source,
                        predicate: Box::new(predicate),
                    },
                    source_ty,
                )
            }
            QueryMethod::Select | QueryMethod::SelectMany => {
                let (selector, result_ty) = self.lambda(arg(1)?, element_slice, env)?;
                let many = method == QueryMethod::SelectMany;
                let ty = if many {
                    let inner = result_ty.element().cloned().ok_or_else(|| {
                        Error::unsupported(format!(
                            "SelectMany selector must return a sequence, got {}",
                            result_ty
                        ))
                    })?;
                    HostType::seq(inner)
                } else {
                    HostType::seq(result_ty)
                };
                (
                    QueryOp::Project {
                        source,
                        selector: Box::new(selector),
                        many,
                    },
                    ty,
                )
            }
            QueryMethod::OrderBy | QueryMethod::OrderByDescending => {
                let (key, _) = self.lambda(arg(1)?, element_slice, env)?;
                let direction = if method == QueryMethod::OrderBy {
                    SortDirection::Ascending
                } else {
                    SortDirection::Descending
                };
                (
                    QueryOp::Sort {
                        source,
                        keys: vec![Expr::sort_key(key, direction)],
                    },
                    source_ty,
                )
            }
            QueryMethod::ThenBy | QueryMethod::ThenByDescending => {
                let (key, _) = self.lambda(arg(1)?, element_slice, env)?;
                let direction = if method == QueryMethod::ThenBy {
                    SortDirection::Ascending
                } else {
                    SortDirection::Descending
                };
                match *source {
                    Expr::Query {
                        op:
                            QueryOp::Sort {
                                source: inner,
                                mut keys,
                            },
                        ..
                    } => {
                        keys.push(Expr::sort_key(key, direction));
                        (
                            QueryOp::Sort {
                                source: inner,
                                keys,
                            },
                            source_ty,
                        )
                    }
                    _ => {
                        return Err(Error::unsupported(format!(
                            "{} must follow OrderBy or ThenBy",
                            method.name()
                        )));
                    }
                }
            }
            QueryMethod::Skip => (
                QueryOp::Skip {
                    source,
                    count: constant_count(method, arg(1)?)?,
                },
                source_ty,
            ),
            QueryMethod::Take => (
                QueryOp::Take {
                    source,
                    count: constant_count(method, arg(1)?)?,
                },
                source_ty,
            ),
            QueryMethod::GroupBy => {
                let (key, key_ty) = self.lambda(arg(1)?, element_slice, env)?;
                let (element_sel, grouped_ty) = match args.get(2) {
                    Some(sel) => {
                        let (e, t) = self.lambda(sel, element_slice, env)?;
                        (Some(Box::new(e)), t)
                    }
                    None => (None, element.clone()),
                };
                (
                    QueryOp::GroupBy {
                        source,
                        key: Box::new(key),
                        element: element_sel,
                    },
                    HostType::seq(HostType::group(key_ty, grouped_ty)),
                )
            }
            QueryMethod::Join => {
                let (inner, inner_ty) = self.node(arg(1)?, env)?;
                let inner_element = inner_ty.element().cloned().ok_or_else(|| {
                    Error::unsupported(format!("Join requires a sequence, got {}", inner_ty))
                })?;
                let (outer_key, _) = self.lambda(arg(2)?, element_slice, env)?;
                let (inner_key, _) =
                    self.lambda(arg(3)?, std::slice::from_ref(&inner_element), env)?;
                let (result, result_ty) =
                    self.lambda(arg(4)?, &[element.clone(), inner_element], env)?;
                (
                    QueryOp::Join {
                        outer: source,
                        inner: Box::new(inner),
                        outer_key: Box::new(outer_key),
                        inner_key: Box::new(inner_key),
                        result: Box::new(result),
                    },
                    HostType::seq(result_ty),
                )
            }
            QueryMethod::Include => {
                let path = match arg(1)? {
                    HostExpr::Constant {
                        value: Value::Str(path),
                        ..
                    } => path.clone(),
                    navigation => include::flatten(navigation)?,
                };
                (QueryOp::Include { source, path }, source_ty)
            }
            QueryMethod::ThenInclude => match *source {
                Expr::Query {
                    op:
                        QueryOp::Include {
                            source: inner,
                            path,
                        },
                    ..
                } => {
                    let tail = include::flatten(arg(1)?)?;
                    (
                        QueryOp::Include {
                            source: inner,
                            path: format!("{}.{}", path, tail),
                        },
                        source_ty,
                    )
                }
                _ => {
                    return Err(Error::unsupported(
                        "ThenInclude must follow Include or ThenInclude",
                    ));
                }
            },
            QueryMethod::Aggregate(func) => {
                let (argument, ty) = self.aggregate(func, args.get(1), &element, env)?;
                (
                    QueryOp::Aggregate {
                        source,
                        func,
                        argument,
                    },
                    ty,
                )
            }
        };
        Ok((Expr::query(op, self.describe(&ty)?), ty))
    }

    fn aggregate(
        &self,
        func: AggregateFunc,
        argument: Option<&HostExpr>,
        element: &HostType,
        env: &mut Env,
    ) -> Result<(Option<Box<Expr>>, HostType)> {
        if func.takes_predicate() {
            let predicate = argument
                .map(|p| self.predicate(p, element, env).map(Box::new))
                .transpose()?;
            if func == AggregateFunc::All && predicate.is_none() {
                return Err(Error::unsupported("All requires a predicate"));
            }
            let ty = match func {
                AggregateFunc::Count => HostType::Int,
                AggregateFunc::Any | AggregateFunc::All => HostType::Bool,
                AggregateFunc::FirstOrDefault | AggregateFunc::SingleOrDefault => {
                    HostType::optional(element.clone())
                }
                _ => element.clone(),
            };
            return Ok((predicate, ty));
        }

        let (selector, value_ty) = match argument {
            Some(sel) => {
                let (e, t) = self.lambda(sel, std::slice::from_ref(element), env)?;
                (Some(Box::new(e)), t)
            }
            None => (None, element.clone()),
        };
        let numeric = value_ty.is_numeric() || value_ty == HostType::Dynamic;
        let ty = match func {
            AggregateFunc::Sum if numeric => value_ty.unwrap_optional().clone(),
            AggregateFunc::Average if numeric => HostType::Float,
            AggregateFunc::Min | AggregateFunc::Max => value_ty,
            _ => {
                return Err(Error::unsupported(format!(
                    "{} is not defined for {}",
                    func, value_ty
                )));
            }
        };
        Ok((selector, ty))
    }
}

fn constant_count(method: QueryMethod, expr: &HostExpr) -> Result<u64> {
    match expr {
        HostExpr::Constant {
            value: Value::Int(n),
            ..
        } => u64::try_from(*n).map_err(|_| {
            Error::unsupported(format!(
                "{} count must be non-negative, got {}",
                method.name(),
                n
            ))
        }),
        other => Err(Error::unsupported(format!(
            "{} count must be a constant integer, got '{}'",
            method.name(),
            other
        ))),
    }
}

/// Type of `target.member`.
pub(crate) fn member_type(
    types: &dyn TypeInfoProvider,
    target: &HostType,
    member: &str,
) -> Result<HostType> {
    types.member_type(target, member).ok_or_else(|| {
        Error::unsupported(format!("{} has no member '{}'", target, member))
    })
}

pub(crate) fn unary_type(op: UnaryOp, operand: &HostType) -> Result<HostType> {
    match op {
        UnaryOp::Not => Ok(HostType::Bool),
        UnaryOp::Negate if operand.is_numeric() || *operand == HostType::Dynamic => {
            Ok(operand.clone())
        }
        UnaryOp::Negate => Err(Error::unsupported(format!("cannot negate {}", operand))),
    }
}

pub(crate) fn binary_type(op: BinaryOp, left: &HostType, right: &HostType) -> Result<HostType> {
    if op.is_comparison() || op.is_logical() {
        return Ok(HostType::Bool);
    }
    if op == BinaryOp::Coalesce {
        return Ok(match left {
            HostType::Option(_) => right.clone(),
            other => other.clone(),
        });
    }

    let optional = matches!(left, HostType::Option(_)) || matches!(right, HostType::Option(_));
    let (l, r) = (left.unwrap_optional(), right.unwrap_optional());
    let ty = match (l, r) {
        (HostType::Str, _) | (_, HostType::Str) if op == BinaryOp::Add => {
            return Ok(HostType::Str);
        }
        (HostType::Dynamic, _) | (_, HostType::Dynamic) => HostType::Dynamic,
        (HostType::Int, HostType::Int) => HostType::Int,
        (HostType::Int | HostType::Float, HostType::Int | HostType::Float) => HostType::Float,
        _ => {
            return Err(Error::unsupported(format!(
                "operator {} is not defined for {} and {}",
                op, left, right
            )));
        }
    };
    Ok(if optional { HostType::optional(ty) } else { ty })
}

pub(crate) fn conditional_type(if_true: &HostType, if_false: &HostType) -> Result<HostType> {
    if if_true == if_false {
        return Ok(if_true.clone());
    }
    let null = HostType::optional(HostType::Dynamic);
    match (if_true, if_false) {
        (t, f) if *t == null => Ok(HostType::optional(f.clone())),
        (t, f) if *f == null => Ok(HostType::optional(t.clone())),
        (HostType::Option(inner), other) | (other, HostType::Option(inner))
            if **inner == *other =>
        {
            Ok(HostType::optional(other.clone()))
        }
        (HostType::Dynamic, _) | (_, HostType::Dynamic) => Ok(HostType::Dynamic),
        _ => Err(Error::ambiguous(format!(
            "conditional branches have different types: {} and {}",
            if_true, if_false
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{RecordDef, TypeCatalog};
    use crate::host::{captured, lambda, lambda2, lit, param, source, typed_lambda};
    use pretty_assertions::assert_eq;

    fn catalog() -> TypeCatalog {
        TypeCatalog::new()
            .with_record(
                RecordDef::new("shop.Person")
                    .field("Name", HostType::Str)
                    .field("Age", HostType::Int)
                    .field("City", HostType::Str)
                    .field("Children", HostType::seq(HostType::record("shop.Person")))
                    .field("Parent", HostType::optional(HostType::record("shop.Person"))),
            )
            .with_record(
                RecordDef::new("shop.City")
                    .field("Name", HostType::Str)
                    .field("Country", HostType::Str),
            )
    }

    fn persons() -> HostExpr {
        source(HostType::record("shop.Person"))
    }

    #[test]
    fn test_filter_gets_element_type() {
        let types = catalog();
        let expr = persons().filter(lambda("p", |p| p.member("Age").gt(30)));
        let ast = translate(&expr, &types, None).unwrap();
        assert_eq!(ast.to_string(), "Source<shop.Person>.Where(p => (p.Age > 30))");
        assert_eq!(ast.ty().to_string(), "core.Sequence<shop.Person>[]");
        let Expr::Query {
            op: QueryOp::Filter { predicate, .. },
            ..
        } = &ast
        else {
            panic!("expected a filter, got {}", ast);
        };
        let Expr::Lambda { params, .. } = predicate.as_ref() else {
            panic!("expected a lambda");
        };
        assert_eq!(params[0].ty.to_string(), "shop.Person");
    }

    #[test]
    fn test_captured_values_are_frozen() {
        let types = catalog();
        let min_age = 30;
        let expr = persons()
            .filter(lambda("p", |p| {
                p.member("Age")
                    .gt(captured("min_age", HostType::Int, move || Value::Int(min_age)).plus(1))
            }))
            .take(captured("limit", HostType::Int, || Value::Int(5)));
        let ast = translate(&expr, &types, None).unwrap();
        assert_eq!(
            ast.to_string(),
            "Source<shop.Person>.Where(p => (p.Age > 31)).Take(5)"
        );
    }

    #[test]
    fn test_predicate_can_veto_local_evaluation() {
        let types = catalog();
        let expr = persons()
            .filter(lambda("p", |p| p.member("Name").equals(lit("a").to_upper())));
        let keep_calls = |e: &HostExpr| !matches!(e, HostExpr::Call { .. });
        let ast = translate(&expr, &types, Some(&keep_calls)).unwrap();
        assert_eq!(
            ast.to_string(),
            "Source<shop.Person>.Where(p => (p.Name == core.String.ToUpper('a')))"
        );

        let vetoed = persons().take(captured("n", HostType::Int, || Value::Int(1)));
        let never = |_: &HostExpr| false;
        assert!(matches!(
            translate(&vetoed, &types, Some(&never)),
            Err(Error::UnsupportedExpression(_))
        ));
    }

    #[test]
    fn test_sort_keys_accumulate() {
        let types = catalog();
        let expr = persons()
            .order_by(lambda("p", |p| p.member("City")))
            .then_by_desc(lambda("p", |p| p.member("Age")))
            .then_by(lambda("p", |p| p.member("Name")));
        let ast = translate(&expr, &types, None).unwrap();
        assert_eq!(
            ast.to_string(),
            "Source<shop.Person>.OrderBy(p => p.City asc, p => p.Age desc, p => p.Name asc)"
        );
    }

    #[test]
    fn test_then_by_requires_order_by() {
        let types = catalog();
        let expr = persons().then_by(lambda("p", |p| p.member("Name")));
        assert!(matches!(
            translate(&expr, &types, None),
            Err(Error::UnsupportedExpression(_))
        ));
    }

    #[test]
    fn test_skip_take_must_be_constant_and_non_negative() {
        let types = catalog();
        assert!(matches!(
            translate(&persons().skip(-1), &types, None),
            Err(Error::UnsupportedExpression(_))
        ));
        let per_row = persons().select(lambda("p", |p| {
            p.clone().member("Children").take(p.member("Age"))
        }));
        assert!(matches!(
            translate(&per_row, &types, None),
            Err(Error::UnsupportedExpression(_))
        ));
    }

    #[test]
    fn test_projection_and_group_types() {
        let types = catalog();
        let expr = persons()
            .group_by(lambda("p", |p| p.member("City")))
            .select(lambda("g", |g| {
                HostExpr::new_object(vec![("City", g.clone().member("Key")), ("Total", g.count())])
            }));
        let ast = translate(&expr, &types, None).unwrap();
        assert_eq!(
            ast.ty().to_string(),
            "core.Sequence<core.Anonymous{City: core.String, Total: core.Int64}>[]"
        );
    }

    #[test]
    fn test_join_binds_both_sides() {
        let types = catalog();
        let expr = persons().join(
            source(HostType::record("shop.City")),
            lambda("p", |p| p.member("City")),
            lambda("c", |c| c.member("Name")),
            lambda2("p", "c", |p, c| {
                HostExpr::new_object(vec![("Who", p.member("Name")), ("Where", c.member("Country"))])
            }),
        );
        let ast = translate(&expr, &types, None).unwrap();
        assert_eq!(
            ast.ty().to_string(),
            "core.Sequence<core.Anonymous{Who: core.String, Where: core.String}>[]"
        );
    }

    #[test]
    fn test_aggregate_result_types() {
        let types = catalog();
        let count = translate(&persons().count(), &types, None).unwrap();
        assert_eq!(count.ty(), &TypeDescriptor::int64());
        let first = translate(
            &persons().aggregate(AggregateFunc::FirstOrDefault, None),
            &types,
            None,
        )
        .unwrap();
        assert_eq!(first.ty().to_string(), "shop.Person?");
        let bad_sum = persons().sum(lambda("p", |p| p.member("Name")));
        assert!(translate(&bad_sum, &types, None).is_err());
    }

    #[test]
    fn test_unknown_member_is_unsupported() {
        let types = catalog();
        let expr = persons().filter(lambda("p", |p| p.member("Salary").gt(1)));
        assert!(matches!(
            translate(&expr, &types, None),
            Err(Error::UnsupportedExpression(_))
        ));
    }

    #[test]
    fn test_uninferable_lambda_is_ambiguous() {
        let types = catalog();
        let standalone = lambda("x", |x| x.member("Age"));
        assert!(matches!(
            translate(&standalone, &types, None),
            Err(Error::AmbiguousResultType(_))
        ));
        let typed = typed_lambda("x", HostType::record("shop.Person"), |x| x.member("Age"));
        assert_eq!(translate(&typed, &types, None).unwrap().ty(), &TypeDescriptor::int64());
    }

    #[test]
    fn test_unbound_parameter() {
        let types = catalog();
        let expr = persons().filter(lambda("p", |_| param("q", HostType::Bool)));
        assert!(matches!(
            translate(&expr, &types, None),
            Err(Error::UnsupportedExpression(_))
        ));
    }

    #[test]
    fn test_conditional_type_rules() {
        assert_eq!(
            conditional_type(&HostType::Int, &HostType::optional(HostType::Int)).unwrap(),
            HostType::optional(HostType::Int)
        );
        assert!(matches!(
            conditional_type(&HostType::Int, &HostType::Str),
            Err(Error::AmbiguousResultType(_))
        ));
    }
}
