//! Local evaluation of closed sub-expressions.
//!
//! A sub-tree is closed when it references no lambda parameter, no query
//! source and no function without a native body. Every maximal closed
//! sub-tree that the caller's predicate accepts is evaluated once and
//! replaced by a constant of its static type.

use super::{LocalPredicate, binary_type, conditional_type, member_type, unary_type};
use crate::catalog::TypeInfoProvider;
use crate::error::Result;
use crate::host::{HostExpr, HostMethod, HostType};
use crate::interpreter::{Interpreter, MemoryDataSource};

/// Whether `expr` can be evaluated without any query context.
pub fn is_closed(expr: &HostExpr) -> bool {
    let local = match expr {
        HostExpr::Parameter { .. } | HostExpr::Source(_) | HostExpr::Lambda { .. } => false,
        HostExpr::Call {
            method: HostMethod::Query(_),
            ..
        } => false,
        HostExpr::Call {
            method: HostMethod::Function(def),
            ..
        } => def.body.is_some(),
        _ => true,
    };
    local && expr.children().into_iter().all(is_closed)
}

/// Replace evaluable sub-trees of `expr` with constants.
pub fn freeze(
    expr: &HostExpr,
    types: &dyn TypeInfoProvider,
    can_evaluate_locally: Option<LocalPredicate<'_>>,
) -> Result<HostExpr> {
    let empty = MemoryDataSource::new();
    let freezer = Freezer {
        types,
        predicate: can_evaluate_locally,
        interpreter: Interpreter::new(&empty),
    };
    freezer.visit(expr)
}

struct Freezer<'a> {
    types: &'a dyn TypeInfoProvider,
    predicate: Option<LocalPredicate<'a>>,
    interpreter: Interpreter<'a>,
}

impl Freezer<'_> {
    fn visit(&self, expr: &HostExpr) -> Result<HostExpr> {
        if !matches!(expr, HostExpr::Constant { .. })
            && is_closed(expr)
            && self.predicate.is_none_or(|p| p(expr))
        {
            let ty = static_type(expr, self.types)?;
            let value = self.interpreter.evaluate(expr)?;
            tracing::trace!("Evaluated {} locally to {}", expr, value);
            return Ok(HostExpr::Constant { value, ty });
        }
        expr.try_map_children(|child| self.visit(child))
    }
}

/// Static type of a closed expression.
fn static_type(expr: &HostExpr, types: &dyn TypeInfoProvider) -> Result<HostType> {
    let of = |e: &HostExpr| static_type(e, types);
    Ok(match expr {
        HostExpr::Constant { ty, .. } => ty.clone(),
        HostExpr::Captured(c) => c.ty.clone(),
        HostExpr::Member { target, member } => member_type(types, &of(target)?, member)?,
        HostExpr::Unary { op, operand } => unary_type(*op, &of(operand)?)?,
        HostExpr::Binary { op, left, right } => binary_type(*op, &of(left)?, &of(right)?)?,
        HostExpr::Conditional {
            if_true, if_false, ..
        } => conditional_type(&of(if_true)?, &of(if_false)?)?,
        HostExpr::Call {
            method: HostMethod::Function(def),
            ..
        } => def.returns.clone(),
        HostExpr::New { members } => HostType::Anonymous(
            members
                .iter()
                .map(|(name, e)| Ok((name.clone(), of(e)?)))
                .collect::<Result<_>>()?,
        ),
        HostExpr::NewArray { element, .. } | HostExpr::ListInit { element, .. } => {
            HostType::seq(element.clone())
        }
        HostExpr::MemberInit { ty, .. } => ty.clone(),
        // Never closed.
        HostExpr::Source(element) => HostType::seq(element.clone()),
        HostExpr::Parameter { ty, .. } => ty.clone(),
        HostExpr::Lambda { .. } | HostExpr::Call { .. } => HostType::Dynamic,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TypeCatalog;
    use crate::host::{FunctionDef, captured, lambda, lit, source};
    use crate::value::Value;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_closed_detection() {
        assert!(is_closed(&lit(1).plus(2)));
        assert!(is_closed(&lit("abc").to_upper()));
        assert!(!is_closed(&source(HostType::Int)));
        assert!(!is_closed(&lambda("x", |x| x.plus(1))));
        let remote = Arc::new(FunctionDef::remote(HostType::Str, "Soundex", HostType::Str));
        assert!(!is_closed(&HostExpr::call(remote, vec![lit("a")])));
    }

    #[test]
    fn test_captured_read_once() {
        let reads = Arc::new(AtomicUsize::new(0));
        let counter = reads.clone();
        let expr = captured("n", HostType::Int, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Value::Int(4)
        })
        .times(10);
        let frozen = freeze(&expr, &TypeCatalog::new(), None).unwrap();
        assert!(matches!(
            frozen,
            HostExpr::Constant {
                value: Value::Int(40),
                ty: HostType::Int
            }
        ));
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_only_maximal_subtrees_inside_lambdas() {
        let expr = source(HostType::Int).filter(lambda("x", |x| x.gt(lit(2).times(3))));
        let frozen = freeze(&expr, &TypeCatalog::new(), None).unwrap();
        assert_eq!(frozen.to_string(), "Source<i64>.Where(x => (x > 6))");
    }
}
