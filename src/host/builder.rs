//! Fluent construction of host expressions.
//!
//! ```rust,ignore
//! let adults = provider
//!     .query::<Person>(HostType::record("shop.Person"))
//!     .filter(lambda("p", |p| p.member("Age").ge(18)))
//!     .order_by(lambda("p", |p| p.member("Name")))
//!     .to_vec()?;
//! ```

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::marker::PhantomData;
use std::sync::Arc;

use super::{Captured, FunctionDef, HostExpr, HostMethod, HostType, QueryMethod};
use crate::ast::{AggregateFunc, BinaryOp, UnaryOp};
use crate::cancel::Cancellation;
use crate::catalog;
use crate::error::Result;
use crate::mapper::FromRaw;
use crate::provider::QueryProvider;
use crate::value::Value;

/// Static type of a literal value.
fn literal_type(value: &Value) -> HostType {
    match value {
        Value::Null => HostType::optional(HostType::Dynamic),
        Value::Bool(_) => HostType::Bool,
        Value::Int(_) => HostType::Int,
        Value::Float(_) => HostType::Float,
        Value::Str(_) => HostType::Str,
        Value::Timestamp(_) => HostType::Timestamp,
        Value::List(items) => {
            HostType::seq(items.first().map(literal_type).unwrap_or(HostType::Dynamic))
        }
        Value::Record(_) | Value::Ref(_) => HostType::Dynamic,
    }
}

/// A literal whose type follows from its value.
pub fn lit(value: impl Into<Value>) -> HostExpr {
    let value = value.into();
    HostExpr::Constant {
        ty: literal_type(&value),
        value,
    }
}

/// A literal with an explicit type (e.g. a typed null).
pub fn constant(value: impl Into<Value>, ty: HostType) -> HostExpr {
    HostExpr::Constant {
        value: value.into(),
        ty,
    }
}

/// A value read from the caller's environment at evaluation time.
pub fn captured<F>(name: &str, ty: HostType, read: F) -> HostExpr
where
    F: Fn() -> Value + Send + Sync + 'static,
{
    HostExpr::Captured(Captured::new(name, ty, read))
}

pub fn param(name: &str, ty: HostType) -> HostExpr {
    HostExpr::Parameter {
        name: name.to_string(),
        ty,
    }
}

/// The queryable resource of `element` records.
pub fn source(element: HostType) -> HostExpr {
    HostExpr::Source(element)
}

/// One-parameter lambda whose parameter type is bound by the operator it
/// is passed to.
pub fn lambda(name: &str, body: impl FnOnce(HostExpr) -> HostExpr) -> HostExpr {
    typed_lambda(name, HostType::Infer, body)
}

pub fn typed_lambda(
    name: &str,
    ty: HostType,
    body: impl FnOnce(HostExpr) -> HostExpr,
) -> HostExpr {
    let body = body(param(name, ty.clone()));
    HostExpr::Lambda {
        params: vec![(name.to_string(), ty)],
        body: Box::new(body),
    }
}

/// Two-parameter lambda, used for join result selectors.
pub fn lambda2(
    a: &str,
    b: &str,
    body: impl FnOnce(HostExpr, HostExpr) -> HostExpr,
) -> HostExpr {
    let body = body(param(a, HostType::Infer), param(b, HostType::Infer));
    HostExpr::Lambda {
        params: vec![(a.to_string(), HostType::Infer), (b.to_string(), HostType::Infer)],
        body: Box::new(body),
    }
}

impl From<bool> for HostExpr {
    fn from(v: bool) -> Self {
        lit(v)
    }
}

impl From<i32> for HostExpr {
    fn from(v: i32) -> Self {
        lit(v)
    }
}

impl From<i64> for HostExpr {
    fn from(v: i64) -> Self {
        lit(v)
    }
}

impl From<f64> for HostExpr {
    fn from(v: f64) -> Self {
        lit(v)
    }
}

impl From<&str> for HostExpr {
    fn from(v: &str) -> Self {
        lit(v)
    }
}

impl From<String> for HostExpr {
    fn from(v: String) -> Self {
        lit(v)
    }
}

impl From<DateTime<Utc>> for HostExpr {
    fn from(v: DateTime<Utc>) -> Self {
        lit(v)
    }
}

impl From<Value> for HostExpr {
    fn from(v: Value) -> Self {
        lit(v)
    }
}

impl HostExpr {
    fn binary(self, op: BinaryOp, right: impl Into<HostExpr>) -> HostExpr {
        HostExpr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right.into()),
        }
    }

    fn query_call(self, method: QueryMethod, mut args: Vec<HostExpr>) -> HostExpr {
        args.insert(0, self);
        HostExpr::Call {
            method: HostMethod::Query(method),
            args,
        }
    }

    fn builtin_call(self, declaring: HostType, name: &str, returns: HostType, rest: Vec<HostExpr>) -> HostExpr {
        let def = catalog::builtin(&declaring, name)
            .unwrap_or_else(|| Arc::new(FunctionDef::remote(declaring, name, returns)));
        let mut args = vec![self];
        args.extend(rest);
        HostExpr::call(def, args)
    }

    /// Call a non-query function.
    pub fn call(def: Arc<FunctionDef>, args: Vec<HostExpr>) -> HostExpr {
        HostExpr::Call {
            method: HostMethod::Function(def),
            args,
        }
    }

    /// `test ? if_true : if_false`
    pub fn conditional(
        test: HostExpr,
        if_true: impl Into<HostExpr>,
        if_false: impl Into<HostExpr>,
    ) -> HostExpr {
        HostExpr::Conditional {
            test: Box::new(test),
            if_true: Box::new(if_true.into()),
            if_false: Box::new(if_false.into()),
        }
    }

    /// Anonymous object: `new { name = expr, ... }`.
    pub fn new_object(members: Vec<(&str, HostExpr)>) -> HostExpr {
        HostExpr::New {
            members: members
                .into_iter()
                .map(|(n, e)| (n.to_string(), e))
                .collect(),
        }
    }

    /// Named record construction.
    pub fn member_init(ty: HostType, bindings: Vec<(&str, HostExpr)>) -> HostExpr {
        HostExpr::MemberInit {
            ty,
            bindings: bindings
                .into_iter()
                .map(|(n, e)| (n.to_string(), e))
                .collect(),
        }
    }

    pub fn new_array(element: HostType, items: Vec<HostExpr>) -> HostExpr {
        HostExpr::NewArray { element, items }
    }

    pub fn list_init(element: HostType, items: Vec<HostExpr>) -> HostExpr {
        HostExpr::ListInit { element, items }
    }

    pub fn member(self, name: &str) -> HostExpr {
        HostExpr::Member {
            target: Box::new(self),
            member: name.to_string(),
        }
    }

    pub fn equals(self, other: impl Into<HostExpr>) -> HostExpr {
        self.binary(BinaryOp::Eq, other)
    }

    pub fn not_equals(self, other: impl Into<HostExpr>) -> HostExpr {
        self.binary(BinaryOp::Ne, other)
    }

    pub fn lt(self, other: impl Into<HostExpr>) -> HostExpr {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn le(self, other: impl Into<HostExpr>) -> HostExpr {
        self.binary(BinaryOp::Le, other)
    }

    pub fn gt(self, other: impl Into<HostExpr>) -> HostExpr {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn ge(self, other: impl Into<HostExpr>) -> HostExpr {
        self.binary(BinaryOp::Ge, other)
    }

    pub fn and(self, other: impl Into<HostExpr>) -> HostExpr {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: impl Into<HostExpr>) -> HostExpr {
        self.binary(BinaryOp::Or, other)
    }

    pub fn plus(self, other: impl Into<HostExpr>) -> HostExpr {
        self.binary(BinaryOp::Add, other)
    }

    pub fn minus(self, other: impl Into<HostExpr>) -> HostExpr {
        self.binary(BinaryOp::Sub, other)
    }

    pub fn times(self, other: impl Into<HostExpr>) -> HostExpr {
        self.binary(BinaryOp::Mul, other)
    }

    pub fn over(self, other: impl Into<HostExpr>) -> HostExpr {
        self.binary(BinaryOp::Div, other)
    }

    pub fn modulo(self, other: impl Into<HostExpr>) -> HostExpr {
        self.binary(BinaryOp::Rem, other)
    }

    /// `self ?? fallback`
    pub fn coalesce(self, fallback: impl Into<HostExpr>) -> HostExpr {
        self.binary(BinaryOp::Coalesce, fallback)
    }

    pub fn not(self) -> HostExpr {
        HostExpr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    pub fn negate(self) -> HostExpr {
        HostExpr::Unary {
            op: UnaryOp::Negate,
            operand: Box::new(self),
        }
    }

    pub fn contains(self, needle: impl Into<HostExpr>) -> HostExpr {
        self.builtin_call(HostType::Str, "Contains", HostType::Bool, vec![needle.into()])
    }

    pub fn starts_with(self, prefix: impl Into<HostExpr>) -> HostExpr {
        self.builtin_call(HostType::Str, "StartsWith", HostType::Bool, vec![prefix.into()])
    }

    pub fn ends_with(self, suffix: impl Into<HostExpr>) -> HostExpr {
        self.builtin_call(HostType::Str, "EndsWith", HostType::Bool, vec![suffix.into()])
    }

    pub fn to_upper(self) -> HostExpr {
        self.builtin_call(HostType::Str, "ToUpper", HostType::Str, vec![])
    }

    pub fn to_lower(self) -> HostExpr {
        self.builtin_call(HostType::Str, "ToLower", HostType::Str, vec![])
    }

    // Query operators. `self` is the source sequence.

    pub fn filter(self, predicate: HostExpr) -> HostExpr {
        self.query_call(QueryMethod::Where, vec![predicate])
    }

    pub fn select(self, selector: HostExpr) -> HostExpr {
        self.query_call(QueryMethod::Select, vec![selector])
    }

    pub fn select_many(self, selector: HostExpr) -> HostExpr {
        self.query_call(QueryMethod::SelectMany, vec![selector])
    }

    pub fn order_by(self, key: HostExpr) -> HostExpr {
        self.query_call(QueryMethod::OrderBy, vec![key])
    }

    pub fn order_by_desc(self, key: HostExpr) -> HostExpr {
        self.query_call(QueryMethod::OrderByDescending, vec![key])
    }

    pub fn then_by(self, key: HostExpr) -> HostExpr {
        self.query_call(QueryMethod::ThenBy, vec![key])
    }

    pub fn then_by_desc(self, key: HostExpr) -> HostExpr {
        self.query_call(QueryMethod::ThenByDescending, vec![key])
    }

    pub fn skip(self, count: impl Into<HostExpr>) -> HostExpr {
        self.query_call(QueryMethod::Skip, vec![count.into()])
    }

    pub fn take(self, count: impl Into<HostExpr>) -> HostExpr {
        self.query_call(QueryMethod::Take, vec![count.into()])
    }

    pub fn group_by(self, key: HostExpr) -> HostExpr {
        self.query_call(QueryMethod::GroupBy, vec![key])
    }

    pub fn group_by_element(self, key: HostExpr, element: HostExpr) -> HostExpr {
        self.query_call(QueryMethod::GroupBy, vec![key, element])
    }

    pub fn join(
        self,
        inner: HostExpr,
        outer_key: HostExpr,
        inner_key: HostExpr,
        result: HostExpr,
    ) -> HostExpr {
        self.query_call(QueryMethod::Join, vec![inner, outer_key, inner_key, result])
    }

    /// Eager-load the navigation selected by `navigation`.
    pub fn include(self, navigation: HostExpr) -> HostExpr {
        self.query_call(QueryMethod::Include, vec![navigation])
    }

    /// Eager-load a dotted navigation path.
    pub fn include_path(self, path: &str) -> HostExpr {
        self.query_call(QueryMethod::Include, vec![lit(path)])
    }

    /// Extend the preceding include with a further navigation.
    pub fn then_include(self, navigation: HostExpr) -> HostExpr {
        self.query_call(QueryMethod::ThenInclude, vec![navigation])
    }

    pub fn aggregate(self, func: AggregateFunc, argument: Option<HostExpr>) -> HostExpr {
        self.query_call(QueryMethod::Aggregate(func), argument.into_iter().collect())
    }

    pub fn count(self) -> HostExpr {
        self.aggregate(AggregateFunc::Count, None)
    }

    pub fn sum(self, selector: HostExpr) -> HostExpr {
        self.aggregate(AggregateFunc::Sum, Some(selector))
    }

    pub fn any(self, predicate: HostExpr) -> HostExpr {
        self.aggregate(AggregateFunc::Any, Some(predicate))
    }
}

/// A composable, immutable query bound to a [`QueryProvider`].
///
/// Every operator returns a new queryable; the receiver stays usable, so a
/// base query can be shared between derived ones.
pub struct Queryable<T> {
    expr: HostExpr,
    provider: QueryProvider,
    marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Queryable<T> {
    fn clone(&self) -> Self {
        Self {
            expr: self.expr.clone(),
            provider: self.provider.clone(),
            marker: PhantomData,
        }
    }
}

impl<T> Queryable<T> {
    pub fn new(provider: QueryProvider, element: HostType) -> Self {
        Self {
            expr: source(element),
            provider,
            marker: PhantomData,
        }
    }

    pub fn expr(&self) -> &HostExpr {
        &self.expr
    }

    pub fn provider(&self) -> &QueryProvider {
        &self.provider
    }

    fn chain<U>(&self, build: impl FnOnce(HostExpr) -> HostExpr) -> Queryable<U> {
        Queryable {
            expr: build(self.expr.clone()),
            provider: self.provider.clone(),
            marker: PhantomData,
        }
    }

    pub fn filter(&self, predicate: HostExpr) -> Self {
        self.chain(|e| e.filter(predicate))
    }

    pub fn select<U>(&self, selector: HostExpr) -> Queryable<U> {
        self.chain(|e| e.select(selector))
    }

    pub fn select_many<U>(&self, selector: HostExpr) -> Queryable<U> {
        self.chain(|e| e.select_many(selector))
    }

    pub fn order_by(&self, key: HostExpr) -> Self {
        self.chain(|e| e.order_by(key))
    }

    pub fn order_by_desc(&self, key: HostExpr) -> Self {
        self.chain(|e| e.order_by_desc(key))
    }

    pub fn then_by(&self, key: HostExpr) -> Self {
        self.chain(|e| e.then_by(key))
    }

    pub fn then_by_desc(&self, key: HostExpr) -> Self {
        self.chain(|e| e.then_by_desc(key))
    }

    pub fn skip(&self, count: impl Into<HostExpr>) -> Self {
        self.chain(|e| e.skip(count))
    }

    pub fn take(&self, count: impl Into<HostExpr>) -> Self {
        self.chain(|e| e.take(count))
    }

    pub fn group_by<U>(&self, key: HostExpr) -> Queryable<U> {
        self.chain(|e| e.group_by(key))
    }

    pub fn join<I, U>(
        &self,
        inner: &Queryable<I>,
        outer_key: HostExpr,
        inner_key: HostExpr,
        result: HostExpr,
    ) -> Queryable<U> {
        let inner = inner.expr.clone();
        self.chain(|e| e.join(inner, outer_key, inner_key, result))
    }

    pub fn include(&self, navigation: HostExpr) -> Self {
        self.chain(|e| e.include(navigation))
    }

    pub fn include_path(&self, path: &str) -> Self {
        self.chain(|e| e.include_path(path))
    }

    pub fn then_include(&self, navigation: HostExpr) -> Self {
        self.chain(|e| e.then_include(navigation))
    }

    fn terminal(&self, func: AggregateFunc, argument: Option<HostExpr>) -> HostExpr {
        self.expr.clone().aggregate(func, argument)
    }

    pub fn to_vec(&self) -> Result<Vec<T>>
    where
        T: FromRaw,
    {
        self.provider.execute(&self.expr)
    }

    pub fn first(&self) -> Result<T>
    where
        T: FromRaw,
    {
        self.provider.execute(&self.terminal(AggregateFunc::First, None))
    }

    pub fn first_or_default(&self) -> Result<Option<T>>
    where
        T: FromRaw,
    {
        self.provider
            .execute(&self.terminal(AggregateFunc::FirstOrDefault, None))
    }

    pub fn single(&self) -> Result<T>
    where
        T: FromRaw,
    {
        self.provider.execute(&self.terminal(AggregateFunc::Single, None))
    }

    pub fn count(&self) -> Result<i64> {
        self.provider.execute(&self.terminal(AggregateFunc::Count, None))
    }

    pub fn any(&self, predicate: HostExpr) -> Result<bool> {
        self.provider
            .execute(&self.terminal(AggregateFunc::Any, Some(predicate)))
    }

    pub async fn to_vec_async(&self, cancel: &Cancellation) -> Result<Vec<T>>
    where
        T: FromRaw,
    {
        self.provider.execute_async(&self.expr, cancel).await
    }

    pub async fn first_async(&self, cancel: &Cancellation) -> Result<T>
    where
        T: FromRaw,
    {
        self.provider
            .execute_async(&self.terminal(AggregateFunc::First, None), cancel)
            .await
    }

    pub async fn count_async(&self, cancel: &Cancellation) -> Result<i64> {
        self.provider
            .execute_async(&self.terminal(AggregateFunc::Count, None), cancel)
            .await
    }

    /// Lazily stream the elements; nothing is sent until the first poll.
    pub fn stream(&self, cancel: Cancellation) -> BoxStream<'static, Result<T>>
    where
        T: FromRaw + Send + 'static,
    {
        self.provider.execute_stream(&self.expr, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lambda_binds_parameter() {
        let l = lambda("p", |p| p.member("Age").gt(18));
        assert_eq!(l.to_string(), "p => (p.Age > 18)");
    }

    #[test]
    fn test_query_call_chain() {
        let q = source(HostType::record("shop.Person"))
            .filter(lambda("p", |p| p.member("Name").contains("a")))
            .order_by(lambda("p", |p| p.member("Name")))
            .take(3);
        assert_eq!(q.query_method(), Some(QueryMethod::Take));
        assert_eq!(
            q.to_string(),
            "Source<shop.Person>.Where(p => String.Contains(p.Name, 'a')).OrderBy(p => p.Name).Take(3)"
        );
    }

    #[test]
    fn test_literal_types() {
        match lit(2.5) {
            HostExpr::Constant { ty, .. } => assert_eq!(ty, HostType::Float),
            other => panic!("unexpected {}", other),
        }
        match lit(Value::Null) {
            HostExpr::Constant { ty, .. } => {
                assert_eq!(ty, HostType::optional(HostType::Dynamic))
            }
            other => panic!("unexpected {}", other),
        }
    }
}
