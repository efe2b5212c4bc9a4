//! In-memory evaluation of host expressions.
//!
//! The interpreter runs a [`HostExpr`] against a [`DataSource`]. It is the
//! default raw-execution stage of the executor and is also used by the
//! translator to freeze locally evaluable sub-expressions.

use chrono::Datelike;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::ast::{AggregateFunc, BinaryOp, UnaryOp};
use crate::error::{Error, Result};
use crate::host::{HostExpr, HostMethod, HostType, QueryMethod};
use crate::value::{Record, Value};

/// Field names of a group-by result element.
pub const GROUP_KEY: &str = "Key";
pub const GROUP_ELEMENTS: &str = "Elements";

/// Backing data of a query source.
pub trait DataSource: Send + Sync {
    /// All elements of the resource with the given element type.
    fn elements(&self, element: &HostType) -> Result<Vec<Value>>;
}

/// A [`DataSource`] holding rows per record type name.
#[derive(Debug, Clone, Default)]
pub struct MemoryDataSource {
    tables: HashMap<String, Vec<Value>>,
}

impl MemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, record: impl Into<String>, rows: Vec<Value>) -> Self {
        self.insert(record, rows);
        self
    }

    pub fn insert(&mut self, record: impl Into<String>, rows: Vec<Value>) {
        self.tables.insert(record.into(), rows);
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl DataSource for MemoryDataSource {
    fn elements(&self, element: &HostType) -> Result<Vec<Value>> {
        match element {
            HostType::Record(name) => self
                .tables
                .get(name)
                .cloned()
                .ok_or_else(|| Error::execution(format!("no data for '{}'", name))),
            other => Err(Error::execution(format!(
                "cannot query a source of {}",
                other
            ))),
        }
    }
}

type Scope = Vec<(String, Value)>;

/// Evaluates host expressions against a data source.
pub struct Interpreter<'a> {
    source: &'a dyn DataSource,
}

impl<'a> Interpreter<'a> {
    pub fn new(source: &'a dyn DataSource) -> Self {
        Self { source }
    }

    pub fn evaluate(&self, expr: &HostExpr) -> Result<Value> {
        self.eval(expr, &mut Vec::new())
    }

    fn eval(&self, expr: &HostExpr, scope: &mut Scope) -> Result<Value> {
        match expr {
            HostExpr::Constant { value, .. } => Ok(value.clone()),
            HostExpr::Captured(c) => Ok(c.read()),
            HostExpr::Source(element) => Ok(Value::List(self.source.elements(element)?)),
            HostExpr::Parameter { name, .. } => scope
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| Error::execution(format!("unbound parameter '{}'", name))),
            HostExpr::Member { target, member } => {
                let target = self.eval(target, scope)?;
                member_of(&target, member)
            }
            HostExpr::Unary { op, operand } => {
                let v = self.eval(operand, scope)?;
                match (op, v) {
                    (_, Value::Null) => Ok(Value::Null),
                    (UnaryOp::Not, v) => Ok(Value::Bool(!truthy(&v)?)),
                    (UnaryOp::Negate, Value::Int(i)) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| Error::execution("integer overflow")),
                    (UnaryOp::Negate, Value::Float(x)) => Ok(Value::Float(-x)),
                    (UnaryOp::Negate, v) => {
                        Err(Error::execution(format!("cannot negate {}", v.kind())))
                    }
                }
            }
            HostExpr::Binary { op, left, right } => self.binary(*op, left, right, scope),
            HostExpr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                if truthy(&self.eval(test, scope)?)? {
                    self.eval(if_true, scope)
                } else {
                    self.eval(if_false, scope)
                }
            }
            HostExpr::Lambda { .. } => Err(Error::execution(
                "a lambda cannot be evaluated as a value",
            )),
            HostExpr::Call {
                method: HostMethod::Function(def),
                args,
            } => {
                let args = args
                    .iter()
                    .map(|a| self.eval(a, scope))
                    .collect::<Result<Vec<_>>>()?;
                match &def.body {
                    Some(body) => body(&args),
                    None => Err(Error::execution(format!(
                        "function {}.{} has no local implementation",
                        def.declaring, def.name
                    ))),
                }
            }
            HostExpr::Call {
                method: HostMethod::Query(method),
                args,
            } => self.query(expr, *method, args, scope),
            HostExpr::New { members } | HostExpr::MemberInit {
                bindings: members, ..
            } => {
                let mut record = Record::new();
                for (name, value) in members {
                    record.insert(name.clone(), self.eval(value, scope)?);
                }
                Ok(Value::Record(record))
            }
            HostExpr::NewArray { items, .. } | HostExpr::ListInit { items, .. } => Ok(
                Value::List(
                    items
                        .iter()
                        .map(|i| self.eval(i, scope))
                        .collect::<Result<_>>()?,
                ),
            ),
        }
    }

    fn apply(&self, lambda: &HostExpr, args: Vec<Value>, scope: &mut Scope) -> Result<Value> {
        let HostExpr::Lambda { params, body } = lambda else {
            return Err(Error::execution(format!("expected a lambda, got {}", lambda)));
        };
        if params.len() != args.len() {
            return Err(Error::execution(format!(
                "lambda takes {} arguments, got {}",
                params.len(),
                args.len()
            )));
        }
        let depth = scope.len();
        scope.extend(params.iter().map(|(n, _)| n.clone()).zip(args));
        let result = self.eval(body, scope);
        scope.truncate(depth);
        result
    }

    fn sequence(&self, expr: &HostExpr, scope: &mut Scope) -> Result<Vec<Value>> {
        as_sequence(self.eval(expr, scope)?)
    }

    fn count_arg(&self, expr: &HostExpr, scope: &mut Scope) -> Result<usize> {
        match self.eval(expr, scope)? {
            Value::Int(n) => usize::try_from(n)
                .map_err(|_| Error::execution(format!("count must be non-negative, got {}", n))),
            other => Err(Error::execution(format!(
                "count must be an integer, got {}",
                other.kind()
            ))),
        }
    }

    fn binary(
        &self,
        op: BinaryOp,
        left: &HostExpr,
        right: &HostExpr,
        scope: &mut Scope,
    ) -> Result<Value> {
        match op {
            BinaryOp::And => {
                if !truthy(&self.eval(left, scope)?)? {
                    return Ok(Value::Bool(false));
                }
                return Ok(Value::Bool(truthy(&self.eval(right, scope)?)?));
            }
            BinaryOp::Or => {
                if truthy(&self.eval(left, scope)?)? {
                    return Ok(Value::Bool(true));
                }
                return Ok(Value::Bool(truthy(&self.eval(right, scope)?)?));
            }
            BinaryOp::Coalesce => {
                let l = self.eval(left, scope)?;
                if !l.is_null() {
                    return Ok(l);
                }
                return self.eval(right, scope);
            }
            _ => {}
        }

        let l = self.eval(left, scope)?;
        let r = self.eval(right, scope)?;
        match op {
            BinaryOp::Eq => Ok(Value::Bool(l.loose_eq(&r))),
            BinaryOp::Ne => Ok(Value::Bool(!l.loose_eq(&r))),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                if l.is_null() || r.is_null() {
                    return Ok(Value::Bool(false));
                }
                let ord = l.total_cmp(&r);
                Ok(Value::Bool(match op {
                    BinaryOp::Lt => ord == Ordering::Less,
                    BinaryOp::Le => ord != Ordering::Greater,
                    BinaryOp::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }))
            }
            _ => arithmetic(op, l, r),
        }
    }

    fn query(
        &self,
        call: &HostExpr,
        method: QueryMethod,
        args: &[HostExpr],
        scope: &mut Scope,
    ) -> Result<Value> {
        let arg = |i: usize| {
            args.get(i).ok_or_else(|| {
                Error::execution(format!("{} is missing argument {}", method.name(), i))
            })
        };
        match method {
            QueryMethod::Where => {
                let mut out = Vec::new();
                for item in self.sequence(arg(0)?, scope)? {
                    if truthy(&self.apply(arg(1)?, vec![item.clone()], scope)?)? {
                        out.push(item);
                    }
                }
                Ok(Value::List(out))
            }
            QueryMethod::Select => {
                let items = self.sequence(arg(0)?, scope)?;
                let selector = arg(1)?;
                Ok(Value::List(
                    items
                        .into_iter()
                        .map(|item| self.apply(selector, vec![item], scope))
                        .collect::<Result<_>>()?,
                ))
            }
            QueryMethod::SelectMany => {
                let mut out = Vec::new();
                for item in self.sequence(arg(0)?, scope)? {
                    out.extend(as_sequence(self.apply(arg(1)?, vec![item], scope)?)?);
                }
                Ok(Value::List(out))
            }
            QueryMethod::OrderBy
            | QueryMethod::OrderByDescending
            | QueryMethod::ThenBy
            | QueryMethod::ThenByDescending => self.sort(call, scope),
            QueryMethod::Skip => {
                let items = self.sequence(arg(0)?, scope)?;
                let n = self.count_arg(arg(1)?, scope)?;
                Ok(Value::List(items.into_iter().skip(n).collect()))
            }
            QueryMethod::Take => {
                let items = self.sequence(arg(0)?, scope)?;
                let n = self.count_arg(arg(1)?, scope)?;
                Ok(Value::List(items.into_iter().take(n).collect()))
            }
            QueryMethod::GroupBy => {
                let items = self.sequence(arg(0)?, scope)?;
                let key_selector = arg(1)?;
                let element_selector = args.get(2);
                let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
                for item in items {
                    let key = self.apply(key_selector, vec![item.clone()], scope)?;
                    let element = match element_selector {
                        Some(sel) => self.apply(sel, vec![item], scope)?,
                        None => item,
                    };
                    match groups.iter_mut().find(|(k, _)| k.loose_eq(&key)) {
                        Some((_, members)) => members.push(element),
                        None => groups.push((key, vec![element])),
                    }
                }
                Ok(Value::List(
                    groups
                        .into_iter()
                        .map(|(key, elements)| {
                            Value::Record(
                                Record::new()
                                    .field(GROUP_KEY, key)
                                    .field(GROUP_ELEMENTS, Value::List(elements)),
                            )
                        })
                        .collect(),
                ))
            }
            QueryMethod::Join => {
                let outer = self.sequence(arg(0)?, scope)?;
                let inner = self.sequence(arg(1)?, scope)?;
                let inner_keys = inner
                    .iter()
                    .map(|i| self.apply(arg(3)?, vec![i.clone()], scope))
                    .collect::<Result<Vec<_>>>()?;
                let mut out = Vec::new();
                for o in outer {
                    let key = self.apply(arg(2)?, vec![o.clone()], scope)?;
                    if key.is_null() {
                        continue;
                    }
                    for (i, inner_key) in inner.iter().zip(&inner_keys) {
                        if key.loose_eq(inner_key) {
                            out.push(self.apply(arg(4)?, vec![o.clone(), i.clone()], scope)?);
                        }
                    }
                }
                Ok(Value::List(out))
            }
            // Navigation data is already part of the in-memory records.
            QueryMethod::Include | QueryMethod::ThenInclude => self.eval(arg(0)?, scope),
            QueryMethod::Aggregate(func) => {
                let items = self.sequence(arg(0)?, scope)?;
                self.aggregate(func, items, args.get(1), scope)
            }
        }
    }

    fn sort(&self, call: &HostExpr, scope: &mut Scope) -> Result<Value> {
        let mut keys: Vec<(&HostExpr, bool)> = Vec::new();
        let mut current = call;
        let source = loop {
            let (HostExpr::Call { args, .. }, Some(method)) = (current, current.query_method())
            else {
                return Err(Error::execution("ThenBy must follow OrderBy"));
            };
            let (Some(src), Some(key)) = (args.first(), args.get(1)) else {
                return Err(Error::execution(format!("{} needs a key", method.name())));
            };
            match method {
                QueryMethod::OrderBy => {
                    keys.push((key, false));
                    break src;
                }
                QueryMethod::OrderByDescending => {
                    keys.push((key, true));
                    break src;
                }
                QueryMethod::ThenBy => keys.push((key, false)),
                QueryMethod::ThenByDescending => keys.push((key, true)),
                _ => return Err(Error::execution("ThenBy must follow OrderBy")),
            }
            current = src;
        };
        keys.reverse();

        let items = self.sequence(source, scope)?;
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            let k = keys
                .iter()
                .map(|(sel, _)| self.apply(sel, vec![item.clone()], scope))
                .collect::<Result<Vec<_>>>()?;
            keyed.push((k, item));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for (i, (x, y)) in a.iter().zip(b).enumerate() {
                let ord = x.total_cmp(y);
                let ord = if keys[i].1 { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        Ok(Value::List(keyed.into_iter().map(|(_, v)| v).collect()))
    }

    fn aggregate(
        &self,
        func: AggregateFunc,
        items: Vec<Value>,
        argument: Option<&HostExpr>,
        scope: &mut Scope,
    ) -> Result<Value> {
        let matching = |items: Vec<Value>, scope: &mut Scope| -> Result<Vec<Value>> {
            match argument {
                Some(pred) => {
                    let mut out = Vec::new();
                    for item in items {
                        if truthy(&self.apply(pred, vec![item.clone()], scope)?)? {
                            out.push(item);
                        }
                    }
                    Ok(out)
                }
                None => Ok(items),
            }
        };
        let selected = |items: Vec<Value>, scope: &mut Scope| -> Result<Vec<Value>> {
            let values = match argument {
                Some(sel) => items
                    .into_iter()
                    .map(|item| self.apply(sel, vec![item], scope))
                    .collect::<Result<Vec<_>>>()?,
                None => items,
            };
            Ok(values.into_iter().filter(|v| !v.is_null()).collect())
        };
        let empty = || Error::execution("sequence contains no elements");

        match func {
            AggregateFunc::Count => Ok(Value::Int(matching(items, scope)?.len() as i64)),
            AggregateFunc::Any => Ok(Value::Bool(!matching(items, scope)?.is_empty())),
            AggregateFunc::All => {
                let total = items.len();
                Ok(Value::Bool(matching(items, scope)?.len() == total))
            }
            AggregateFunc::Sum => sum(selected(items, scope)?),
            AggregateFunc::Min => selected(items, scope)?
                .into_iter()
                .min_by(|a, b| a.total_cmp(b))
                .ok_or_else(empty),
            AggregateFunc::Max => selected(items, scope)?
                .into_iter()
                .max_by(|a, b| a.total_cmp(b))
                .ok_or_else(empty),
            AggregateFunc::Average => {
                let values = selected(items, scope)?;
                if values.is_empty() {
                    return Err(empty());
                }
                let mut total = 0.0;
                for v in &values {
                    total += v.as_f64().ok_or_else(|| {
                        Error::execution(format!("cannot average {}", v.kind()))
                    })?;
                }
                Ok(Value::Float(total / values.len() as f64))
            }
            AggregateFunc::First => matching(items, scope)?
                .into_iter()
                .next()
                .ok_or_else(|| Error::execution("sequence contains no matching element")),
            AggregateFunc::FirstOrDefault => Ok(matching(items, scope)?
                .into_iter()
                .next()
                .unwrap_or(Value::Null)),
            AggregateFunc::Single | AggregateFunc::SingleOrDefault => {
                let mut found = matching(items, scope)?.into_iter();
                match (found.next(), found.next()) {
                    (Some(v), None) => Ok(v),
                    (None, _) if func == AggregateFunc::SingleOrDefault => Ok(Value::Null),
                    (None, _) => Err(Error::execution("sequence contains no matching element")),
                    (Some(_), Some(_)) => Err(Error::execution(
                        "sequence contains more than one matching element",
                    )),
                }
            }
        }
    }
}

/// View a value as a sequence. Groups enumerate their elements and null is
/// the empty sequence.
pub fn as_sequence(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items),
        Value::Null => Ok(vec![]),
        Value::Record(mut r) => match r.fields.shift_remove(GROUP_ELEMENTS) {
            Some(Value::List(items)) if r.fields.contains_key(GROUP_KEY) => Ok(items),
            _ => Err(Error::execution("record is not a sequence")),
        },
        other => Err(Error::execution(format!("{} is not a sequence", other.kind()))),
    }
}

fn truthy(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(Error::execution(format!(
            "expected a boolean, got {}",
            other.kind()
        ))),
    }
}

fn member_of(target: &Value, member: &str) -> Result<Value> {
    match (target, member) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::Record(r), _) => Ok(r.lookup(member).cloned().unwrap_or(Value::Null)),
        (Value::Str(s), "Length") => Ok(Value::Int(s.chars().count() as i64)),
        (Value::List(items), "Count") => Ok(Value::Int(items.len() as i64)),
        (Value::Timestamp(t), "Year") => Ok(Value::Int(t.year() as i64)),
        (Value::Timestamp(t), "Month") => Ok(Value::Int(t.month() as i64)),
        (Value::Timestamp(t), "Day") => Ok(Value::Int(t.day() as i64)),
        (other, _) => Err(Error::execution(format!(
            "{} has no member '{}'",
            other.kind(),
            member
        ))),
    }
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

fn arithmetic(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    let overflow = || Error::execution(format!("integer overflow in {}", op));
    match (l, r) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (l @ Value::Str(_), r) | (l, r @ Value::Str(_)) if op == BinaryOp::Add => {
            Ok(Value::Str(format!("{}{}", plain_text(&l), plain_text(&r))))
        }
        (Value::Int(a), Value::Int(b)) => match op {
            BinaryOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Div | BinaryOp::Rem if b == 0 => {
                Err(Error::execution("division by zero"))
            }
            BinaryOp::Div => a.checked_div(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Rem => a.checked_rem(b).map(Value::Int).ok_or_else(overflow),
            _ => Err(Error::execution(format!("unsupported operator {}", op))),
        },
        (l, r) => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Rem => a % b,
                _ => return Err(Error::execution(format!("unsupported operator {}", op))),
            })),
            _ => Err(Error::execution(format!(
                "cannot apply {} to {} and {}",
                op,
                l.kind(),
                r.kind()
            ))),
        },
    }
}

fn sum(values: Vec<Value>) -> Result<Value> {
    if values.iter().all(|v| matches!(v, Value::Int(_))) {
        let mut total: i64 = 0;
        for v in values {
            if let Value::Int(i) = v {
                total = total
                    .checked_add(i)
                    .ok_or_else(|| Error::execution("integer overflow in Sum"))?;
            }
        }
        return Ok(Value::Int(total));
    }
    let mut total = 0.0;
    for v in &values {
        total += v
            .as_f64()
            .ok_or_else(|| Error::execution(format!("cannot sum {}", v.kind())))?;
    }
    Ok(Value::Float(total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{lambda, lambda2, lit, source};
    use pretty_assertions::assert_eq;

    fn people() -> MemoryDataSource {
        let person = |name: &str, age: i64, city: &str| {
            Value::Record(
                Record::new()
                    .field("Name", name)
                    .field("Age", age)
                    .field("City", city),
            )
        };
        MemoryDataSource::new()
            .with(
                "shop.Person",
                vec![
                    person("Ann", 31, "Oslo"),
                    person("Bob", 25, "Rome"),
                    person("Cid", 31, "Rome"),
                    person("Dee", 19, "Oslo"),
                ],
            )
            .with(
                "shop.City",
                vec![
                    Value::Record(Record::new().field("Name", "Oslo").field("Country", "NO")),
                    Value::Record(Record::new().field("Name", "Rome").field("Country", "IT")),
                ],
            )
    }

    fn persons() -> HostExpr {
        source(HostType::record("shop.Person"))
    }

    fn names(value: Value) -> Vec<String> {
        as_sequence(value)
            .unwrap()
            .iter()
            .map(|v| match v {
                Value::Record(r) => r.get("Name").and_then(Value::as_str).unwrap().to_string(),
                Value::Str(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_filter_sort_page() {
        let data = people();
        let expr = persons()
            .filter(lambda("p", |p| p.member("Age").gt(20)))
            .order_by_desc(lambda("p", |p| p.member("Age")))
            .then_by(lambda("p", |p| p.member("Name")))
            .skip(1)
            .take(2);
        let result = Interpreter::new(&data).evaluate(&expr).unwrap();
        assert_eq!(names(result), vec!["Cid", "Bob"]);
    }

    #[test]
    fn test_group_by_and_count() {
        let data = people();
        let expr = persons()
            .group_by(lambda("p", |p| p.member("City")))
            .select(lambda("g", |g| {
                HostExpr::new_object(vec![
                    ("City", g.clone().member("Key")),
                    ("Total", g.count()),
                ])
            }));
        let result = Interpreter::new(&data).evaluate(&expr).unwrap();
        let expected = Value::List(vec![
            Value::Record(Record::new().field("City", "Oslo").field("Total", 2)),
            Value::Record(Record::new().field("City", "Rome").field("Total", 2)),
        ]);
        assert_eq!(result, expected);
    }

    #[test]
    fn test_join() {
        let data = people();
        let cities = source(HostType::record("shop.City"));
        let expr = persons()
            .join(
                cities,
                lambda("p", |p| p.member("City")),
                lambda("c", |c| c.member("Name")),
                lambda2("p", "c", |p, c| p.member("Name").plus("@").plus(c.member("Country"))),
            )
            .take(2);
        let result = Interpreter::new(&data).evaluate(&expr).unwrap();
        assert_eq!(names(result), vec!["Ann@NO", "Bob@IT"]);
    }

    #[test]
    fn test_aggregates() {
        let data = people();
        let interp = Interpreter::new(&data);
        let age = || lambda("p", |p| p.member("Age"));
        assert_eq!(interp.evaluate(&persons().sum(age())).unwrap(), Value::Int(106));
        assert_eq!(
            interp
                .evaluate(&persons().aggregate(AggregateFunc::Max, Some(age())))
                .unwrap(),
            Value::Int(31)
        );
        assert_eq!(
            interp
                .evaluate(&persons().aggregate(AggregateFunc::Average, Some(age())))
                .unwrap(),
            Value::Float(26.5)
        );
        let nobody = persons().filter(lambda("p", |p| p.member("Age").gt(100)));
        assert_eq!(
            interp
                .evaluate(&nobody.clone().aggregate(AggregateFunc::FirstOrDefault, None))
                .unwrap(),
            Value::Null
        );
        assert!(interp
            .evaluate(&nobody.aggregate(AggregateFunc::Single, None))
            .is_err());
    }

    #[test]
    fn test_string_concat_and_null_propagation() {
        let data = MemoryDataSource::new();
        let interp = Interpreter::new(&data);
        assert_eq!(
            interp.evaluate(&lit("a").plus(1)).unwrap(),
            Value::from("a1")
        );
        assert_eq!(
            interp.evaluate(&lit(Value::Null).member("Name")).unwrap(),
            Value::Null
        );
        assert!(interp.evaluate(&lit(1).over(0)).is_err());
    }

    #[test]
    fn test_then_by_without_order_by_fails() {
        let data = people();
        let expr = persons().then_by(lambda("p", |p| p.member("Name")));
        assert!(Interpreter::new(&data).evaluate(&expr).is_err());
    }
}
