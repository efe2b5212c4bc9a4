//! Linear query values.
//!
//! A [`Query`] is the simple shape most queries take: one source, any number
//! of filters, an ordered list of sort keys, and optional skip/take. Each
//! operator returns a new value; the receiver can be shared and reused.

use crate::ast::{Expr, QueryOp, SortDirection, TypeDescriptor};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    element: TypeDescriptor,
    filters: Vec<Expr>,
    sort_keys: Vec<Expr>,
    skip: Option<u64>,
    take: Option<u64>,
}

impl Query {
    /// Start a query over a source of `element` records.
    pub fn new(element: TypeDescriptor) -> Self {
        Self {
            element,
            filters: vec![],
            sort_keys: vec![],
            skip: None,
            take: None,
        }
    }

    pub fn element(&self) -> &TypeDescriptor {
        &self.element
    }

    pub fn filters(&self) -> &[Expr] {
        &self.filters
    }

    /// Sort keys, primary first.
    pub fn sort_keys(&self) -> &[Expr] {
        &self.sort_keys
    }

    pub fn skip_count(&self) -> Option<u64> {
        self.skip
    }

    pub fn take_count(&self) -> Option<u64> {
        self.take
    }

    /// Add a filter predicate (a lambda over the element).
    pub fn filter(&self, predicate: Expr) -> Self {
        let mut next = self.clone();
        next.filters.push(predicate);
        next
    }

    /// Append a sort key after the existing ones.
    pub fn order_by(&self, key: Expr, direction: SortDirection) -> Self {
        let mut next = self.clone();
        next.sort_keys.push(Expr::sort_key(key, direction));
        next
    }

    /// Set the skip count, replacing any earlier one.
    pub fn skip(&self, count: u64) -> Self {
        let mut next = self.clone();
        next.skip = Some(count);
        next
    }

    /// Set the take count, replacing any earlier one.
    pub fn take(&self, count: u64) -> Self {
        let mut next = self.clone();
        next.take = Some(count);
        next
    }

    /// Build the portable operator chain: source, filters, sort, skip, take.
    pub fn to_expr(&self) -> Expr {
        let ty = TypeDescriptor::sequence(self.element.clone());
        let mut expr = Expr::query(
            QueryOp::Source {
                element: self.element.clone(),
            },
            ty.clone(),
        );
        for predicate in &self.filters {
            expr = Expr::query(
                QueryOp::Filter {
                    source: Box::new(expr),
                    predicate: Box::new(predicate.clone()),
                },
                ty.clone(),
            );
        }
        if !self.sort_keys.is_empty() {
            expr = Expr::query(
                QueryOp::Sort {
                    source: Box::new(expr),
                    keys: self.sort_keys.clone(),
                },
                ty.clone(),
            );
        }
        if let Some(count) = self.skip {
            expr = Expr::query(
                QueryOp::Skip {
                    source: Box::new(expr),
                    count,
                },
                ty.clone(),
            );
        }
        if let Some(count) = self.take {
            expr = Expr::query(
                QueryOp::Take {
                    source: Box::new(expr),
                    count,
                },
                ty,
            );
        }
        expr
    }
}

impl TryFrom<&Expr> for Query {
    type Error = Error;

    /// Recover a [`Query`] from an AST in canonical order
    /// (filters, then sort, then skip, then take).
    fn try_from(expr: &Expr) -> Result<Self> {
        // Stage rank: take=4, skip=3, sort=2, filter=1; walking towards the
        // source, ranks must not increase.
        let mut rank = 5;
        let mut query_take = None;
        let mut query_skip = None;
        let mut sort_keys = vec![];
        let mut filters = vec![];
        let mut current = expr;
        loop {
            let Expr::Query { op, .. } = current else {
                return Err(Error::unsupported(format!("'{}' is not a query", current)));
            };
            let (next_rank, source) = match op {
                QueryOp::Source { element } => {
                    filters.reverse();
                    return Ok(Query {
                        element: element.clone(),
                        filters,
                        sort_keys,
                        skip: query_skip,
                        take: query_take,
                    });
                }
                QueryOp::Take { source, count } => {
                    query_take = Some(*count);
                    (4, source)
                }
                QueryOp::Skip { source, count } => {
                    query_skip = Some(*count);
                    (3, source)
                }
                QueryOp::Sort { source, keys } => {
                    sort_keys = keys.clone();
                    (2, source)
                }
                QueryOp::Filter { source, predicate } => {
                    filters.push((**predicate).clone());
                    (1, source)
                }
                other => {
                    return Err(Error::unsupported(format!(
                        "operator {} has no linear query form",
                        other.name()
                    )));
                }
            };
            if next_rank >= rank && next_rank != 1 {
                return Err(Error::unsupported(format!(
                    "operator {} is out of order for a linear query",
                    op.name()
                )));
            }
            rank = next_rank;
            current = source;
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

    fn key(name: &str) -> Expr {
        Expr::parameter(name, TypeDescriptor::string())
    }

    #[test]
    fn test_skip_and_take_replace() {
        let q = Query::new(person()).skip(5).skip(2).take(10).take(3);
        assert_eq!(q.skip_count(), Some(2));
        assert_eq!(q.take_count(), Some(3));
    }

    #[test]
    fn test_operators_do_not_mutate_receiver() {
        let base = Query::new(person()).order_by(key("a"), SortDirection::Ascending);
        let derived = base.order_by(key("b"), SortDirection::Descending).take(1);
        assert_eq!(base.sort_keys().len(), 1);
        assert_eq!(base.take_count(), None);
        assert_eq!(derived.sort_keys().len(), 2);
    }

    #[test]
    fn test_sort_keys_keep_insertion_order() {
        let q = Query::new(person())
            .order_by(key("primary"), SortDirection::Ascending)
            .order_by(key("secondary"), SortDirection::Descending);
        let rendered: Vec<String> = q.sort_keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(rendered, vec!["primary asc", "secondary desc"]);
    }

    #[test]
    fn test_expr_round_trip() {
        let q = Query::new(person())
            .filter(key("f1"))
            .filter(key("f2"))
            .order_by(key("k"), SortDirection::Ascending)
            .skip(1)
            .take(2);
        let expr = q.to_expr();
        assert_eq!(
            expr.to_string(),
            "Source<shop.Person>.Where(f1).Where(f2).OrderBy(k asc).Skip(1).Take(2)"
        );
        assert_eq!(Query::try_from(&expr).unwrap(), q);
    }

    #[test]
    fn test_try_from_rejects_out_of_order() {
        let take_then_filter = Query::new(person()).take(2).to_expr();
        let expr = Expr::query(
            QueryOp::Filter {
                source: Box::new(take_then_filter),
                predicate: Box::new(key("f")),
            },
            TypeDescriptor::sequence(person()),
        );
        assert!(Query::try_from(&expr).is_err());
    }
}
