//! Query operator nodes.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Expr;
use super::types::TypeDescriptor;

/// One stage of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryOp {
    /// The queryable resource itself.
    Source { element: TypeDescriptor },
    Filter {
        source: Box<Expr>,
        /// Lambda `element -> bool`.
        predicate: Box<Expr>,
    },
    Project {
        source: Box<Expr>,
        /// Lambda `element -> result`, or `element -> sequence` when `many`.
        selector: Box<Expr>,
        many: bool,
    },
    Sort {
        source: Box<Expr>,
        /// [`Expr::SortKey`] nodes, primary key first.
        keys: Vec<Expr>,
    },
    Skip { source: Box<Expr>, count: u64 },
    Take { source: Box<Expr>, count: u64 },
    GroupBy {
        source: Box<Expr>,
        key: Box<Expr>,
        element: Option<Box<Expr>>,
    },
    /// Inner equi-join.
    Join {
        outer: Box<Expr>,
        inner: Box<Expr>,
        outer_key: Box<Expr>,
        inner_key: Box<Expr>,
        /// Lambda `(outer, inner) -> result`.
        result: Box<Expr>,
    },
    /// Eager-load a dotted navigation path.
    Include { source: Box<Expr>, path: String },
    Aggregate {
        source: Box<Expr>,
        func: AggregateFunc,
        argument: Option<Box<Expr>>,
    },
}

impl QueryOp {
    /// Name of the operator as it appears in renderings.
    pub fn name(&self) -> &'static str {
        match self {
            QueryOp::Source { .. } => "Source",
            QueryOp::Filter { .. } => "Where",
            QueryOp::Project { many: false, .. } => "Select",
            QueryOp::Project { many: true, .. } => "SelectMany",
            QueryOp::Sort { .. } => "OrderBy",
            QueryOp::Skip { .. } => "Skip",
            QueryOp::Take { .. } => "Take",
            QueryOp::GroupBy { .. } => "GroupBy",
            QueryOp::Join { .. } => "Join",
            QueryOp::Include { .. } => "Include",
            QueryOp::Aggregate { func, .. } => func.name(),
        }
    }

    /// The upstream query this operator consumes, if any.
    pub fn source(&self) -> Option<&Expr> {
        match self {
            QueryOp::Source { .. } => None,
            QueryOp::Filter { source, .. }
            | QueryOp::Project { source, .. }
            | QueryOp::Sort { source, .. }
            | QueryOp::Skip { source, .. }
            | QueryOp::Take { source, .. }
            | QueryOp::GroupBy { source, .. }
            | QueryOp::Include { source, .. }
            | QueryOp::Aggregate { source, .. } => Some(source),
            QueryOp::Join { outer, .. } => Some(outer),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Ascending => write!(f, "asc"),
            SortDirection::Descending => write!(f, "desc"),
        }
    }
}

/// Terminal operators producing a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunc {
    Count,
    Sum,
    Min,
    Max,
    Average,
    Any,
    All,
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
}

impl AggregateFunc {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "Count",
            AggregateFunc::Sum => "Sum",
            AggregateFunc::Min => "Min",
            AggregateFunc::Max => "Max",
            AggregateFunc::Average => "Average",
            AggregateFunc::Any => "Any",
            AggregateFunc::All => "All",
            AggregateFunc::First => "First",
            AggregateFunc::FirstOrDefault => "FirstOrDefault",
            AggregateFunc::Single => "Single",
            AggregateFunc::SingleOrDefault => "SingleOrDefault",
        }
    }

    /// Whether the optional argument is a predicate rather than a selector.
    pub fn takes_predicate(&self) -> bool {
        !matches!(
            self,
            AggregateFunc::Sum | AggregateFunc::Min | AggregateFunc::Max | AggregateFunc::Average
        )
    }
}

impl fmt::Display for AggregateFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
