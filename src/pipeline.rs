//! Server-side execution pipeline.
//!
//! An [`ExpressionExecutor`] runs a received portable expression through a
//! fixed sequence of stages. Each stage is a hook slot:
//!
//! | Stage              | Signature                       | Slot        |
//! |--------------------|---------------------------------|-------------|
//! | AST preparation    | `Expr -> Expr`                  | chained     |
//! | transform          | `&Expr -> HostExpr`             | replaceable |
//! | host preparation   | `HostExpr -> HostExpr`          | chained     |
//! | raw execution      | `&HostExpr -> Value`            | replaceable |
//! | result processing  | `Value -> Value`                | chained     |
//! | projection         | `Value -> Vec<Value>`           | replaceable |
//! | records processing | `Vec<Value> -> Vec<Value>`      | chained     |
//!
//! Chained hooks run in installation order, each receiving the previous
//! output. A replaceable slot keeps the last hook installed; an empty slot
//! uses the default behavior when the pipeline runs.

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;

use crate::ast::Expr;
use crate::cancel::Cancellation;
use crate::catalog::TypeInfoProvider;
use crate::error::Result;
use crate::host::HostExpr;
use crate::interpreter::{DataSource, Interpreter};
use crate::provider::{AsyncDataProvider, DataProvider, StreamDataProvider};
use crate::translator::translate_back;
use crate::value::{self, Value};

pub type AstHook = Arc<dyn Fn(Expr) -> Result<Expr> + Send + Sync>;
pub type TransformHook = Arc<dyn Fn(&Expr) -> Result<HostExpr> + Send + Sync>;
pub type HostHook = Arc<dyn Fn(HostExpr) -> Result<HostExpr> + Send + Sync>;
pub type ExecutionHook = Arc<dyn Fn(&HostExpr) -> Result<Value> + Send + Sync>;
pub type ResultHook = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;
pub type ProjectionHook = Arc<dyn Fn(Value) -> Result<Vec<Value>> + Send + Sync>;
pub type RecordsHook = Arc<dyn Fn(Vec<Value>) -> Result<Vec<Value>> + Send + Sync>;

/// Split a raw result into records: list items, nothing for null, or the
/// value itself.
pub fn default_projection(raw: Value) -> Result<Vec<Value>> {
    Ok(match raw {
        Value::List(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    })
}

/// Executes portable expressions against a [`DataSource`].
#[derive(Clone)]
pub struct ExpressionExecutor {
    types: Arc<dyn TypeInfoProvider>,
    source: Arc<dyn DataSource>,
    ast_preparation: Vec<AstHook>,
    transform: Option<TransformHook>,
    host_preparation: Vec<HostHook>,
    execution: Option<ExecutionHook>,
    result_processing: Vec<ResultHook>,
    projection: Option<ProjectionHook>,
    records_processing: Vec<RecordsHook>,
}

impl ExpressionExecutor {
    /// An executor with every slot empty.
    pub fn new(types: Arc<dyn TypeInfoProvider>, source: Arc<dyn DataSource>) -> Self {
        Self {
            types,
            source,
            ast_preparation: Vec::new(),
            transform: None,
            host_preparation: Vec::new(),
            execution: None,
            result_processing: Vec::new(),
            projection: None,
            records_processing: Vec::new(),
        }
    }

    pub fn builder(
        types: Arc<dyn TypeInfoProvider>,
        source: Arc<dyn DataSource>,
    ) -> ExpressionExecutorBuilder {
        ExpressionExecutorBuilder {
            executor: Self::new(types, source),
        }
    }

    pub fn types(&self) -> &Arc<dyn TypeInfoProvider> {
        &self.types
    }

    /// Run the full pipeline. Collection-typed expressions produce a list,
    /// anything else the single resulting record or null.
    pub fn execute(&self, expr: &Expr) -> Result<Value> {
        let (records, is_collection) = self.records(expr)?;
        Ok(if is_collection {
            Value::List(records)
        } else {
            records.into_iter().next().unwrap_or(Value::Null)
        })
    }

    /// Run the pipeline up to the processed records.
    pub fn records(&self, expr: &Expr) -> Result<(Vec<Value>, bool)> {
        let mut ast = expr.clone();
        for hook in &self.ast_preparation {
            ast = hook(ast)?;
        }
        let is_collection = ast.ty().is_collection;

        let mut host = match &self.transform {
            Some(transform) => transform(&ast)?,
            None => translate_back(&ast, self.types.as_ref())?,
        };
        for hook in &self.host_preparation {
            host = hook(host)?;
        }
        tracing::debug!("Executing {}", host);

        let mut raw = match &self.execution {
            Some(execution) => execution(&host)?,
            None => Interpreter::new(self.source.as_ref()).evaluate(&host)?,
        };
        for hook in &self.result_processing {
            raw = hook(raw)?;
        }

        let mut records = match &self.projection {
            Some(projection) => projection(raw)?,
            None => default_projection(raw)?,
        };
        for hook in &self.records_processing {
            records = hook(records)?;
        }
        tracing::debug!("Pipeline produced {} record(s)", records.len());
        Ok((records, is_collection))
    }
}

impl DataProvider for ExpressionExecutor {
    fn execute(&self, expr: &Expr) -> Result<Value> {
        ExpressionExecutor::execute(self, expr)
    }
}

impl AsyncDataProvider for ExpressionExecutor {
    fn execute_async(&self, expr: Expr, cancel: Cancellation) -> BoxFuture<'static, Result<Value>> {
        let executor = self.clone();
        Box::pin(async move {
            cancel.check()?;
            executor.execute(&expr)
        })
    }
}

impl StreamDataProvider for ExpressionExecutor {
    fn execute_stream(&self, expr: Expr, cancel: Cancellation) -> BoxStream<'static, Result<Value>> {
        let executor = self.clone();
        stream::once(async move {
            cancel.check()?;
            executor.records(&expr)
        })
        .flat_map(|result| match result {
            Ok((records, _)) => {
                stream::iter(value::detach(records).into_iter().map(Ok)).left_stream()
            }
            Err(e) => stream::iter(vec![Err(e)]).right_stream(),
        })
        .boxed()
    }
}

/// Builder for [`ExpressionExecutor`].
pub struct ExpressionExecutorBuilder {
    executor: ExpressionExecutor,
}

impl ExpressionExecutorBuilder {
    /// Append an AST preparation hook.
    pub fn prepare_ast<F>(mut self, hook: F) -> Self
    where
        F: Fn(Expr) -> Result<Expr> + Send + Sync + 'static,
    {
        self.executor.ast_preparation.push(Arc::new(hook));
        self
    }

    /// Replace the AST → host form conversion (default: `translate_back`).
    pub fn transform<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Expr) -> Result<HostExpr> + Send + Sync + 'static,
    {
        self.executor.transform = Some(Arc::new(hook));
        self
    }

    /// Append a host form preparation hook.
    pub fn prepare_host<F>(mut self, hook: F) -> Self
    where
        F: Fn(HostExpr) -> Result<HostExpr> + Send + Sync + 'static,
    {
        self.executor.host_preparation.push(Arc::new(hook));
        self
    }

    /// Replace raw execution (default: interpret against the data source).
    pub fn execution<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HostExpr) -> Result<Value> + Send + Sync + 'static,
    {
        self.executor.execution = Some(Arc::new(hook));
        self
    }

    /// Append a raw result processing hook.
    pub fn process_result<F>(mut self, hook: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.executor.result_processing.push(Arc::new(hook));
        self
    }

    /// Replace the projection into records (default: [`default_projection`]).
    pub fn projection<F>(mut self, hook: F) -> Self
    where
        F: Fn(Value) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        self.executor.projection = Some(Arc::new(hook));
        self
    }

    /// Append a records processing hook.
    pub fn process_records<F>(mut self, hook: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        self.executor.records_processing.push(Arc::new(hook));
        self
    }

    pub fn build(self) -> ExpressionExecutor {
        self.executor
    }
}
