//! Client-side query provider.
//!
//! [`QueryProvider`] turns host expressions into portable ASTs, hands them to
//! whichever data provider is configured and maps the raw result back into
//! the requested type. Three execution disciplines exist:
//!
//! - [`QueryProvider::execute`]: synchronous, on the calling thread.
//! - [`QueryProvider::execute_async`]: one awaited result, cancellable.
//! - [`QueryProvider::execute_stream`]: a lazy stream of mapped elements.
//!
//! # Example
//! ```ignore
//! let provider = QueryProvider::builder()
//!     .types(catalog)
//!     .async_provider(RemoteClient::new(TcpConnector::new("127.0.0.1:7070")))
//!     .build()?;
//! let people: Vec<Person> = provider
//!     .query::<Person>(HostType::record("shop.Person"))
//!     .filter(lambda("p", |p| p.member("Age").ge(18)))
//!     .to_vec_async(&Cancellation::new())
//!     .await?;
//! ```

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;

use crate::ast::Expr;
use crate::cancel::Cancellation;
use crate::catalog::TypeInfoProvider;
use crate::error::{Error, Result};
use crate::host::{HostExpr, HostType, Queryable};
use crate::mapper::{self, FromRaw, ResultShape};
use crate::translator::{LocalPredicate, Translator};
use crate::value::{self, Value};

/// Executes a portable expression on the calling thread.
pub trait DataProvider: Send + Sync {
    fn execute(&self, expr: &Expr) -> Result<Value>;
}

/// Executes a portable expression asynchronously.
pub trait AsyncDataProvider: Send + Sync {
    fn execute_async(&self, expr: Expr, cancel: Cancellation) -> BoxFuture<'static, Result<Value>>;
}

/// Executes a portable expression and streams the result elements.
pub trait StreamDataProvider: Send + Sync {
    fn execute_stream(&self, expr: Expr, cancel: Cancellation) -> BoxStream<'static, Result<Value>>;
}

/// Shared form of the local-evaluation predicate.
pub type LocalEvaluation = Arc<dyn Fn(&HostExpr) -> bool + Send + Sync>;

/// Translates, dispatches and maps queries.
#[derive(Clone)]
pub struct QueryProvider {
    types: Arc<dyn TypeInfoProvider>,
    can_evaluate_locally: Option<LocalEvaluation>,
    sync: Option<Arc<dyn DataProvider>>,
    asynchronous: Option<Arc<dyn AsyncDataProvider>>,
    stream: Option<Arc<dyn StreamDataProvider>>,
}

impl QueryProvider {
    pub fn builder() -> QueryProviderBuilder {
        QueryProviderBuilder::default()
    }

    pub fn types(&self) -> &Arc<dyn TypeInfoProvider> {
        &self.types
    }

    /// Start a query over the records of `element`.
    pub fn query<T>(&self, element: HostType) -> Queryable<T> {
        Queryable::new(self.clone(), element)
    }

    /// Translate `expr` into a portable AST.
    pub fn translate(&self, expr: &HostExpr) -> Result<Expr> {
        let mut translator = Translator::new(self.types.as_ref());
        if let Some(predicate) = self.can_evaluate_locally.as_deref() {
            let predicate: LocalPredicate<'_> = predicate;
            translator = translator.with_local_predicate(predicate);
        }
        translator.translate(expr)
    }

    fn translate_for<R: FromRaw>(&self, expr: &HostExpr) -> Result<Expr> {
        let ast = self.translate(expr)?;
        check_shape(R::shape(), &ast)?;
        Ok(ast)
    }

    /// Execute synchronously through the [`DataProvider`].
    pub fn execute<R: FromRaw>(&self, expr: &HostExpr) -> Result<R> {
        let provider = self
            .sync
            .as_ref()
            .ok_or(Error::NoProviderConfigured("synchronous"))?;
        let ast = self.translate_for::<R>(expr)?;
        let raw = provider.execute(&ast)?;
        mapper::map(&raw)
    }

    /// Execute asynchronously.
    ///
    /// Prefers the [`AsyncDataProvider`]; with only a [`StreamDataProvider`]
    /// a collection result is collected and a scalar result must arrive as
    /// exactly one element.
    pub async fn execute_async<R: FromRaw>(
        &self,
        expr: &HostExpr,
        cancel: &Cancellation,
    ) -> Result<R> {
        if self.asynchronous.is_none() && self.stream.is_none() {
            return Err(Error::NoProviderConfigured("asynchronous"));
        }
        cancel.check()?;
        let ast = self.translate_for::<R>(expr)?;
        cancel.check()?;

        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            raw = self.dispatch_async(ast, cancel) => raw,
        }?;
        mapper::map(&raw)
    }

    async fn dispatch_async(&self, ast: Expr, cancel: &Cancellation) -> Result<Value> {
        if let Some(provider) = &self.asynchronous {
            return provider.execute_async(ast, cancel.clone()).await;
        }
        let Some(provider) = &self.stream else {
            return Err(Error::NoProviderConfigured("asynchronous"));
        };
        let is_collection = ast.ty().is_collection;
        let elements = provider.execute_stream(ast, cancel.clone());
        if is_collection {
            elements.try_collect().await.map(Value::List)
        } else {
            single(elements).await
        }
    }

    /// Stream mapped elements of a collection query.
    ///
    /// Nothing is translated or sent before the first poll. Once
    /// cancellation is observed the stream yields one `Cancelled` error and
    /// ends; dropping the stream drops the underlying request.
    pub fn execute_stream<T>(
        &self,
        expr: &HostExpr,
        cancel: Cancellation,
    ) -> BoxStream<'static, Result<T>>
    where
        T: FromRaw + Send + 'static,
    {
        let state = StreamState::Pending(self.clone(), expr.clone());
        stream::unfold((state, cancel), |(state, cancel)| async move {
            let mut elements = match state {
                StreamState::Done => return None,
                StreamState::Running(elements) => elements,
                StreamState::Pending(provider, expr) => {
                    let opened = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(Error::Cancelled),
                        opened = provider.open_stream(&expr, &cancel) => opened,
                    };
                    match opened {
                        Ok(elements) => elements,
                        Err(e) => return Some((Err(e), (StreamState::Done, cancel))),
                    }
                }
            };

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = elements.next() => Some(item),
            };
            match next {
                None => Some((Err(Error::Cancelled), (StreamState::Done, cancel))),
                Some(None) => None,
                Some(Some(Ok(raw))) => Some((
                    mapper::map::<T>(&raw),
                    (StreamState::Running(elements), cancel),
                )),
                Some(Some(Err(e))) => Some((Err(e), (StreamState::Done, cancel))),
            }
        })
        .boxed()
    }

    async fn open_stream(
        &self,
        expr: &HostExpr,
        cancel: &Cancellation,
    ) -> Result<BoxStream<'static, Result<Value>>> {
        if self.stream.is_none() && self.asynchronous.is_none() {
            return Err(Error::NoProviderConfigured("streaming"));
        }
        let ast = self.translate(expr)?;
        check_shape(ResultShape::Sequence, &ast)?;
        cancel.check()?;

        if let Some(provider) = &self.stream {
            return Ok(provider.execute_stream(ast, cancel.clone()));
        }
        let Some(provider) = &self.asynchronous else {
            return Err(Error::NoProviderConfigured("streaming"));
        };
        let items = match provider.execute_async(ast, cancel.clone()).await? {
            Value::List(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        Ok(stream::iter(value::detach(items).into_iter().map(Ok)).boxed())
    }
}

enum StreamState {
    Pending(QueryProvider, HostExpr),
    Running(BoxStream<'static, Result<Value>>),
    Done,
}

/// Check that the requested result shape agrees with the static type.
fn check_shape(shape: ResultShape, ast: &Expr) -> Result<()> {
    let is_collection = ast.ty().is_collection;
    match (shape, is_collection) {
        (ResultShape::Dynamic, _) | (ResultShape::Sequence, true) | (ResultShape::Scalar, false) => {
            Ok(())
        }
        (ResultShape::Sequence, false) => Err(Error::ambiguous(format!(
            "a collection was requested but the query yields a single {}",
            ast.ty()
        ))),
        (ResultShape::Scalar, true) => Err(Error::ambiguous(format!(
            "a single value was requested but the query yields {}",
            ast.ty()
        ))),
    }
}

/// The only element of a stream: `EmptyStream` when there is none,
/// `MultipleElements` when a second pull yields another.
pub async fn single(mut elements: BoxStream<'static, Result<Value>>) -> Result<Value> {
    let first = elements.next().await.ok_or(Error::EmptyStream)??;
    match elements.next().await {
        None => Ok(first),
        Some(Ok(_)) => Err(Error::MultipleElements),
        Some(Err(e)) => Err(e),
    }
}

/// Builder for [`QueryProvider`].
#[derive(Default)]
pub struct QueryProviderBuilder {
    types: Option<Arc<dyn TypeInfoProvider>>,
    can_evaluate_locally: Option<LocalEvaluation>,
    sync: Option<Arc<dyn DataProvider>>,
    asynchronous: Option<Arc<dyn AsyncDataProvider>>,
    stream: Option<Arc<dyn StreamDataProvider>>,
}

impl QueryProviderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the type metadata used for translation (required).
    pub fn types(mut self, types: impl TypeInfoProvider + 'static) -> Self {
        self.types = Some(Arc::new(types));
        self
    }

    /// Share type metadata with other components.
    pub fn shared_types(mut self, types: Arc<dyn TypeInfoProvider>) -> Self {
        self.types = Some(types);
        self
    }

    /// Restrict which closed sub-expressions are evaluated locally.
    pub fn local_evaluation<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&HostExpr) -> bool + Send + Sync + 'static,
    {
        self.can_evaluate_locally = Some(Arc::new(predicate));
        self
    }

    pub fn data_provider(mut self, provider: impl DataProvider + 'static) -> Self {
        self.sync = Some(Arc::new(provider));
        self
    }

    pub fn async_provider(mut self, provider: impl AsyncDataProvider + 'static) -> Self {
        self.asynchronous = Some(Arc::new(provider));
        self
    }

    pub fn stream_provider(mut self, provider: impl StreamDataProvider + 'static) -> Self {
        self.stream = Some(Arc::new(provider));
        self
    }

    /// Build the provider.
    ///
    /// # Errors
    /// `Configuration` when no type metadata or no data provider was set.
    pub fn build(self) -> Result<QueryProvider> {
        let types = self
            .types
            .ok_or_else(|| Error::Configuration("type metadata is required".to_string()))?;
        if self.sync.is_none() && self.asynchronous.is_none() && self.stream.is_none() {
            return Err(Error::Configuration(
                "at least one data provider is required".to_string(),
            ));
        }
        Ok(QueryProvider {
            types,
            can_evaluate_locally: self.can_evaluate_locally,
            sync: self.sync,
            asynchronous: self.asynchronous,
            stream: self.stream,
        })
    }
}
