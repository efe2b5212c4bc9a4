//! Request/response transport between a [`QueryProvider`](crate::QueryProvider)
//! and a remote [`ExpressionExecutor`].
//!
//! Each request is one envelope holding a [`Request`]. A `Single` request is
//! answered by one value (or error) envelope. A `Stream` request is answered
//! by one [`StreamFrame::Item`] envelope per element and a closing
//! [`StreamFrame::End`], or by an error envelope.

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::TcpStream as StdTcpStream;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::ast::Expr;
use crate::cancel::Cancellation;
use crate::error::{Error, Result};
use crate::pipeline::ExpressionExecutor;
use crate::provider::{AsyncDataProvider, DataProvider, StreamDataProvider};
use crate::value::{self, Value};
use crate::wire::Codec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Single,
    Stream,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub mode: Mode,
    pub expression: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamFrame {
    Item(Value),
    End,
}

// ==================== Server ====================

enum Response {
    Single(Value),
    /// Self-contained elements, see [`value::detach`].
    Stream(Vec<Value>),
}

fn run_request(executor: &ExpressionExecutor, request: Request) -> Result<Response> {
    match request.mode {
        Mode::Single => executor.execute(&request.expression).map(Response::Single),
        Mode::Stream => executor
            .records(&request.expression)
            .map(|(records, _)| Response::Stream(value::detach(records))),
    }
}

/// Answer requests on one connection until the peer closes it.
pub async fn serve_connection<S>(mut stream: S, executor: &ExpressionExecutor, codec: Codec) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(envelope) = codec.read_envelope_async(&mut stream).await? {
        let request: Request = match codec.open(envelope) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejecting malformed request: {}", e);
                codec.write_error_async(&mut stream, &e).await?;
                continue;
            }
        };
        tracing::debug!("{:?} request for {}", request.mode, request.expression);

        // Interpretation is CPU-bound; keep it off the I/O workers.
        let worker = executor.clone();
        let outcome = tokio::task::spawn_blocking(move || run_request(&worker, request))
            .await
            .unwrap_or_else(|e| Err(Error::execution(format!("execution task failed: {}", e))));

        match outcome {
            Ok(Response::Single(value)) => codec.write_value_async(&mut stream, &value).await?,
            Ok(Response::Stream(records)) => {
                for record in records {
                    codec
                        .write_value_async(&mut stream, &StreamFrame::Item(record))
                        .await?;
                }
                codec.write_value_async(&mut stream, &StreamFrame::End).await?;
            }
            Err(e) => {
                warn!("Execution failed: {}", e);
                codec.write_error_async(&mut stream, &e).await?;
            }
        }
    }
    Ok(())
}

/// Accept TCP connections until `shutdown` is cancelled, one task per
/// connection.
pub async fn serve(
    listener: TcpListener,
    executor: ExpressionExecutor,
    codec: Codec,
    shutdown: Cancellation,
) -> Result<()> {
    info!("Listening on {}", listener.local_addr()?);
    loop {
        let (socket, peer) = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("Shutting down");
                return Ok(());
            }
            accepted = listener.accept() => accepted?,
        };
        info!("Accepted connection from {}", peer);
        let executor = executor.clone();
        tokio::spawn(async move {
            match serve_connection(socket, &executor, codec).await {
                Ok(()) => info!("Connection from {} closed", peer),
                Err(e) => warn!("Connection from {} failed: {}", peer, e),
            }
        });
    }
}

// ==================== Client ====================

/// Opens a fresh duplex byte stream to the server.
pub trait Connect: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(&self) -> BoxFuture<'static, Result<Self::Stream>>;
}

/// Connects over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl Connect for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self) -> BoxFuture<'static, Result<TcpStream>> {
        let address = self.address.clone();
        Box::pin(async move {
            let stream = TcpStream::connect(&address).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        })
    }
}

/// Async and streaming data provider talking to a remote executor.
///
/// Every request uses its own connection, which is closed when the
/// response (or the stream) is dropped.
pub struct RemoteClient<C> {
    connector: Arc<C>,
    codec: Codec,
}

impl<C> Clone for RemoteClient<C> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
            codec: self.codec,
        }
    }
}

impl<C: Connect> RemoteClient<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
            codec: Codec::default(),
        }
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    async fn send(connector: &C, codec: Codec, request: &Request) -> Result<C::Stream> {
        let mut stream = connector.connect().await?;
        codec.write_value_async(&mut stream, request).await?;
        Ok(stream)
    }
}

impl<C: Connect> AsyncDataProvider for RemoteClient<C> {
    fn execute_async(&self, expr: Expr, cancel: Cancellation) -> BoxFuture<'static, Result<Value>> {
        let connector = self.connector.clone();
        let codec = self.codec;
        Box::pin(async move {
            cancel.check()?;
            let request = Request {
                mode: Mode::Single,
                expression: expr,
            };
            let exchange = async {
                let mut stream = Self::send(&connector, codec, &request).await?;
                codec.read_value_async::<_, Value>(&mut stream).await
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                value = exchange => value,
            }
        })
    }
}

enum ClientState<S> {
    Start(Request),
    Reading(S),
    Done,
}

impl<C: Connect> StreamDataProvider for RemoteClient<C> {
    fn execute_stream(&self, expr: Expr, cancel: Cancellation) -> BoxStream<'static, Result<Value>> {
        let state = ClientState::Start(Request {
            mode: Mode::Stream,
            expression: expr,
        });
        let client = self.clone();
        stream::unfold((state, client, cancel), |(state, client, cancel)| async move {
            let codec = client.codec;
            let step = async {
                let mut conn = match state {
                    ClientState::Done => return None,
                    ClientState::Reading(conn) => conn,
                    ClientState::Start(request) => {
                        match Self::send(&client.connector, codec, &request).await {
                            Ok(conn) => conn,
                            Err(e) => return Some((Err(e), ClientState::Done)),
                        }
                    }
                };
                match codec.read_value_async::<_, StreamFrame>(&mut conn).await {
                    Ok(StreamFrame::Item(value)) => Some((Ok(value), ClientState::Reading(conn))),
                    Ok(StreamFrame::End) => None,
                    Err(e) => Some((Err(e), ClientState::Done)),
                }
            };
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Some((Err(Error::Cancelled), ClientState::Done)),
                next = step => next,
            };
            next.map(|(item, state)| (item, (state, client, cancel)))
        })
        .boxed()
    }
}

/// Blocking data provider over a plain TCP socket.
#[derive(Debug, Clone)]
pub struct BlockingRemoteClient {
    address: String,
    codec: Codec,
    timeout: Option<Duration>,
}

impl BlockingRemoteClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            codec: Codec::default(),
            timeout: None,
        }
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Read/write timeout for each request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl DataProvider for BlockingRemoteClient {
    fn execute(&self, expr: &Expr) -> Result<Value> {
        let mut stream = StdTcpStream::connect(&self.address)?;
        stream.set_read_timeout(self.timeout)?;
        stream.set_write_timeout(self.timeout)?;
        let request = Request {
            mode: Mode::Single,
            expression: expr.clone(),
        };
        self.codec.write_value(&mut stream, &request)?;
        self.codec.read_value(&mut stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{RecordDef, TypeCatalog};
    use crate::host::{HostType, lambda, source};
    use crate::interpreter::{DataSource, MemoryDataSource};
    use crate::translator::translate;
    use crate::value::{ObjectId, Record};
    use crate::wire::PayloadFormat;
    use futures::TryStreamExt;
    use std::sync::Barrier;
    use tokio::io::DuplexStream;

    fn catalog() -> TypeCatalog {
        TypeCatalog::new().with_record(
            RecordDef::new("lab.Sample")
                .field("Code", HostType::Str)
                .field("Weight", HostType::Float),
        )
    }

    fn samples() -> MemoryDataSource {
        let sample = |code: &str, weight: f64| {
            Value::from(Record::new().field("Code", code).field("Weight", weight))
        };
        MemoryDataSource::new().with(
            "lab.Sample",
            vec![sample("s1", 0.5), sample("s2", 2.25), sample("s3", 1.0)],
        )
    }

    fn executor() -> ExpressionExecutor {
        ExpressionExecutor::new(Arc::new(catalog()), Arc::new(samples()))
    }

    /// Hands out rows only while two requests are inside the source at once.
    struct Rendezvous {
        barrier: Barrier,
        rows: MemoryDataSource,
    }

    impl DataSource for Rendezvous {
        fn elements(&self, element: &HostType) -> Result<Vec<Value>> {
            self.barrier.wait();
            self.rows.elements(element)
        }
    }

    /// Serves each connection from an in-process executor over a pipe.
    struct PipeConnector {
        executor: ExpressionExecutor,
        codec: Codec,
    }

    impl Connect for PipeConnector {
        type Stream = DuplexStream;

        fn connect(&self) -> BoxFuture<'static, Result<DuplexStream>> {
            let (client, server) = tokio::io::duplex(64);
            let executor = self.executor.clone();
            let codec = self.codec;
            tokio::spawn(async move {
                let _ = serve_connection(server, &executor, codec).await;
            });
            Box::pin(async move { Ok(client) })
        }
    }

    fn client(format: PayloadFormat) -> RemoteClient<PipeConnector> {
        let codec = Codec::new(format);
        RemoteClient::new(PipeConnector {
            executor: executor(),
            codec,
        })
        .with_codec(codec)
    }

    fn heavy() -> Expr {
        let expr = source(HostType::record("lab.Sample"))
            .filter(lambda("s", |s| s.member("Weight").ge(1.0)))
            .order_by(lambda("s", |s| s.member("Code")));
        translate(&expr, &catalog(), None).unwrap()
    }

    #[tokio::test]
    async fn test_single_request() {
        for format in [PayloadFormat::Json, PayloadFormat::Binary] {
            let value = client(format)
                .execute_async(heavy(), Cancellation::new())
                .await
                .unwrap();
            assert_eq!(value.as_list().map(|l| l.len()), Some(2));
        }
    }

    #[tokio::test]
    async fn test_stream_request() {
        let items: Vec<Value> = client(PayloadFormat::Binary)
            .execute_stream(heavy(), Cancellation::new())
            .try_collect()
            .await
            .unwrap();
        let codes: Vec<&str> = items
            .iter()
            .filter_map(|v| v.as_record()?.get("Code")?.as_str())
            .collect();
        assert_eq!(codes, vec!["s2", "s3"]);
    }

    #[test]
    fn test_stream_response_inlines_shared_records() {
        let catalog = TypeCatalog::new()
            .with_record(RecordDef::new("lab.Rig").field("Name", HostType::Str))
            .with_record(
                RecordDef::new("lab.Run")
                    .field("Code", HostType::Str)
                    .field("Rig", HostType::record("lab.Rig")),
            );
        let rig = Record::with_id(7).field("Name", "bench");
        let data = MemoryDataSource::new().with(
            "lab.Run",
            vec![
                Value::from(Record::new().field("Code", "r1").field("Rig", rig.clone())),
                Value::from(Record::new().field("Code", "r2").field("Rig", Value::Ref(ObjectId(7)))),
            ],
        );
        let executor = ExpressionExecutor::new(Arc::new(catalog.clone()), Arc::new(data));
        let request = Request {
            mode: Mode::Stream,
            expression: translate(&source(HostType::record("lab.Run")), &catalog, None).unwrap(),
        };
        let Ok(Response::Stream(runs)) = run_request(&executor, request) else {
            panic!("expected a stream response");
        };
        assert_eq!(runs.len(), 2);
        let second = runs[1].as_record().unwrap();
        assert_eq!(second.get("Rig"), Some(&Value::from(rig)));
    }

    #[tokio::test]
    async fn test_requests_execute_off_the_runtime() {
        let gated = Rendezvous {
            barrier: Barrier::new(2),
            rows: samples(),
        };
        let codec = Codec::default();
        let client = RemoteClient::new(PipeConnector {
            executor: ExpressionExecutor::new(Arc::new(catalog()), Arc::new(gated)),
            codec,
        })
        .with_codec(codec);
        let (first, second) = tokio::join!(
            client.execute_async(heavy(), Cancellation::new()),
            client.execute_async(heavy(), Cancellation::new()),
        );
        assert_eq!(first.unwrap(), second.unwrap());
    }

    #[tokio::test]
    async fn test_remote_failure_is_reported() {
        let mut unknown =
            translate(&source(HostType::record("lab.Sample")), &catalog(), None).unwrap();
        if let Expr::Query {
            op: crate::ast::QueryOp::Source { element },
            ..
        } = &mut unknown
        {
            element.name = "Missing".to_string();
        }
        let err = client(PayloadFormat::Json)
            .execute_async(unknown, Cancellation::new())
            .await
            .unwrap_err();
        match err {
            Error::RemoteExecution { type_name, .. } => assert_eq!(type_name, "UnknownTypeError"),
            other => panic!("unexpected {:?}", other),
        }

        let mut elements = client(PayloadFormat::Json).execute_stream(
            Expr::sort_key(heavy(), crate::ast::SortDirection::Ascending),
            Cancellation::new(),
        );
        assert!(matches!(
            elements.next().await,
            Some(Err(Error::RemoteExecution { .. }))
        ));
        assert!(elements.next().await.is_none());
    }

    #[tokio::test]
    async fn test_connection_serves_several_requests() {
        let codec = Codec::default();
        let (mut client, server) = tokio::io::duplex(64);
        let executor = executor();
        let server = tokio::spawn(async move { serve_connection(server, &executor, codec).await });

        for _ in 0..3 {
            let request = Request {
                mode: Mode::Single,
                expression: heavy(),
            };
            codec.write_value_async(&mut client, &request).await.unwrap();
            let value: Value = codec.read_value_async(&mut client).await.unwrap();
            assert_eq!(value.as_list().map(|l| l.len()), Some(2));
        }
        drop(client);
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let shutdown = Cancellation::new();
        let server = tokio::spawn(serve(listener, executor(), Codec::default(), shutdown.clone()));

        let remote = RemoteClient::new(TcpConnector::new(address.clone()));
        let value = remote
            .execute_async(heavy(), Cancellation::new())
            .await
            .unwrap();
        assert_eq!(value.as_list().map(|l| l.len()), Some(2));

        let blocking = BlockingRemoteClient::new(address).with_timeout(Duration::from_secs(5));
        let expr = heavy();
        let value = tokio::task::spawn_blocking(move || blocking.execute(&expr))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value.as_list().map(|l| l.len()), Some(2));

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
