//! # remoteq
//!
//! Build a query on one side of a process boundary, run it on the other.
//!
//! A query is written against typed host expressions ([`host::HostExpr`]),
//! translated into a portable AST ([`ast::Expr`]) that carries type
//! descriptors instead of native types, shipped over a length-prefixed wire
//! codec, translated back and executed remotely, and the raw records that come
//! back are mapped into Rust types, shared and cyclic references included.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use remoteq::prelude::*;
//!
//! let provider = QueryProvider::builder()
//!     .types(catalog)
//!     .async_provider(RemoteClient::new(TcpConnector::new("127.0.0.1:7070")))
//!     .build()?;
//!
//! let adults: Vec<Person> = provider
//!     .query::<Person>(HostType::record("shop.Person"))
//!     .filter(lambda("p", |p| p.member("Age").ge(18)))
//!     .order_by(lambda("p", |p| p.member("Name")))
//!     .to_vec_async(&Cancellation::new())
//!     .await?;
//! ```
//!
//! ## Layers
//!
//! | Module        | Role                                             |
//! |---------------|--------------------------------------------------|
//! | `translator`  | host form ⇄ portable AST, local evaluation       |
//! | `pipeline`    | server-side decorator chain around execution     |
//! | `provider`    | sync, async and streaming execution entry points |
//! | `mapper`      | raw records to typed results                     |
//! | `wire`        | framing and payload encoding                     |
//! | `remote`      | client and server over the wire codec            |

pub mod ast;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod error;
pub mod host;
pub mod interpreter;
pub mod mapper;
pub mod pipeline;
pub mod provider;
pub mod query;
pub mod remote;
pub mod translator;
pub mod value;
pub mod wire;

pub use cancel::Cancellation;
pub use error::{Error, Result};
pub use mapper::{FromRaw, FromRecord, RecordReader, map};
pub use pipeline::ExpressionExecutor;
pub use provider::{QueryProvider, QueryProviderBuilder};
pub use translator::{translate, translate_back};

pub mod prelude {
    pub use crate::ast::{Expr, QueryOp, SortDirection, TypeDescriptor};
    pub use crate::cancel::Cancellation;
    pub use crate::catalog::{EnumDef, RecordDef, TypeCatalog, TypeInfoProvider};
    pub use crate::error::{Error, Result};
    pub use crate::host::{HostExpr, HostType, Queryable, captured, lambda, lit, source};
    pub use crate::interpreter::{DataSource, MemoryDataSource};
    pub use crate::mapper::{FromRaw, FromRecord, RecordReader};
    pub use crate::pipeline::ExpressionExecutor;
    pub use crate::provider::{AsyncDataProvider, DataProvider, QueryProvider, StreamDataProvider};
    pub use crate::query::Query;
    pub use crate::remote::{BlockingRemoteClient, RemoteClient, TcpConnector};
    pub use crate::value::{Record, Value};
    pub use crate::{impl_enum_from_raw, impl_from_raw};
}
