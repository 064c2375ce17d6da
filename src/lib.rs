#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(test, deny(rust_2018_idioms))]

//! # stoker
//!
//! stoker is an asynchronous **HTTP/1.x server connection engine**: the
//! per-connection protocol core that owns a single full-duplex byte stream
//! and drives serialized HTTP/1.0 and HTTP/1.1 request/response exchanges
//! on it.
//!
//! It is deliberately *not* a server framework. There is no accept loop, no
//! TLS, no router. You bring a connected transport (anything implementing
//! [`AsyncRead`](tokio::io::AsyncRead) + [`AsyncWrite`](tokio::io::AsyncWrite))
//! and a [`Service`](service::Service); stoker handles everything on the
//! wire in between:
//!
//! - incremental request parsing and response generation
//! - keep-alive, pipelining, and graceful shutdown
//! - request body streaming with read demand and trailers
//! - `Expect: 100-continue` and canned protocol error responses
//! - HTTP upgrades, including handing unconsumed bytes off to a successor
//!   protocol connection (for example h2c)
//!
//! ## Example
//!
//! ```no_run
//! use stoker::server::conn::Builder;
//! use stoker::service::service_fn;
//! use stoker::{Body, Request, Response};
//!
//! # async fn run(stream: tokio::net::TcpStream) -> stoker::Result<()> {
//! let service = service_fn(|_req: Request<Body>| async {
//!     Ok::<_, stoker::Error>(Response::new(Body::from("Hello")))
//! });
//!
//! Builder::new().serve_connection(stream, service).await?;
//! # Ok(())
//! # }
//! ```

#[doc(hidden)]
pub use http;

pub use http::{header, HeaderMap, Method, Request, Response, StatusCode, Uri, Version};

pub use crate::body::Body;
pub use crate::error::{Error, Result};

mod common;
pub mod body;
mod error;
mod headers;
mod proto;
pub mod server;
pub mod service;
pub mod upgrade;
