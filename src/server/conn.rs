//! Lower-level server connection API.
//!
//! The types in this module are to provide a lower-level API based around a
//! single connection. Accepting a connection and binding it with a service
//! are not handled at this level. This module provides the building blocks
//! to customize those things externally.

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::marker::Unpin;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::ready;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;

use crate::body::Body;
use crate::proto;
use crate::service::HttpService;
use crate::upgrade::Upgraded;

type Http1Dispatcher<I, B, S> =
    proto::h1::Dispatcher<proto::h1::dispatch::Server<S>, B, I, proto::ServerTransaction>;

/// A future binding a connection with a Service.
///
/// Polling this future will drive HTTP forward.
///
/// # Upgrades
///
/// If the request asked for an upgrade (an `Upgrade` header or `CONNECT`)
/// and the service's response agreed, this future finishes *without*
/// shutting down the transport, after resolving the request's
/// [`upgrade::OnUpgrade`](crate::upgrade::OnUpgrade) extension with the
/// transport and any unconsumed bytes.
#[must_use = "futures do nothing unless polled"]
pub struct Connection<I, S>
where
    S: HttpService<Body>,
{
    conn: Option<Http1Dispatcher<I, S::ResBody, S>>,
}

/// A configuration builder for HTTP/1 server connections.
///
/// The builder is a snapshot: changing it after `serve_connection` does not
/// affect connections already being served.
#[derive(Clone, Debug)]
pub struct Builder {
    h1_half_close: bool,
    h1_keep_alive: bool,
    h1_header_read_timeout: Option<Duration>,
    h2c_passthrough: bool,
    auto_date_header: bool,
    max_buf_size: Option<usize>,
    pipeline_flush: bool,
}

/// Deconstructed parts of a `Connection`.
///
/// This allows taking apart a `Connection` at a later time, in order to
/// reclaim the IO object, and additional related pieces.
#[derive(Debug)]
#[non_exhaustive]
pub struct Parts<T, S> {
    /// The original IO object used for this connection.
    pub io: T,
    /// A buffer of bytes that have been read but not processed as HTTP.
    ///
    /// If the client sent additional bytes after its last request, and
    /// this connection "ended" with an upgrade, the read buffer will contain
    /// those bytes.
    ///
    /// You will want to check for any existing bytes if you plan to continue
    /// communicating on the IO object.
    pub read_buf: Bytes,
    /// The `Service` used to serve this connection.
    pub service: S,
}

// ===== impl Connection =====

impl<I, S> fmt::Debug for Connection<I, S>
where
    S: HttpService<Body>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish()
    }
}

impl<I, S> Connection<I, S>
where
    S: HttpService<Body> + Unpin,
    S::Error: Into<Box<dyn StdError + Send + Sync>>,
    S::ResBody: 'static,
    <S::ResBody as http_body::Body>::Error: Into<Box<dyn StdError + Send + Sync>>,
    I: AsyncRead + AsyncWrite + Unpin,
{
    /// Start a graceful shutdown process for this connection.
    ///
    /// This `Connection` should continue to be polled until shutdown can
    /// finish: an in-flight response is completed first, carrying
    /// `Connection: close`.
    pub fn graceful_shutdown(&mut self) {
        if let Some(ref mut conn) = self.conn {
            conn.disable_keep_alive();
        }
    }

    /// Return the inner IO object, and additional information.
    ///
    /// If the connection failed with an
    /// [`is_version_h2`](crate::Error::is_version_h2) error, the read buffer
    /// holds the bytes that followed the HTTP/2 preamble head and belongs to
    /// the successor connection.
    ///
    /// # Panics
    ///
    /// Panics if the connection already finished with an upgrade.
    pub fn into_parts(self) -> Parts<I, S> {
        let (io, read_buf, dispatch) = self
            .conn
            .expect("connection already upgraded")
            .into_inner();
        Parts {
            io,
            read_buf,
            service: dispatch.into_service(),
        }
    }

    /// Poll the connection for completion, but without calling `shutdown`
    /// on the underlying IO.
    ///
    /// This is useful to allow running a connection while doing an HTTP
    /// upgrade manually. Once the upgrade is completed, the connection would
    /// be "done", but it is not desired to actually shutdown the IO object.
    /// Instead you would take it back using `into_parts`.
    pub fn poll_without_shutdown(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<()>> {
        self.conn
            .as_mut()
            .expect("connection already upgraded")
            .poll_without_shutdown(cx)
    }

    /// Prevent shutdown of the underlying IO object at the end of service
    /// the request, instead run `into_parts`. This is a convenience wrapper
    /// over `poll_without_shutdown`.
    pub fn without_shutdown(self) -> impl Future<Output = crate::Result<Parts<I, S>>> {
        let mut zelf = Some(self);
        futures_util::future::poll_fn(move |cx| {
            ready!(zelf.as_mut().unwrap().poll_without_shutdown(cx))?;
            Poll::Ready(Ok(zelf.take().unwrap().into_parts()))
        })
    }

    /// The number of bytes read from the transport so far.
    pub fn bytes_read(&self) -> u64 {
        self.conn.as_ref().map_or(0, |conn| conn.bytes_read())
    }

    /// The number of bytes written to the transport so far.
    pub fn bytes_written(&self) -> u64 {
        self.conn.as_ref().map_or(0, |conn| conn.bytes_written())
    }
}

impl<I, S> Future for Connection<I, S>
where
    S: HttpService<Body> + Unpin,
    S::Error: Into<Box<dyn StdError + Send + Sync>>,
    S::ResBody: 'static,
    <S::ResBody as http_body::Body>::Error: Into<Box<dyn StdError + Send + Sync>>,
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Output = crate::Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let me = self.get_mut();
        let conn = me.conn.as_mut().expect("polled after completion");
        match ready!(Pin::new(conn).poll(cx)) {
            Ok(proto::Dispatched::Shutdown) => Poll::Ready(Ok(())),
            Ok(proto::Dispatched::Upgrade(pending)) => {
                // The transport, along with any bytes the engine read past
                // the end of the request, is ceded to the successor.
                let (io, buf, _dispatch) = me.conn.take().unwrap().into_inner();
                pending.fulfill(Upgraded::new(io, buf));
                Poll::Ready(Ok(()))
            }
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

// ===== impl Builder =====

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// Create a new connection builder.
    pub fn new() -> Builder {
        Builder {
            h1_half_close: false,
            h1_keep_alive: true,
            h1_header_read_timeout: None,
            h2c_passthrough: false,
            auto_date_header: true,
            max_buf_size: None,
            pipeline_flush: false,
        }
    }

    /// Set whether HTTP/1 connections should support half-closures.
    ///
    /// Clients can chose to shutdown their write-side while waiting for the
    /// server to respond. Setting this to `true` will prevent closing the
    /// connection immediately if `read` detects an EOF in the middle of a
    /// request.
    ///
    /// Default is `false`.
    pub fn half_close(&mut self, val: bool) -> &mut Self {
        self.h1_half_close = val;
        self
    }

    /// Enables or disables HTTP/1 keep-alive.
    ///
    /// When disabled, every response carries `Connection: close` and the
    /// connection ends after one exchange.
    ///
    /// Default is `true`.
    pub fn keep_alive(&mut self, val: bool) -> &mut Self {
        self.h1_keep_alive = val;
        self
    }

    /// Set a timeout for the complete request head to arrive.
    ///
    /// A connection whose request head has not fully arrived within this
    /// duration is aborted with a
    /// [header-timeout error](crate::Error::is_header_timeout).
    ///
    /// Default is no timeout.
    pub fn header_read_timeout(&mut self, read_timeout: Duration) -> &mut Self {
        self.h1_header_read_timeout = Some(read_timeout);
        self
    }

    /// Surface a direct HTTP/2 cleartext preamble instead of rejecting it.
    ///
    /// When enabled and a client opens with the `PRI * HTTP/2.0` preamble,
    /// the connection future fails fast with an
    /// [`is_version_h2`](crate::Error::is_version_h2) error and no bytes are
    /// written; [`Connection::into_parts`] then yields the transport and the
    /// bytes following the preamble head, ready to hand to an HTTP/2
    /// connection.
    ///
    /// When disabled, such a request is answered with a canned
    /// `426 Upgrade Required` response and the connection is closed.
    ///
    /// Default is `false`.
    pub fn h2c_passthrough(&mut self, val: bool) -> &mut Self {
        self.h2c_passthrough = val;
        self
    }

    /// Set whether to automatically add a `Date` header to responses.
    ///
    /// Default is `true`.
    pub fn auto_date_header(&mut self, val: bool) -> &mut Self {
        self.auto_date_header = val;
        self
    }

    /// Set the maximum buffer size for the connection.
    ///
    /// Default is ~400kb.
    ///
    /// # Panics
    ///
    /// The minimum value allowed is 8192. This method panics if the passed
    /// `max` is less than the minimum.
    pub fn max_buf_size(&mut self, max: usize) -> &mut Self {
        assert!(max >= 8192, "the max_buf_size cannot be smaller than 8192");
        self.max_buf_size = Some(max);
        self
    }

    /// Aggregates flushes to better support pipelined responses.
    ///
    /// Experimental, may have bugs.
    ///
    /// Default is `false`.
    pub fn pipeline_flush(&mut self, enabled: bool) -> &mut Self {
        self.pipeline_flush = enabled;
        self
    }

    /// Bind a connection together with a [`Service`](crate::service::Service).
    ///
    /// This returns a Future that must be polled in order for HTTP to be
    /// driven on the connection.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use stoker::server::conn::Builder;
    /// # use stoker::service::service_fn;
    /// # use stoker::{Body, Request, Response};
    /// # async fn run(stream: tokio::net::TcpStream) -> stoker::Result<()> {
    /// let service = service_fn(|_req: Request<Body>| async {
    ///     Ok::<_, stoker::Error>(Response::new(Body::from("Hello")))
    /// });
    ///
    /// Builder::new()
    ///     .keep_alive(true)
    ///     .serve_connection(stream, service)
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn serve_connection<I, S>(&self, io: I, service: S) -> Connection<I, S>
    where
        S: HttpService<Body> + Unpin,
        S::Error: Into<Box<dyn StdError + Send + Sync>>,
        S::ResBody: 'static,
        <S::ResBody as http_body::Body>::Error: Into<Box<dyn StdError + Send + Sync>>,
        I: AsyncRead + AsyncWrite + Unpin,
    {
        trace!("serve_connection: {:?}", self);
        let mut conn = proto::Conn::new(io);
        if !self.h1_keep_alive {
            conn.set_disable_keep_alive();
        }
        if self.h1_half_close {
            conn.set_allow_half_close();
        }
        if let Some(timeout) = self.h1_header_read_timeout {
            conn.set_header_read_timeout(timeout);
        }
        if self.h2c_passthrough {
            conn.set_h2c_passthrough();
        }
        if !self.auto_date_header {
            conn.disable_date_header();
        }
        if let Some(max) = self.max_buf_size {
            conn.set_max_buf_size(max);
        }
        conn.set_flush_pipeline(self.pipeline_flush);

        let dispatch = proto::h1::dispatch::Server::new(service);
        let proto = proto::h1::Dispatcher::new(dispatch, conn);
        Connection { conn: Some(proto) }
    }
}
