use std::error::Error as StdError;
use std::future::Future;
use std::marker::Unpin;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Buf;
use futures_util::ready;
use http::{Request, StatusCode};
use http_body::Body as HttpBody;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

use super::decode::BodyFrame;
use super::{Conn, Http1Transaction};
use crate::body::{Body, DecodedLength, Sender as BodySender};
use crate::common::task;
use crate::proto::{BodyLength, Dispatched, MessageHead, RequestHead};
use crate::service::HttpService;

/// Drives a [`Conn`] against a [`Dispatch`]: the read loop feeding parsed
/// requests and body segments in, the write loop pulling responses and
/// response body segments out.
pub(crate) struct Dispatcher<D, Bs: HttpBody, I, T> {
    conn: Conn<I, Bs::Data, T>,
    dispatch: D,
    body_tx: Option<BodySender>,
    body_rx: Pin<Box<Option<Bs>>>,
    is_closing: bool,
}

pub(crate) trait Dispatch {
    type PollItem;
    type PollBody;
    type PollError;
    type RecvItem;

    fn poll_msg(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<(Self::PollItem, Self::PollBody), Self::PollError>>>;

    fn recv_msg(&mut self, msg: crate::Result<(Self::RecvItem, Body)>) -> crate::Result<()>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), ()>>;

    fn should_poll(&self) -> bool;
}

/// A [`Dispatch`] that calls a service once per exchange.
pub(crate) struct Server<S: HttpService<Body>> {
    in_flight: Pin<Box<Option<S::Future>>>,
    pub(crate) service: S,
}

impl<D, Bs, I, T> Dispatcher<D, Bs, I, T>
where
    D: Dispatch<
            PollItem = MessageHead<T::Outgoing>,
            PollBody = Bs,
            RecvItem = MessageHead<T::Incoming>,
        > + Unpin,
    D::PollError: Into<Box<dyn StdError + Send + Sync>>,
    I: AsyncRead + AsyncWrite + Unpin,
    T: Http1Transaction,
    Bs: HttpBody + 'static,
    Bs::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    pub(crate) fn new(dispatch: D, conn: Conn<I, Bs::Data, T>) -> Self {
        Dispatcher {
            conn,
            dispatch,
            body_tx: None,
            body_rx: Box::pin(None),
            is_closing: false,
        }
    }

    pub(crate) fn disable_keep_alive(&mut self) {
        self.conn.disable_keep_alive();
    }

    pub(crate) fn into_inner(self) -> (I, bytes::Bytes, D) {
        let (io, buf) = self.conn.into_inner();
        (io, buf, self.dispatch)
    }

    pub(crate) fn bytes_read(&self) -> u64 {
        self.conn.bytes_read()
    }

    pub(crate) fn bytes_written(&self) -> u64 {
        self.conn.bytes_written()
    }

    /// Run this dispatcher until HTTP says this connection is done,
    /// but don't call `AsyncWrite::shutdown` on the underlying IO.
    ///
    /// This is useful for old-style HTTP upgrades where the caller takes
    /// the IO back with `into_inner` afterwards.
    pub(crate) fn poll_without_shutdown(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<crate::Result<()>> {
        match ready!(self.poll_catch(cx, false)) {
            Ok(Dispatched::Shutdown) => Poll::Ready(Ok(())),
            Ok(Dispatched::Upgrade(pending)) => {
                // The caller will take the IO back manually; the in-band
                // upgrade future is told to stand down.
                pending.manual();
                Poll::Ready(Ok(()))
            }
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_catch(
        &mut self,
        cx: &mut Context<'_>,
        should_shutdown: bool,
    ) -> Poll<crate::Result<Dispatched>> {
        Poll::Ready(ready!(self.poll_inner(cx, should_shutdown)).or_else(|e| {
            // Be sure to alert a streaming body of the failure.
            if let Some(mut body) = self.body_tx.take() {
                body.send_error(crate::Error::new_body("connection error"));
            }
            // An error means we're shutting down either way.
            // We just try to give the error to the user,
            // and close the connection with an Ok. If we
            // cannot give it to the user, then return the Err.
            self.dispatch.recv_msg(Err(e))?;
            Ok(Dispatched::Shutdown)
        }))
    }

    fn poll_inner(
        &mut self,
        cx: &mut Context<'_>,
        should_shutdown: bool,
    ) -> Poll<crate::Result<Dispatched>> {
        let mut looped = 0;
        loop {
            self.poll_read(cx)?;
            self.poll_write(cx)?;
            self.poll_flush(cx)?;

            // This could happen if reading paused before blocking on IO,
            // such as getting to the end of a framed message, but then
            // writing/flushing set the state back to Init. In that case,
            // if the read buffer still had bytes, we'd want to try poll_read
            // again, or else we wouldn't ever be woken up again.
            //
            // This is the poll-model rendition of re-dispatching the
            // connection to the executor when a pipelined request is
            // already buffered.
            if !self.conn.wants_read_again() {
                //break out of the loop
                break;
            }

            // A long pipeline of tiny exchanges shouldn't hog this task.
            looped += 1;
            if looped >= 16 {
                trace!("yielding after {} pipelined exchanges", looped);
                match ready!(task::yield_now(cx)) {}
            }
        }

        if self.is_done() {
            if let Some(pending) = self.conn.pending_upgrade() {
                self.conn.take_error()?;
                return Poll::Ready(Ok(Dispatched::Upgrade(pending)));
            } else if should_shutdown {
                ready!(self.conn.poll_shutdown(cx)).map_err(crate::Error::new_shutdown)?;
            }
            self.conn.take_error()?;
            Poll::Ready(Ok(Dispatched::Shutdown))
        } else {
            Poll::Pending
        }
    }

    fn poll_read(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<()>> {
        loop {
            if self.is_closing {
                return Poll::Ready(Ok(()));
            } else if self.conn.can_read_head() {
                ready!(self.poll_read_head(cx))?;
            } else if let Some(mut body) = self.body_tx.take() {
                if self.conn.can_read_body() {
                    match body.poll_ready(cx) {
                        Poll::Ready(Ok(())) => (),
                        Poll::Pending => {
                            self.body_tx = Some(body);
                            return Poll::Pending;
                        }
                        Poll::Ready(Err(_canceled)) => {
                            // user doesn't care about the body
                            // so we should stop reading
                            trace!("body receiver dropped before eof, draining or closing");
                            self.conn.poll_drain_or_close_read(cx);
                            continue;
                        }
                    }
                    match self.conn.poll_read_body(cx) {
                        Poll::Ready(Some(Ok(BodyFrame::Data(chunk)))) => {
                            match body.try_send_data(chunk) {
                                Ok(()) => {
                                    self.body_tx = Some(body);
                                }
                                Err(_canceled) => {
                                    if self.conn.can_read_body() {
                                        trace!("body receiver dropped before eof, closing");
                                        self.conn.close_read();
                                    }
                                }
                            }
                        }
                        Poll::Ready(Some(Ok(BodyFrame::Trailers(trailers)))) => {
                            body.send_trailers(trailers);
                            // the body sender is dropped here, completing
                            // the application's stream
                        }
                        Poll::Ready(None) => {
                            // just drop, the body will close automatically
                        }
                        Poll::Pending => {
                            self.body_tx = Some(body);
                            return Poll::Pending;
                        }
                        Poll::Ready(Some(Err(e))) => {
                            body.send_error(crate::Error::new_body(e));
                        }
                    }
                } else {
                    // just drop, the body will close automatically
                }
            } else {
                return self.conn.poll_read_keep_alive(cx);
            }
        }
    }

    fn poll_read_head(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<()>> {
        // can dispatch receive, or does it still care about, an incoming message?
        match ready!(self.dispatch.poll_ready(cx)) {
            Ok(()) => (),
            Err(()) => {
                trace!("dispatch no longer receiving messages");
                self.close();
                return Poll::Ready(Ok(()));
            }
        }

        // dispatch is ready for a message, try to read one
        match ready!(self.conn.poll_read_head(cx)) {
            Some(Ok((mut head, body_len, wants_upgrade))) => {
                let body = match body_len {
                    DecodedLength::ZERO => Body::empty(),
                    other => {
                        let (tx, rx) = Body::new_channel(other);
                        self.body_tx = Some(tx);
                        rx
                    }
                };
                if wants_upgrade {
                    head.extensions.insert(self.conn.on_upgrade());
                }
                self.dispatch.recv_msg(Ok((head, body)))?;
                Poll::Ready(Ok(()))
            }
            Some(Err(err)) => {
                debug!("read_head error: {}", err);
                self.dispatch.recv_msg(Err(err))?;
                // if here, the dispatcher gave the user the error
                // somewhere else. we still need to shutdown, but
                // not as a second error.
                self.close();
                Poll::Ready(Ok(()))
            }
            None => {
                // read eof, the connection will start closing down
                trace!("read_head eof");
                self.close();
                Poll::Ready(Ok(()))
            }
        }
    }

    fn poll_write(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<()>> {
        loop {
            if self.is_closing {
                return Poll::Ready(Ok(()));
            } else if self.body_rx.is_none()
                && self.conn.can_write_head()
                && self.dispatch.should_poll()
            {
                if let Some(msg) = ready!(self.dispatch.poll_msg(cx)) {
                    let (head, body) = msg.map_err(crate::Error::new_user_service)?;

                    // Check if the body knows its full data immediately,
                    // in which case the head can declare a known length.
                    let body_type = if body.is_end_stream() {
                        self.body_rx.set(None);
                        None
                    } else {
                        let btype = body
                            .size_hint()
                            .exact()
                            .map(BodyLength::Known)
                            .or(Some(BodyLength::Unknown));
                        self.body_rx.set(Some(body));
                        btype
                    };
                    self.conn.write_head(head, body_type);
                } else {
                    self.close();
                    return Poll::Ready(Ok(()));
                }
            } else if !self.conn.can_buffer_body() {
                ready!(self.poll_flush(cx))?;
            } else {
                // A new scope is needed to contain the body borrow before
                // clearing the slot.
                let mut clear_body = false;
                {
                    let mut body = match self.body_rx.as_mut().as_pin_mut() {
                        Some(body) => body,
                        None => return Poll::Pending,
                    };

                    if !self.conn.can_write_body() {
                        // The response has no body on the wire (HEAD, 204,
                        // ...), but the stream must still be driven; its
                        // bytes are discarded.
                        match ready!(body.as_mut().poll_data(cx)) {
                            Some(Ok(chunk)) => {
                                trace!(
                                    "discarding body chunk ({}B) of bodiless response",
                                    chunk.remaining()
                                );
                            }
                            Some(Err(e)) => {
                                return Poll::Ready(Err(crate::Error::new_user_body(e)));
                            }
                            None => clear_body = true,
                        }
                    } else {
                        match ready!(body.as_mut().poll_data(cx)) {
                            Some(Ok(chunk)) => {
                                if chunk.remaining() == 0 {
                                    trace!("discarding empty chunk");
                                } else {
                                    self.conn.write_body(chunk);
                                }
                            }
                            Some(Err(e)) => {
                                return Poll::Ready(Err(crate::Error::new_user_body(e)));
                            }
                            None => {
                                // The data stream is complete; trailers may
                                // still follow.
                                match ready!(body.as_mut().poll_trailers(cx)) {
                                    Ok(Some(trailers)) => {
                                        clear_body = true;
                                        self.conn.write_trailers(trailers);
                                        if self.conn.can_write_body() {
                                            self.conn.end_body()?;
                                        }
                                    }
                                    Ok(None) => {
                                        clear_body = true;
                                        self.conn.end_body()?;
                                    }
                                    Err(e) => {
                                        return Poll::Ready(Err(crate::Error::new_user_body(e)));
                                    }
                                }
                            }
                        }
                    }
                }
                if clear_body {
                    self.body_rx.set(None);
                }
            }
        }
    }

    fn poll_flush(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<()>> {
        self.conn.poll_flush(cx).map_err(|err| {
            debug!("error writing: {}", err);
            crate::Error::new_body_write(err)
        })
    }

    fn close(&mut self) {
        self.is_closing = true;
        self.conn.close_read();
        self.conn.close_write();
    }

    fn is_done(&self) -> bool {
        if self.is_closing {
            return true;
        }

        let read_done = self.conn.is_read_closed();
        let write_done = self.conn.is_write_closed()
            || (!self.dispatch.should_poll() && self.body_rx.is_none());

        read_done && write_done
    }
}

impl<D, Bs, I, T> Future for Dispatcher<D, Bs, I, T>
where
    D: Dispatch<
            PollItem = MessageHead<T::Outgoing>,
            PollBody = Bs,
            RecvItem = MessageHead<T::Incoming>,
        > + Unpin,
    D::PollError: Into<Box<dyn StdError + Send + Sync>>,
    I: AsyncRead + AsyncWrite + Unpin,
    T: Http1Transaction,
    Bs: HttpBody + 'static,
    Bs::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    type Output = crate::Result<Dispatched>;

    #[inline]
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.poll_catch(cx, true)
    }
}

// ===== impl Server =====

impl<S> Server<S>
where
    S: HttpService<Body>,
{
    pub(crate) fn new(service: S) -> Server<S> {
        Server {
            in_flight: Box::pin(None),
            service,
        }
    }

    pub(crate) fn into_service(self) -> S {
        self.service
    }
}

impl<S, Bs> Dispatch for Server<S>
where
    S: HttpService<Body, ResBody = Bs> + Unpin,
    S::Error: Into<Box<dyn StdError + Send + Sync>>,
    Bs: HttpBody,
{
    type PollItem = MessageHead<StatusCode>;
    type PollBody = Bs;
    type PollError = S::Error;
    type RecvItem = RequestHead;

    fn poll_msg(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<(Self::PollItem, Self::PollBody), Self::PollError>>> {
        let ret = if let Some(fut) = self.in_flight.as_mut().as_pin_mut() {
            let resp = ready!(fut.poll(cx)?);
            let (parts, body) = resp.into_parts();
            let head = MessageHead {
                version: parts.version,
                subject: parts.status,
                headers: parts.headers,
                extensions: http::Extensions::default(),
            };
            Poll::Ready(Some(Ok((head, body))))
        } else {
            unreachable!("poll_msg shouldn't be called if no inflight");
        };

        // Since in_flight finished, remove it
        self.in_flight.set(None);
        ret
    }

    fn recv_msg(&mut self, msg: crate::Result<(Self::RecvItem, Body)>) -> crate::Result<()> {
        let (msg, body) = msg?;
        let mut req = Request::new(body);
        *req.method_mut() = msg.subject.0;
        *req.uri_mut() = msg.subject.1;
        *req.headers_mut() = msg.headers;
        *req.version_mut() = msg.version;
        *req.extensions_mut() = msg.extensions;
        let fut = self.service.call(req);
        self.in_flight.set(Some(fut));
        Ok(())
    }

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), ()>> {
        if self.in_flight.is_some() {
            trace!("service in flight, pausing the head read");
            Poll::Pending
        } else {
            self.service.poll_ready(cx).map_err(|_e| {
                trace!("service closed");
            })
        }
    }

    fn should_poll(&self) -> bool {
        self.in_flight.is_some()
    }
}
