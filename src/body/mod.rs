//! Streaming bodies for requests and responses.
//!
//! An incoming request body is handed to the application as a [`Body`]: a
//! stream of [`Bytes`] segments followed by optional trailers. The segments
//! are produced on demand — the connection does not read further body bytes
//! from the transport until the application polls for them.
//!
//! For responses, any [`http_body::Body`] implementation is accepted;
//! [`Body`] doubles as a convenient buffered implementation for the common
//! cases.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_channel::{mpsc, oneshot};
use futures_core::Stream;
use futures_util::ready;
use http::HeaderMap;
use http_body::{Body as HttpBody, SizeHint};

pub(crate) use self::length::DecodedLength;

mod length;

type BodySender = mpsc::Sender<Result<Bytes, crate::Error>>;
type TrailersSender = oneshot::Sender<HeaderMap>;

/// A stream of `Bytes` segments, used as a request or response body.
#[must_use = "streams do nothing unless polled"]
pub struct Body {
    kind: Kind,
}

enum Kind {
    Once(Option<Bytes>),
    Chan {
        content_length: DecodedLength,
        want_tx: want::Taker,
        data_rx: mpsc::Receiver<Result<Bytes, crate::Error>>,
        trailers_rx: oneshot::Receiver<HeaderMap>,
    },
}

/// The dispatcher side of a channel body.
///
/// Holds the read-demand signal: `poll_ready` resolves once the receiving
/// `Body` has been polled for the next segment, so body bytes are only
/// pulled off the transport when the application wants them.
pub(crate) struct Sender {
    want_rx: want::Giver,
    data_tx: BodySender,
    trailers_tx: Option<TrailersSender>,
}

impl Body {
    /// Creates an empty body.
    #[inline]
    pub fn empty() -> Body {
        Body::new(Kind::Once(None))
    }

    fn new(kind: Kind) -> Body {
        Body { kind }
    }

    pub(crate) fn new_channel(content_length: DecodedLength) -> (Sender, Body) {
        let (data_tx, data_rx) = mpsc::channel(0);
        let (trailers_tx, trailers_rx) = oneshot::channel();
        // giver/taker: the `Body` takes (demands) the next segment, the
        // dispatcher side gives it
        let (want_rx, want_tx) = want::new();

        let tx = Sender {
            want_rx,
            data_tx,
            trailers_tx: Some(trailers_tx),
        };
        let rx = Body::new(Kind::Chan {
            content_length,
            want_tx,
            data_rx,
            trailers_rx,
        });

        (tx, rx)
    }

    fn poll_inner(&mut self, cx: &mut Context<'_>) -> Poll<Option<crate::Result<Bytes>>> {
        match self.kind {
            Kind::Once(ref mut val) => Poll::Ready(val.take().map(Ok)),
            Kind::Chan {
                ref mut content_length,
                ref mut want_tx,
                ref mut data_rx,
                ..
            } => {
                want_tx.want();

                match ready!(Pin::new(data_rx).poll_next(cx)) {
                    Some(Ok(chunk)) => {
                        content_length.sub_if(chunk.len() as u64);
                        Poll::Ready(Some(Ok(chunk)))
                    }
                    Some(Err(err)) => Poll::Ready(Some(Err(err))),
                    None => Poll::Ready(None),
                }
            }
        }
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = crate::Error;

    fn poll_data(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        self.poll_inner(cx)
    }

    fn poll_trailers(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
        match self.kind {
            Kind::Chan {
                ref mut trailers_rx,
                ..
            } => match ready!(Pin::new(trailers_rx).poll(cx)) {
                Ok(t) => Poll::Ready(Ok(Some(t))),
                Err(_) => Poll::Ready(Ok(None)),
            },
            _ => Poll::Ready(Ok(None)),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self.kind {
            Kind::Once(ref val) => val.is_none(),
            Kind::Chan { content_length, .. } => content_length == DecodedLength::ZERO,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self.kind {
            Kind::Once(Some(ref val)) => SizeHint::with_exact(val.len() as u64),
            Kind::Once(None) => SizeHint::with_exact(0),
            Kind::Chan { content_length, .. } => {
                let mut hint = SizeHint::default();
                if let Some(known) = content_length.into_opt() {
                    hint.set_exact(known);
                }
                hint
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[derive(Debug)]
        struct Streaming;
        #[derive(Debug)]
        struct Empty;
        #[derive(Debug)]
        struct Once<'a>(&'a Bytes);

        let mut builder = f.debug_tuple("Body");
        match self.kind {
            Kind::Once(None) => builder.field(&Empty),
            Kind::Once(Some(ref val)) => builder.field(&Once(val)),
            Kind::Chan { .. } => builder.field(&Streaming),
        };

        builder.finish()
    }
}

impl Default for Body {
    /// Returns `Body::empty()`.
    #[inline]
    fn default() -> Body {
        Body::empty()
    }
}

impl From<Bytes> for Body {
    #[inline]
    fn from(chunk: Bytes) -> Body {
        if chunk.is_empty() {
            Body::empty()
        } else {
            Body::new(Kind::Once(Some(chunk)))
        }
    }
}

impl From<Vec<u8>> for Body {
    #[inline]
    fn from(vec: Vec<u8>) -> Body {
        Body::from(Bytes::from(vec))
    }
}

impl From<&'static [u8]> for Body {
    #[inline]
    fn from(slice: &'static [u8]) -> Body {
        Body::from(Bytes::from_static(slice))
    }
}

impl From<Cow<'static, [u8]>> for Body {
    #[inline]
    fn from(cow: Cow<'static, [u8]>) -> Body {
        match cow {
            Cow::Borrowed(b) => Body::from(b),
            Cow::Owned(o) => Body::from(o),
        }
    }
}

impl From<String> for Body {
    #[inline]
    fn from(s: String) -> Body {
        Body::from(Bytes::from(s.into_bytes()))
    }
}

impl From<&'static str> for Body {
    #[inline]
    fn from(slice: &'static str) -> Body {
        Body::from(Bytes::from_static(slice.as_bytes()))
    }
}

impl Sender {
    /// Check to see if this `Sender` can send more data — that is, whether
    /// the receiving `Body` has demanded another segment.
    pub(crate) fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<()>> {
        // Check if the receiver end has tried polling for the body yet
        ready!(self.poll_want(cx)?);
        self.data_tx
            .poll_ready(cx)
            .map_err(|_| crate::Error::new_body("body receiver dropped"))
    }

    fn poll_want(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<()>> {
        self.want_rx
            .poll_want(cx)
            .map_err(|_| crate::Error::new_body("body receiver dropped"))
    }

    /// Send data on this channel when it is ready.
    ///
    /// Should only be called after `poll_ready` reported readiness.
    pub(crate) fn try_send_data(&mut self, chunk: Bytes) -> Result<(), Bytes> {
        self.data_tx
            .try_send(Ok(chunk))
            .map_err(|err| err.into_inner().expect("just sent Ok"))
    }

    /// Send the trailer section, ending the body.
    pub(crate) fn send_trailers(&mut self, trailers: HeaderMap) {
        if let Some(tx) = self.trailers_tx.take() {
            let _ = tx.send(trailers);
        }
    }

    /// Fail the body with an error, e.g. an early transport EOF.
    pub(crate) fn send_error(&mut self, err: crate::Error) {
        let _ = self.data_tx.try_send(Err(err));
    }
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[derive(Debug)]
        struct Open;
        #[derive(Debug)]
        struct Closed;

        let mut builder = f.debug_tuple("Sender");
        match self.want_rx.is_canceled() {
            true => builder.field(&Closed),
            false => builder.field(&Open),
        };

        builder.finish()
    }
}
