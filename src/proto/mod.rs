//! Pieces pertaining to the HTTP/1 message protocol.

pub(crate) use self::h1::{Conn, ServerTransaction};

pub(crate) mod h1;

/// An incoming message head. Includes request line and headers.
#[derive(Debug, Default)]
pub(crate) struct MessageHead<S> {
    /// HTTP version of the message.
    pub(crate) version: http::Version,
    /// Subject (request or status line) of the message.
    pub(crate) subject: S,
    /// Headers of the message.
    pub(crate) headers: http::HeaderMap,
    /// Extensions carried over into the request, such as the upgrade future.
    pub(crate) extensions: http::Extensions,
}

/// An incoming request message.
pub(crate) type RequestHead = MessageHead<RequestLine>;

#[derive(Debug, Default, PartialEq)]
pub(crate) struct RequestLine(pub(crate) http::Method, pub(crate) http::Uri);

/// The length of an outgoing message body, as the application declared it.
#[derive(Debug)]
pub(crate) enum BodyLength {
    /// Content-Length
    Known(u64),
    /// Transfer-Encoding: chunked
    Unknown,
}

/// Status of an HTTP connection when its dispatcher finishes.
#[derive(Debug)]
pub(crate) enum Dispatched {
    /// The dispatcher completely shutdown the connection.
    Shutdown,
    /// The dispatcher has pending upgrade, and so did not shutdown.
    Upgrade(crate::upgrade::Pending),
}
