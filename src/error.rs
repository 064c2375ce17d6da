//! Error and Result module.
use std::error::Error as StdError;
use std::fmt;

/// Result type often returned from methods that can have stoker `Error`s.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Represents errors that can occur handling HTTP/1 connections.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug)]
pub(crate) enum Kind {
    Parse(Parse),
    /// Indicates a connection is closed before a message could complete.
    IncompleteMessage,
    /// The header section of a request took too long to arrive.
    HeaderTimeout,
    /// Error while reading a body from the transport.
    Body,
    /// Error while writing a body to the transport.
    BodyWrite,
    /// The body write was aborted before the declared length was written.
    BodyWriteAborted,
    /// Error calling AsyncWrite::shutdown.
    Shutdown,
    /// A general IO error.
    Io,
    /// User tried polling for an upgrade that doesn't exist.
    NoUpgrade,
    /// The upgrade was canceled before it could complete.
    UpgradeCanceled,
    /// The application's `Service` returned an error.
    Service,
    /// The application's response body errored.
    UserBody,
    /// The application returned a 1xx response that HTTP/1 cannot deliver.
    UnsupportedStatusCode,
}

#[derive(Debug, PartialEq)]
pub(crate) enum Parse {
    Method,
    Version,
    /// The request opened with the HTTP/2 cleartext preamble.
    VersionH2,
    Uri,
    Header,
    /// The request carried an `Expect` header with an unrecognized token.
    UnknownExpectation,
    TooLarge,
    Internal,
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(crate) fn kind(&self) -> &Kind {
        &self.inner.kind
    }

    /// Returns true if this was an HTTP parse error.
    pub fn is_parse(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(_))
    }

    /// Returns true if the connection closed before a message could complete.
    pub fn is_incomplete_message(&self) -> bool {
        matches!(self.inner.kind, Kind::IncompleteMessage)
    }

    /// Returns true if the request opened with the HTTP/2 cleartext preamble.
    ///
    /// When [`h2c_passthrough`](crate::server::conn::Builder::h2c_passthrough)
    /// is enabled, a connection failing with this error can be deconstructed
    /// with [`into_parts`](crate::server::conn::Connection::into_parts) and
    /// handed, together with its unconsumed bytes, to an HTTP/2 connection.
    pub fn is_version_h2(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(Parse::VersionH2))
    }

    /// Returns true if the body write was aborted before the declared
    /// content length was reached.
    pub fn is_body_write_aborted(&self) -> bool {
        matches!(self.inner.kind, Kind::BodyWriteAborted)
    }

    /// Returns true if the header section took too long to arrive.
    pub fn is_header_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::HeaderTimeout)
    }

    /// Returns true if the error was caused while calling the application.
    pub fn is_service(&self) -> bool {
        matches!(self.inner.kind, Kind::Service)
    }

    /// Returns the error's cause, if available.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.inner.cause.as_deref()
    }

    pub(crate) fn new_incomplete() -> Error {
        Error::new(Kind::IncompleteMessage)
    }

    pub(crate) fn new_header_timeout() -> Error {
        Error::new(Kind::HeaderTimeout)
    }

    pub(crate) fn new_version_h2() -> Error {
        Error::new(Kind::Parse(Parse::VersionH2))
    }

    pub(crate) fn new_too_large() -> Error {
        Error::new(Kind::Parse(Parse::TooLarge))
    }

    pub(crate) fn new_unknown_expectation() -> Error {
        Error::new(Kind::Parse(Parse::UnknownExpectation))
    }

    pub(crate) fn new_io(cause: std::io::Error) -> Error {
        Error::new(Kind::Io).with(cause)
    }

    pub(crate) fn new_body<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::Body).with(cause)
    }

    pub(crate) fn new_body_write<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::BodyWrite).with(cause)
    }

    pub(crate) fn new_body_write_aborted() -> Error {
        Error::new(Kind::BodyWriteAborted)
    }

    pub(crate) fn new_shutdown(cause: std::io::Error) -> Error {
        Error::new(Kind::Shutdown).with(cause)
    }

    pub(crate) fn new_user_service<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::Service).with(cause)
    }

    pub(crate) fn new_user_body<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::UserBody).with(cause)
    }

    pub(crate) fn new_user_no_upgrade() -> Error {
        Error::new(Kind::NoUpgrade)
    }

    pub(crate) fn new_user_unsupported_status_code() -> Error {
        Error::new(Kind::UnsupportedStatusCode)
    }

    pub(crate) fn new_upgrade_canceled() -> Error {
        Error::new(Kind::UpgradeCanceled)
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Parse(Parse::Method) => "invalid HTTP method parsed",
            Kind::Parse(Parse::Version) => "invalid HTTP version parsed",
            Kind::Parse(Parse::VersionH2) => "invalid HTTP version parsed (found HTTP2 preface)",
            Kind::Parse(Parse::Uri) => "invalid URI",
            Kind::Parse(Parse::Header) => "invalid HTTP header parsed",
            Kind::Parse(Parse::UnknownExpectation) => "unknown expectation in Expect header",
            Kind::Parse(Parse::TooLarge) => "message head is too large",
            Kind::Parse(Parse::Internal) => "internal error inside stoker and/or its dependencies",
            Kind::IncompleteMessage => "connection closed before message completed",
            Kind::HeaderTimeout => "read header from connection timed out",
            Kind::Body => "error reading a body from connection",
            Kind::BodyWrite => "error writing a body to connection",
            Kind::BodyWriteAborted => "body write aborted",
            Kind::Shutdown => "error shutting down connection",
            Kind::Io => "connection error",
            Kind::NoUpgrade => "no upgrade available",
            Kind::UpgradeCanceled => "upgrade expected but not completed",
            Kind::Service => "service error",
            Kind::UserBody => "error from user's Body stream",
            Kind::UnsupportedStatusCode => "response has 1xx status code, not supported by server",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("stoker::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref cause) = self.inner.cause {
            write!(f, "{}: {}", self.description(), cause)
        } else {
            f.write_str(self.description())
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

impl From<Parse> for Error {
    fn from(err: Parse) -> Error {
        Error::new(Kind::Parse(err))
    }
}

impl From<httparse::Error> for Parse {
    fn from(err: httparse::Error) -> Parse {
        match err {
            httparse::Error::HeaderName
            | httparse::Error::HeaderValue
            | httparse::Error::NewLine
            | httparse::Error::Token => Parse::Header,
            httparse::Error::Status => Parse::Internal,
            httparse::Error::TooManyHeaders => Parse::TooLarge,
            httparse::Error::Version => Parse::Version,
        }
    }
}

impl From<http::method::InvalidMethod> for Parse {
    fn from(_: http::method::InvalidMethod) -> Parse {
        Parse::Method
    }
}

impl From<http::uri::InvalidUri> for Parse {
    fn from(_: http::uri::InvalidUri) -> Parse {
        Parse::Uri
    }
}
