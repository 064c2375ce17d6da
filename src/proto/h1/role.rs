use std::cmp;

use bytes::{Buf, BytesMut};
use http::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, DATE, EXPECT, TRAILER, TRANSFER_ENCODING, UPGRADE};
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use tracing::{debug, error, trace};

use crate::body::DecodedLength;
use crate::error::Parse;
use crate::headers;
use crate::proto::h1::{
    date, Encode, Encoder, Http1Transaction, ParseContext, ParseResult, ParsedMessage,
};
use crate::proto::{BodyLength, MessageHead, RequestLine};

const MAX_HEADERS: usize = 100;
const AVERAGE_HEADER_SIZE: usize = 30; // totally scientific

/// The head of the HTTP/2 cleartext preamble: the `PRI` request line and its
/// empty header section. Everything past it (`SM\r\n\r\n` and any frames)
/// belongs to the successor connection.
const H2_PREAMBLE_HEAD: &[u8] = b"PRI * HTTP/2.0\r\n\r\n";

/// The server-side HTTP/1 transaction: parses request heads, generates
/// response heads.
pub(crate) enum Server {}

impl Http1Transaction for Server {
    type Incoming = RequestLine;
    type Outgoing = StatusCode;
    const LOG: &'static str = "{role=server}";

    fn parse(buf: &mut BytesMut, ctx: ParseContext<'_>) -> ParseResult<RequestLine> {
        if buf.is_empty() {
            return Ok(None);
        }

        // A direct HTTP/2 preamble would never parse as an HTTP/1 request,
        // so check for it before running the parser. The preamble head is
        // consumed; anything after it is handed to the successor.
        if buf[0] == b'P' {
            let len = cmp::min(buf.len(), H2_PREAMBLE_HEAD.len());
            if buf[..len] == H2_PREAMBLE_HEAD[..len] {
                if len < H2_PREAMBLE_HEAD.len() {
                    // an incomplete preamble, need more bytes to decide
                    return Ok(None);
                }
                trace!("found HTTP/2 preamble");
                buf.advance(len);
                return Err(Parse::VersionH2);
            }
        }

        let mut headers_indices = [HeaderIndices {
            name: (0, 0),
            value: (0, 0),
        }; MAX_HEADERS];
        let (len, method, path, version, headers_len) = {
            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            trace!(
                "Request.parse([Header; {}], [u8; {}])",
                headers.len(),
                buf.len()
            );
            let mut req = httparse::Request::new(&mut headers);
            let bytes = buf.as_ref();
            match req.parse(bytes)? {
                httparse::Status::Complete(len) => {
                    trace!("Request.parse Complete({})", len);
                    let method = Method::from_bytes(req.method.unwrap().as_bytes())?;
                    let path = req.path.unwrap();
                    let bytes_ptr = bytes.as_ptr() as usize;
                    let path_start = path.as_ptr() as usize - bytes_ptr;
                    let path_end = path_start + path.len();
                    let version = if req.version.unwrap() == 1 {
                        Version::HTTP_11
                    } else {
                        Version::HTTP_10
                    };

                    record_header_indices(bytes, req.headers, &mut headers_indices);
                    let headers_len = req.headers.len();
                    (len, method, (path_start, path_end), version, headers_len)
                }
                httparse::Status::Partial => return Ok(None),
            }
        };

        let slice = buf.split_to(len).freeze();
        // path was found to be utf8 by httparse
        let uri = Uri::from_maybe_shared(slice.slice(path.0..path.1))?;
        let subject = RequestLine(method, uri);

        *ctx.req_method = Some(subject.0.clone());

        // Loop through the headers, adding them to the header map while
        // interpreting the fields the connection itself cares about:
        //
        // - `Connection` close/keep-alive tokens drive persistence,
        // - `Content-Length` and `Transfer-Encoding` drive body framing,
        // - `Upgrade` (or CONNECT) arms the upgrade bridge,
        // - `Expect` is scanned for recognized expectations afterwards.
        let mut decoder = DecodedLength::ZERO;
        let mut con_len = None;
        let mut is_te = false;
        let mut is_te_chunked = false;
        let mut conn_close = false;
        let mut conn_keep_alive = false;
        let mut wants_upgrade = subject.0 == Method::CONNECT;
        let mut has_expect = false;

        let mut headers = ctx.cached_headers.take().unwrap_or_else(HeaderMap::new);
        headers.reserve(headers_len);

        for header in &headers_indices[..headers_len] {
            let name = HeaderName::from_bytes(&slice[header.name.0..header.name.1])
                .expect("header name already validated");
            let value = unsafe {
                HeaderValue::from_maybe_shared_unchecked(
                    slice.slice(header.value.0..header.value.1),
                )
            };

            match name {
                TRANSFER_ENCODING => {
                    // https://tools.ietf.org/html/rfc7230#section-3.3.3
                    // If Transfer-Encoding header is present, and 'chunked'
                    // is not the final encoding, and this is a Request, then
                    // it is malformed. A server should respond with
                    // 400 Bad Request.
                    if version == Version::HTTP_10 {
                        debug!("HTTP/1.0 cannot have Transfer-Encoding header");
                        return Err(Parse::Header);
                    }
                    is_te = true;
                    if headers::is_chunked_(&value) {
                        is_te_chunked = true;
                        decoder = DecodedLength::CHUNKED;
                    } else {
                        is_te_chunked = false;
                    }
                }
                CONTENT_LENGTH => {
                    if is_te {
                        // Transfer-Encoding overrides any Content-Length;
                        // the header is kept but not used for framing.
                        headers.append(name, value);
                        continue;
                    }
                    let len = value
                        .to_str()
                        .ok()
                        .and_then(|s| s.trim().parse::<u64>().ok())
                        .ok_or(Parse::Header)?;
                    if let Some(prev) = con_len {
                        if prev != len {
                            debug!(
                                "multiple Content-Length headers with different values: [{}, {}]",
                                prev, len,
                            );
                            return Err(Parse::Header);
                        }
                        // we don't need to append this secondary length
                        continue;
                    }
                    decoder = DecodedLength::checked_new(len)?;
                    con_len = Some(len);
                }
                CONNECTION => {
                    // keep-alive is only a valid connection option for
                    // HTTP/1.0, 1.1 is persistent unless closed
                    if let Ok(s) = value.to_str() {
                        for token in s.split(',') {
                            let token = token.trim();
                            if token.eq_ignore_ascii_case("close") {
                                conn_close = true;
                            } else if version == Version::HTTP_10
                                && token.eq_ignore_ascii_case("keep-alive")
                            {
                                conn_keep_alive = true;
                            }
                        }
                    }
                }
                EXPECT => {
                    has_expect = true;
                }
                UPGRADE => {
                    wants_upgrade = true;
                }
                _ => (),
            }

            headers.append(name, value);
        }

        if is_te && !is_te_chunked {
            debug!("request with transfer-encoding header, but not chunked, bad request");
            return Err(Parse::Header);
        }

        // An `Expect` header is only meaningful on HTTP/1.1; any token other
        // than the recognized expectations fails the whole request so a 417
        // can be synthesized.
        let mut expect_continue = false;
        if has_expect && version == Version::HTTP_11 {
            match headers::expectations(&headers) {
                Ok(expect) => {
                    expect_continue = expect.continue_100;
                    if expect.processing_102 {
                        trace!("expect: 102-processing recognized, no interim response needed");
                    }
                }
                Err(()) => {
                    debug!("unknown tokens in Expect header");
                    return Err(Parse::UnknownExpectation);
                }
            }
        }

        // HTTP/1.1 is persistent unless `close` was requested, HTTP/1.0
        // only with an explicit `keep-alive`. A CONNECT exchange keeps the
        // tunnel open regardless.
        let keep_alive = match version {
            Version::HTTP_11 => !conn_close,
            _ => conn_keep_alive && !conn_close,
        } || subject.0 == Method::CONNECT;

        trace!(
            "headers complete; decode={:?}, keep_alive={}, upgrade={}",
            decoder,
            keep_alive,
            wants_upgrade,
        );

        Ok(Some(ParsedMessage {
            head: MessageHead {
                version,
                subject,
                headers,
                extensions: http::Extensions::default(),
            },
            decode: decoder,
            expect_continue,
            keep_alive,
            wants_upgrade,
        }))
    }

    fn encode(mut msg: Encode<'_, Self::Outgoing>, dst: &mut Vec<u8>) -> crate::Result<Encoder> {
        trace!(
            "Server::encode status={:?}, body={:?}, req_method={:?}",
            msg.head.subject,
            msg.body,
            msg.req_method,
        );

        // The engine itself emits interim responses (100 Continue), so a
        // Service returning a 1xx other than 101 has no way of following up
        // with the real response. Replace it with an error response.
        let (ret, is_last) = if msg.head.subject == StatusCode::SWITCHING_PROTOCOLS {
            (Ok(()), true)
        } else if msg.req_method == &Some(Method::CONNECT) && msg.head.subject.is_success() {
            // A successful CONNECT cedes the transport to the tunnel.
            (Ok(()), true)
        } else if msg.head.subject.is_informational() {
            error!("response with 1xx status code not supported");
            *msg.head = MessageHead::default();
            msg.head.subject = StatusCode::INTERNAL_SERVER_ERROR;
            msg.body = None;
            (Err(crate::Error::new_user_unsupported_status_code()), true)
        } else {
            (Ok(()), !msg.keep_alive)
        };

        let mut encoder = Server::set_length(&mut *msg.head, msg.body, msg.req_method.as_ref());
        if is_last || encoder.is_close_delimited() {
            // A close-delimited body can only end by closing.
            encoder = encoder.set_last(true);
        }

        let init_cap = 30 + msg.head.headers.len() * AVERAGE_HEADER_SIZE;
        dst.reserve(init_cap);
        if msg.head.version == Version::HTTP_11 && msg.head.subject == StatusCode::OK {
            extend(dst, b"HTTP/1.1 200 OK\r\n");
        } else {
            match msg.head.version {
                Version::HTTP_10 => extend(dst, b"HTTP/1.0 "),
                Version::HTTP_11 => extend(dst, b"HTTP/1.1 "),
                _ => unreachable!("server response version should be 1.0 or 1.1"),
            }

            extend(dst, msg.head.subject.as_str().as_bytes());
            extend(dst, b" ");
            extend(
                dst,
                msg.head
                    .subject
                    .canonical_reason()
                    .unwrap_or("<none>")
                    .as_bytes(),
            );
            extend(dst, b"\r\n");
        }

        write_headers(&msg.head.headers, dst);

        // using the cached date is quite a lot faster than generating a
        // unique Date header each time
        if msg.date_header && !msg.head.headers.contains_key(DATE) {
            dst.reserve(date::DATE_VALUE_LENGTH + 8);
            extend(dst, b"date: ");
            date::update();
            date::extend(dst);
            extend(dst, b"\r\n");
        }
        extend(dst, b"\r\n");

        ret.map(|()| encoder)
    }

    fn on_error(err: &crate::Error) -> Option<MessageHead<Self::Outgoing>> {
        use crate::error::Kind;

        let status = match *err.kind() {
            Kind::Parse(Parse::Method)
            | Kind::Parse(Parse::Header)
            | Kind::Parse(Parse::Uri)
            | Kind::Parse(Parse::Version) => StatusCode::BAD_REQUEST,
            Kind::Parse(Parse::UnknownExpectation) => StatusCode::EXPECTATION_FAILED,
            Kind::Parse(Parse::VersionH2) => StatusCode::UPGRADE_REQUIRED,
            Kind::Parse(Parse::TooLarge) => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            // an early EOF mid-head still deserves a reply if possible
            Kind::IncompleteMessage => StatusCode::BAD_REQUEST,
            _ => return None,
        };

        debug!("sending automatic response ({}) for parse error", status);
        let mut msg = MessageHead::default();
        msg.subject = status;
        Some(msg)
    }

    fn is_upgrade_response(
        head: &MessageHead<Self::Outgoing>,
        req_method: &Option<Method>,
    ) -> bool {
        head.subject == StatusCode::SWITCHING_PROTOCOLS
            || (*req_method == Some(Method::CONNECT) && head.subject.is_success())
    }
}

impl Server {
    fn can_have_body(method: Option<&Method>, status: StatusCode) -> bool {
        Server::can_chunked(method, status)
    }

    fn can_chunked(method: Option<&Method>, status: StatusCode) -> bool {
        if method == Some(&Method::HEAD) || (method == Some(&Method::CONNECT) && status.is_success())
        {
            false
        } else if status.is_informational() {
            false
        } else {
            !matches!(status, StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED)
        }
    }

    fn set_length(
        head: &mut MessageHead<StatusCode>,
        body: Option<BodyLength>,
        method: Option<&Method>,
    ) -> Encoder {
        let can_have_body = Server::can_have_body(method, head.subject);

        if let (Some(body), true) = (body, can_have_body) {
            Server::set_content_length(head, body)
        } else {
            head.headers.remove(TRANSFER_ENCODING);
            if can_have_body {
                headers::set_content_length_if_missing(&mut head.headers, 0);
            }
            Encoder::length(0)
        }
    }

    fn set_content_length(head: &mut MessageHead<StatusCode>, body: BodyLength) -> Encoder {
        // If the application set its own Content-Length, it wins over
        // whatever the body reports; the encoder then enforces it when the
        // body completes.
        if let Some(len) = headers::content_length_parse_all(&head.headers) {
            head.headers.remove(TRANSFER_ENCODING);
            return Encoder::length(len);
        }

        match body {
            BodyLength::Known(len) => {
                head.headers.remove(TRANSFER_ENCODING);
                headers::set_content_length_if_missing(&mut head.headers, len);
                Encoder::length(len)
            }
            BodyLength::Unknown => {
                if head.version == Version::HTTP_11 {
                    head.headers
                        .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
                    let encoder = Encoder::chunked();
                    // Trailer fields may only be sent if the response
                    // declared them.
                    let allowed = head
                        .headers
                        .get_all(TRAILER)
                        .into_iter()
                        .cloned()
                        .collect::<Vec<_>>();
                    if allowed.is_empty() {
                        encoder
                    } else {
                        encoder.into_chunked_with_trailing_fields(allowed)
                    }
                } else {
                    // HTTP/1.0 has no chunked encoding; the body runs until
                    // the connection closes.
                    head.headers.remove(TRANSFER_ENCODING);
                    Encoder::close_delimited()
                }
            }
        }
    }
}

#[derive(Clone, Copy)]
struct HeaderIndices {
    name: (usize, usize),
    value: (usize, usize),
}

fn record_header_indices(
    bytes: &[u8],
    headers: &[httparse::Header<'_>],
    indices: &mut [HeaderIndices],
) {
    let bytes_ptr = bytes.as_ptr() as usize;
    for (header, indices) in headers.iter().zip(indices.iter_mut()) {
        let name_start = header.name.as_ptr() as usize - bytes_ptr;
        let name_end = name_start + header.name.len();
        indices.name = (name_start, name_end);
        let value_start = header.value.as_ptr() as usize - bytes_ptr;
        let value_end = value_start + header.value.len();
        indices.value = (value_start, value_end);
    }
}

pub(super) fn write_headers(headers: &HeaderMap, dst: &mut Vec<u8>) {
    for (name, value) in headers {
        extend(dst, name.as_str().as_bytes());
        extend(dst, b": ");
        extend(dst, value.as_bytes());
        extend(dst, b"\r\n");
    }
}

#[inline]
fn extend(dst: &mut Vec<u8>, data: &[u8]) {
    dst.extend_from_slice(data);
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    fn parse(s: &str) -> ParsedMessage<RequestLine> {
        let mut bytes = BytesMut::from(s);
        Server::parse(
            &mut bytes,
            ParseContext {
                cached_headers: &mut None,
                req_method: &mut None,
            },
        )
        .expect("parse ok")
        .expect("parse complete")
    }

    fn parse_err(s: &str) -> Parse {
        let mut bytes = BytesMut::from(s);
        Server::parse(
            &mut bytes,
            ParseContext {
                cached_headers: &mut None,
                req_method: &mut None,
            },
        )
        .expect_err("parse should err")
    }

    #[test]
    fn test_parse_request() {
        let _ = pretty_env_logger::try_init();
        let mut raw = BytesMut::from("GET /echo HTTP/1.1\r\nHost: stoker.rs\r\n\r\n");
        let mut method = None;
        let msg = Server::parse(
            &mut raw,
            ParseContext {
                cached_headers: &mut None,
                req_method: &mut method,
            },
        )
        .unwrap()
        .unwrap();
        assert_eq!(raw.len(), 0);
        assert_eq!(msg.head.subject.0, Method::GET);
        assert_eq!(msg.head.subject.1, "/echo");
        assert_eq!(msg.head.version, Version::HTTP_11);
        assert_eq!(msg.head.headers.len(), 1);
        assert_eq!(msg.head.headers["Host"], "stoker.rs");
        assert_eq!(method, Some(Method::GET));
    }

    #[test]
    fn test_parse_request_errors() {
        let mut raw = BytesMut::from("GET htt:p// HTTP/1.1\r\nHost: stoker.rs\r\n\r\n");
        let ctx = ParseContext {
            cached_headers: &mut None,
            req_method: &mut None,
        };
        Server::parse(&mut raw, ctx).unwrap_err();
    }

    #[test]
    fn test_decoder_request() {
        // no length or transfer-encoding means zero-length body
        let msg = parse("GET / HTTP/1.1\r\n\r\n");
        assert_eq!(msg.decode, DecodedLength::ZERO);

        let msg = parse("POST / HTTP/1.1\r\n\r\n");
        assert_eq!(msg.decode, DecodedLength::ZERO);

        // transfer-encoding: chunked
        let msg = parse(
            "POST / HTTP/1.1\r\n\
             transfer-encoding: chunked\r\n\
             \r\n",
        );
        assert_eq!(msg.decode, DecodedLength::CHUNKED);

        // transfer-encoding and content-length = chunked
        let msg = parse(
            "POST / HTTP/1.1\r\n\
             content-length: 10\r\n\
             transfer-encoding: chunked\r\n\
             \r\n",
        );
        assert_eq!(msg.decode, DecodedLength::CHUNKED);

        // content-length
        let msg = parse(
            "POST / HTTP/1.1\r\n\
             content-length: 10\r\n\
             \r\n",
        );
        assert_eq!(msg.decode, DecodedLength::new(10));

        // transfer-encoding that isn't chunked is an error
        assert_eq!(
            parse_err(
                "POST / HTTP/1.1\r\n\
                 transfer-encoding: gzip\r\n\
                 \r\n",
            ),
            Parse::Header,
        );

        // transfer-encoding with chunked not last is an error
        assert_eq!(
            parse_err(
                "POST / HTTP/1.1\r\n\
                 transfer-encoding: chunked, gzip\r\n\
                 \r\n",
            ),
            Parse::Header,
        );

        // multiple content-lengths of same value are fine
        let msg = parse(
            "POST / HTTP/1.1\r\n\
             content-length: 10\r\n\
             content-length: 10\r\n\
             \r\n",
        );
        assert_eq!(msg.decode, DecodedLength::new(10));

        // multiple content-lengths with different values is an error
        assert_eq!(
            parse_err(
                "POST / HTTP/1.1\r\n\
                 content-length: 10\r\n\
                 content-length: 11\r\n\
                 \r\n",
            ),
            Parse::Header,
        );

        // content-length with prefix is not allowed
        assert_eq!(
            parse_err(
                "POST / HTTP/1.1\r\n\
                 content-length: +10\r\n\
                 \r\n",
            ),
            Parse::Header,
        );

        // HTTP/1.0 with transfer-encoding is an error
        assert_eq!(
            parse_err(
                "POST / HTTP/1.0\r\n\
                 transfer-encoding: chunked\r\n\
                 \r\n",
            ),
            Parse::Header,
        );
    }

    #[test]
    fn test_parse_persistence() {
        // HTTP/1.1 is persistent by default
        assert!(parse("GET / HTTP/1.1\r\n\r\n").keep_alive);
        assert!(
            !parse("GET / HTTP/1.1\r\nConnection: close\r\n\r\n").keep_alive,
            "connection close"
        );
        assert!(
            !parse("GET / HTTP/1.1\r\nConnection: keep-alive, close\r\n\r\n").keep_alive,
            "close amongst keep-alive tokens"
        );

        // HTTP/1.0 is only persistent with keep-alive
        assert!(!parse("GET / HTTP/1.0\r\n\r\n").keep_alive);
        assert!(
            parse("GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n").keep_alive,
            "1.0 keep-alive"
        );
        assert!(
            !parse("GET / HTTP/1.0\r\nConnection: keep-alive, close\r\n\r\n").keep_alive,
            "1.0 close wins over keep-alive"
        );

        // CONNECT keeps the tunnel open
        assert!(parse("CONNECT stoker.rs:443 HTTP/1.1\r\nConnection: close\r\n\r\n").keep_alive);
    }

    #[test]
    fn test_parse_expect() {
        let msg = parse(
            "POST / HTTP/1.1\r\n\
             content-length: 5\r\n\
             expect: 100-continue\r\n\
             \r\n",
        );
        assert!(msg.expect_continue);

        // 102-processing is recognized, but needs no engine action
        let msg = parse(
            "POST / HTTP/1.1\r\n\
             content-length: 5\r\n\
             expect: 100-continue, 102-processing\r\n\
             \r\n",
        );
        assert!(msg.expect_continue);

        // any unknown expectation fails the request
        assert_eq!(
            parse_err(
                "POST / HTTP/1.1\r\n\
                 content-length: 5\r\n\
                 expect: meow\r\n\
                 \r\n",
            ),
            Parse::UnknownExpectation,
        );

        // expect is ignored for HTTP/1.0
        let msg = parse(
            "POST / HTTP/1.0\r\n\
             content-length: 5\r\n\
             expect: meow\r\n\
             \r\n",
        );
        assert!(!msg.expect_continue);
    }

    #[test]
    fn test_parse_upgrade() {
        let msg = parse(
            "GET /ws HTTP/1.1\r\n\
             upgrade: websocket\r\n\
             connection: upgrade\r\n\
             \r\n",
        );
        assert!(msg.wants_upgrade);

        let msg = parse("CONNECT stoker.rs:443 HTTP/1.1\r\n\r\n");
        assert!(msg.wants_upgrade);

        let msg = parse("GET / HTTP/1.1\r\n\r\n");
        assert!(!msg.wants_upgrade);
    }

    #[test]
    fn test_parse_h2_preamble() {
        let mut bytes = BytesMut::from("PRI * HTTP/2.0\r\n\r\nSM\r\n\r\nfirst frame");
        let err = Server::parse(
            &mut bytes,
            ParseContext {
                cached_headers: &mut None,
                req_method: &mut None,
            },
        )
        .unwrap_err();
        assert_eq!(err, Parse::VersionH2);
        // the preamble head is consumed, everything else is left for the
        // successor connection
        assert_eq!(bytes, "SM\r\n\r\nfirst frame");
    }

    #[test]
    fn test_parse_h2_preamble_partial() {
        let mut bytes = BytesMut::from("PRI * HT");
        let parsed = Server::parse(
            &mut bytes,
            ParseContext {
                cached_headers: &mut None,
                req_method: &mut None,
            },
        )
        .expect("not enough bytes to decide");
        assert!(parsed.is_none());
        assert_eq!(bytes, "PRI * HT");
    }

    fn encode(
        head: MessageHead<StatusCode>,
        body: Option<BodyLength>,
        method: &mut Option<Method>,
        keep_alive: bool,
    ) -> (Vec<u8>, crate::Result<Encoder>) {
        let mut head = head;
        let mut vec = Vec::new();
        let result = Server::encode(
            Encode {
                head: &mut head,
                body,
                keep_alive,
                req_method: method,
                date_header: false,
            },
            &mut vec,
        );
        (vec, result)
    }

    #[test]
    fn test_encode_simple() {
        let head = MessageHead::default();
        let (bytes, result) = encode(head, Some(BodyLength::Known(5)), &mut None, true);
        let encoder = result.unwrap();

        let s = String::from_utf8(bytes).unwrap();
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"), "{:?}", s);
        assert!(s.contains("content-length: 5\r\n"), "{:?}", s);
        assert!(!encoder.is_last());
    }

    #[test]
    fn test_encode_not_keep_alive_is_last() {
        let head = MessageHead::default();
        let (_, result) = encode(head, Some(BodyLength::Known(0)), &mut None, false);
        assert!(result.unwrap().is_last());
    }

    #[test]
    fn test_encode_chunked_when_unknown_length() {
        let head = MessageHead::default();
        let (bytes, result) = encode(head, Some(BodyLength::Unknown), &mut None, true);
        let encoder = result.unwrap();

        let s = String::from_utf8(bytes).unwrap();
        assert!(s.contains("transfer-encoding: chunked\r\n"), "{:?}", s);
        assert!(encoder.is_chunked());
    }

    #[test]
    fn test_encode_http10_close_delimited() {
        let mut head = MessageHead::default();
        head.version = Version::HTTP_10;
        let (s, result) = encode(head, Some(BodyLength::Unknown), &mut None, true);
        let encoder = result.unwrap();

        let s = String::from_utf8(s).unwrap();
        assert!(s.starts_with("HTTP/1.0 200 OK\r\n"), "{:?}", s);
        assert!(!s.contains("transfer-encoding"), "{:?}", s);
        assert!(encoder.is_close_delimited());
        assert!(encoder.is_last());
    }

    #[test]
    fn test_encode_head_ignores_body_length() {
        let head = MessageHead::default();
        let mut method = Some(Method::HEAD);
        let (bytes, result) = encode(head, Some(BodyLength::Known(1024)), &mut method, true);
        let encoder = result.unwrap();

        // A HEAD response encodes no body, whatever the app supplies.
        assert!(encoder.is_eof());
        let s = String::from_utf8(bytes).unwrap();
        assert!(!s.contains("transfer-encoding"), "{:?}", s);
    }

    #[test]
    fn test_encode_user_content_length_wins() {
        let mut head = MessageHead::default();
        head.headers
            .insert("content-length", HeaderValue::from_static("10"));
        let (bytes, result) = encode(head, Some(BodyLength::Known(5)), &mut None, true);
        let encoder = result.unwrap();

        let s = String::from_utf8(bytes).unwrap();
        assert!(s.contains("content-length: 10\r\n"), "{:?}", s);
        // the declared length is enforced at end_body time
        let err = encoder.end::<()>().unwrap_err();
        assert_eq!(err.to_string(), "content-length 10 != 0");
    }

    #[test]
    fn test_encode_informational_is_error() {
        let mut head = MessageHead::default();
        head.subject = StatusCode::CONTINUE;
        let (bytes, result) = encode(head, None, &mut None, true);
        result.unwrap_err();

        // a 500 goes out instead
        let s = String::from_utf8(bytes).unwrap();
        assert!(s.starts_with("HTTP/1.1 500 Internal Server Error\r\n"), "{:?}", s);
    }

    #[test]
    fn test_encode_switching_protocols_is_last() {
        let mut head = MessageHead::default();
        head.subject = StatusCode::SWITCHING_PROTOCOLS;
        let (_, result) = encode(head, None, &mut None, true);
        assert!(result.unwrap().is_last());
    }

    #[test]
    fn test_on_error_statuses() {
        assert_eq!(
            Server::on_error(&Parse::Header.into()).unwrap().subject,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Server::on_error(&crate::Error::new_unknown_expectation())
                .unwrap()
                .subject,
            StatusCode::EXPECTATION_FAILED
        );
        assert_eq!(
            Server::on_error(&crate::Error::new_version_h2())
                .unwrap()
                .subject,
            StatusCode::UPGRADE_REQUIRED
        );
        assert_eq!(
            Server::on_error(&crate::Error::new_too_large())
                .unwrap()
                .subject,
            StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE
        );
        assert_eq!(
            Server::on_error(&crate::Error::new_incomplete())
                .unwrap()
                .subject,
            StatusCode::BAD_REQUEST
        );
        assert!(Server::on_error(&crate::Error::new_header_timeout()).is_none());
    }

    #[test]
    fn test_write_headers_preserves_order() {
        let msg = parse(
            "GET / HTTP/1.1\r\n\
             x-first: 1\r\n\
             host: stoker.rs\r\n\
             x-second: 2\r\n\
             \r\n",
        );
        let mut dst = Vec::new();
        write_headers(&msg.head.headers, &mut dst);
        let s = String::from_utf8(dst).unwrap();
        let first = s.find("x-first").unwrap();
        let host = s.find("host").unwrap();
        let second = s.find("x-second").unwrap();
        assert!(first < host && host < second, "{:?}", s);
    }
}
