#![deny(rust_2018_idioms)]

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http_body::Body as HttpBody;
use tokio_test::io::Builder as IoBuilder;

use stoker::server::conn::Builder;
use stoker::service::service_fn;
use stoker::upgrade::OnUpgrade;
use stoker::{Body, HeaderMap, Request, Response, StatusCode};

fn builder() -> Builder {
    let mut b = Builder::new();
    // tests assert exact bytes, and the Date header isn't deterministic
    b.auto_date_header(false);
    b
}

async fn read_full(body: &mut Body) -> Vec<u8> {
    let mut vec = Vec::new();
    while let Some(chunk) = body.data().await {
        vec.extend_from_slice(&chunk.expect("body chunk"));
    }
    vec
}

#[tokio::test]
async fn simple_get() {
    let _ = pretty_env_logger::try_init();

    let io = IoBuilder::new()
        .read(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n")
        .write(
            b"HTTP/1.1 200 OK\r\n\
              content-type: text/plain; charset=utf-8\r\n\
              content-length: 5\r\n\
              \r\n\
              Hello",
        )
        .build();

    let service = service_fn(|_req: Request<Body>| async {
        Response::builder()
            .header("content-type", "text/plain; charset=utf-8")
            .body(Body::from("Hello"))
            .map_err(http::Error::from)
    });

    builder()
        .serve_connection(io, service)
        .await
        .expect("connection");
}

#[tokio::test]
async fn post_echo_with_content_length() {
    let _ = pretty_env_logger::try_init();

    let io = IoBuilder::new()
        .read(
            b"POST / HTTP/1.1\r\n\
              Host: h\r\n\
              Content-Length: 14\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              ECHO Echo echo",
        )
        .write(
            b"HTTP/1.1 200 OK\r\n\
              content-length: 14\r\n\
              \r\n\
              ECHO Echo echo",
        )
        .build();

    let service = service_fn(|req: Request<Body>| async {
        let mut body = req.into_body();
        let echoed = read_full(&mut body).await;
        assert_eq!(echoed, b"ECHO Echo echo");
        Ok::<_, stoker::Error>(Response::new(Body::from(echoed)))
    });

    builder()
        .serve_connection(io, service)
        .await
        .expect("connection");
}

#[tokio::test]
async fn pipelined_get_after_post() {
    let _ = pretty_env_logger::try_init();

    let io = IoBuilder::new()
        .read(
            b"POST / HTTP/1.1\r\n\
              Host: h\r\n\
              Content-Length: 14\r\n\
              \r\n\
              ECHO Echo echo\
              GET / HTTP/1.1\r\nHost: h\r\n\r\n",
        )
        .write(
            b"HTTP/1.1 200 OK\r\n\
              content-length: 14\r\n\
              \r\n\
              ECHO Echo echo",
        )
        .write(
            b"HTTP/1.1 200 OK\r\n\
              content-length: 0\r\n\
              \r\n",
        )
        .build();

    let service = service_fn(|req: Request<Body>| async {
        let mut body = req.into_body();
        let echoed = read_full(&mut body).await;
        Ok::<_, stoker::Error>(Response::new(Body::from(echoed)))
    });

    builder()
        .serve_connection(io, service)
        .await
        .expect("connection");
}

#[tokio::test]
async fn insufficient_content_length_aborts_exchange() {
    let _ = pretty_env_logger::try_init();

    // The declared content-length is enforced: writing only 5 of 10 bytes
    // fails the exchange before anything is flushed.
    let io = IoBuilder::new()
        .read(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n")
        .build();

    let service = service_fn(|_req: Request<Body>| async {
        Response::builder()
            .header("content-length", "10")
            .body(Body::from("Hello"))
            .map_err(http::Error::from)
    });

    let err = builder()
        // the mock half-closes after the request; that shouldn't abort the
        // exchange before the response body length is enforced
        .half_close(true)
        .serve_connection(io, service)
        .await
        .expect_err("should fail");
    assert!(
        err.to_string().contains("content-length 10 != 5"),
        "unexpected error: {}",
        err,
    );
}

#[tokio::test]
async fn unknown_expectation_gets_417() {
    let _ = pretty_env_logger::try_init();

    let io = IoBuilder::new()
        .read(b"POST / HTTP/1.1\r\nHost: h\r\nExpect: bogus\r\nContent-Length: 5\r\n\r\n")
        .write(
            b"HTTP/1.1 417 Expectation Failed\r\n\
              connection: close\r\n\
              content-length: 0\r\n\
              \r\n",
        )
        .build();

    let service = service_fn(|_req: Request<Body>| async {
        panic!("service must not be called for unknown expectations");
        #[allow(unreachable_code)]
        Ok::<_, stoker::Error>(Response::new(Body::empty()))
    });

    let err = builder()
        .serve_connection(io, service)
        .await
        .expect_err("connection errors after the canned response");
    assert!(err.is_parse(), "unexpected error: {:?}", err);
    assert!(
        err.to_string().contains("expectation"),
        "unexpected error: {}",
        err,
    );
}

#[tokio::test]
async fn h2_preamble_passthrough_hands_off_leftover_bytes() {
    let _ = pretty_env_logger::try_init();

    let io = IoBuilder::new()
        .read(b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n")
        .build();

    let service = service_fn(|_req: Request<Body>| async {
        panic!("service must not be called for an h2 preamble");
        #[allow(unreachable_code)]
        Ok::<_, stoker::Error>(Response::new(Body::empty()))
    });

    let mut conn = builder()
        .h2c_passthrough(true)
        .serve_connection(io, service);

    let err = (&mut conn).await.expect_err("connection reports h2");
    assert!(err.is_version_h2(), "unexpected error: {:?}", err);

    // Everything past the preamble head belongs to the successor.
    let parts = conn.into_parts();
    assert_eq!(&parts.read_buf[..], b"SM\r\n\r\n");
}

#[tokio::test]
async fn h2_preamble_without_passthrough_gets_426() {
    let _ = pretty_env_logger::try_init();

    let io = IoBuilder::new()
        .read(b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n")
        .write(
            b"HTTP/1.1 426 Upgrade Required\r\n\
              connection: close\r\n\
              content-length: 0\r\n\
              \r\n",
        )
        .build();

    let service = service_fn(|_req: Request<Body>| async {
        panic!("service must not be called for an h2 preamble");
        #[allow(unreachable_code)]
        Ok::<_, stoker::Error>(Response::new(Body::empty()))
    });

    let err = builder()
        .serve_connection(io, service)
        .await
        .expect_err("connection errors after the canned response");
    assert!(err.is_version_h2(), "unexpected error: {:?}", err);
}

#[tokio::test]
async fn upgrade_passes_unconsumed_bytes_to_successor() {
    let _ = pretty_env_logger::try_init();

    let io = IoBuilder::new()
        .read(
            b"GET /chat HTTP/1.1\r\n\
              Host: h\r\n\
              Connection: upgrade\r\n\
              Upgrade: chat\r\n\
              \r\n\
              early protocol bytes",
        )
        .write(b"HTTP/1.1 101 Switching Protocols\r\nupgrade: chat\r\n\r\n")
        .build();

    let upgrade_slot: Arc<Mutex<Option<OnUpgrade>>> = Arc::new(Mutex::new(None));
    let slot = upgrade_slot.clone();

    let service = service_fn(move |mut req: Request<Body>| {
        let slot = slot.clone();
        async move {
            *slot.lock().unwrap() = Some(stoker::upgrade::on(&mut req));
            Response::builder()
                .status(StatusCode::SWITCHING_PROTOCOLS)
                .header("upgrade", "chat")
                .body(Body::empty())
                .map_err(http::Error::from)
        }
    });

    builder()
        .serve_connection(io, service)
        .await
        .expect("connection finishes into upgrade");

    let on_upgrade = upgrade_slot.lock().unwrap().take().expect("upgrade armed");
    let upgraded = on_upgrade.await.expect("upgrade fulfilled");

    let parts = upgraded
        .downcast::<tokio_test::io::Mock>()
        .expect("downcast to mock io");
    assert_eq!(&parts.read_buf[..], b"early protocol bytes");
}

#[tokio::test]
async fn upgrade_denied_by_response_cancels_future() {
    let _ = pretty_env_logger::try_init();

    let io = IoBuilder::new()
        .read(b"GET / HTTP/1.1\r\nHost: h\r\nUpgrade: chat\r\n\r\n")
        .write(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nno")
        .build();

    let upgrade_slot: Arc<Mutex<Option<OnUpgrade>>> = Arc::new(Mutex::new(None));
    let slot = upgrade_slot.clone();

    let service = service_fn(move |mut req: Request<Body>| {
        let slot = slot.clone();
        async move {
            *slot.lock().unwrap() = Some(stoker::upgrade::on(&mut req));
            Ok::<_, stoker::Error>(Response::new(Body::from("no")))
        }
    });

    builder()
        .serve_connection(io, service)
        .await
        .expect("connection");

    let on_upgrade = upgrade_slot.lock().unwrap().take().expect("upgrade armed");
    on_upgrade.await.expect_err("upgrade was not agreed to");
}

#[tokio::test]
async fn expect_continue_sends_interim_response() {
    let _ = pretty_env_logger::try_init();

    let io = IoBuilder::new()
        .read(
            b"POST / HTTP/1.1\r\n\
              Host: h\r\n\
              Expect: 100-continue\r\n\
              Content-Length: 4\r\n\
              \r\n",
        )
        .write(b"HTTP/1.1 100 Continue\r\n\r\n")
        .read(b"ping")
        .write(b"HTTP/1.1 200 OK\r\ncontent-length: 4\r\n\r\nping")
        .build();

    let service = service_fn(|req: Request<Body>| async {
        let mut body = req.into_body();
        let data = read_full(&mut body).await;
        Ok::<_, stoker::Error>(Response::new(Body::from(data)))
    });

    builder()
        .serve_connection(io, service)
        .await
        .expect("connection");
}

#[tokio::test]
async fn http10_keep_alive_opts_in() {
    let _ = pretty_env_logger::try_init();

    let io = IoBuilder::new()
        .read(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n")
        .write(
            b"HTTP/1.0 200 OK\r\n\
              connection: keep-alive\r\n\
              content-length: 0\r\n\
              \r\n",
        )
        .read(b"GET / HTTP/1.0\r\n\r\n")
        .write(
            b"HTTP/1.0 200 OK\r\n\
              content-length: 0\r\n\
              \r\n",
        )
        .build();

    let service = service_fn(|_req: Request<Body>| async {
        Ok::<_, stoker::Error>(Response::new(Body::empty()))
    });

    builder()
        .serve_connection(io, service)
        .await
        .expect("connection");
}

#[tokio::test]
async fn connection_close_shuts_down_after_response() {
    let _ = pretty_env_logger::try_init();

    let io = IoBuilder::new()
        .read(b"GET / HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n")
        .write(
            b"HTTP/1.1 200 OK\r\n\
              connection: close\r\n\
              content-length: 0\r\n\
              \r\n",
        )
        .build();

    let service = service_fn(|_req: Request<Body>| async {
        Ok::<_, stoker::Error>(Response::new(Body::empty()))
    });

    builder()
        .serve_connection(io, service)
        .await
        .expect("connection");
}

#[tokio::test]
async fn chunked_request_with_trailers() {
    let _ = pretty_env_logger::try_init();

    let io = IoBuilder::new()
        .read(
            b"POST / HTTP/1.1\r\n\
              Host: h\r\n\
              Transfer-Encoding: chunked\r\n\
              \r\n\
              5\r\nhello\r\n\
              0\r\n\
              checksum: abc123\r\n\
              \r\n",
        )
        .write(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok")
        .build();

    let service = service_fn(|req: Request<Body>| async {
        let mut body = req.into_body();
        let data = read_full(&mut body).await;
        assert_eq!(data, b"hello");
        let trailers = body.trailers().await.expect("trailers ok");
        let trailers = trailers.expect("trailers present");
        assert_eq!(trailers.get("checksum").unwrap(), "abc123");
        Ok::<_, stoker::Error>(Response::new(Body::from("ok")))
    });

    builder()
        .serve_connection(io, service)
        .await
        .expect("connection");
}

#[tokio::test]
async fn chunked_response_with_trailers() {
    let _ = pretty_env_logger::try_init();

    // a response body that streams one chunk and then trailers
    struct TrailersBody {
        data: Option<Bytes>,
        trailers: Option<HeaderMap>,
    }

    impl HttpBody for TrailersBody {
        type Data = Bytes;
        type Error = stoker::Error;

        fn poll_data(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
            Poll::Ready(self.data.take().map(Ok))
        }

        fn poll_trailers(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
            Poll::Ready(Ok(self.trailers.take()))
        }

        fn is_end_stream(&self) -> bool {
            self.data.is_none() && self.trailers.is_none()
        }
    }

    let io = IoBuilder::new()
        .read(b"GET / HTTP/1.1\r\nHost: h\r\nTE: trailers\r\n\r\n")
        .write(
            b"HTTP/1.1 200 OK\r\n\
              trailer: checksum\r\n\
              transfer-encoding: chunked\r\n\
              \r\n\
              5\r\nhello\r\n\
              0\r\n\
              checksum: abc123\r\n\
              \r\n",
        )
        .build();

    let service = service_fn(|_req: Request<Body>| async {
        let mut trailers = HeaderMap::new();
        trailers.insert("checksum", "abc123".parse().unwrap());
        Response::builder()
            .header("trailer", "checksum")
            .body(TrailersBody {
                data: Some(Bytes::from_static(b"hello")),
                trailers: Some(trailers),
            })
            .map_err(http::Error::from)
    });

    builder()
        .serve_connection(io, service)
        .await
        .expect("connection");
}

#[tokio::test]
async fn head_response_suppresses_body() {
    let _ = pretty_env_logger::try_init();

    let io = IoBuilder::new()
        .read(b"HEAD / HTTP/1.1\r\nHost: h\r\n\r\n")
        .write(b"HTTP/1.1 200 OK\r\n\r\n")
        .build();

    let service = service_fn(|_req: Request<Body>| async {
        Ok::<_, stoker::Error>(Response::new(Body::from("Hello")))
    });

    builder()
        .serve_connection(io, service)
        .await
        .expect("connection");
}

#[tokio::test(start_paused = true)]
async fn header_read_timeout_aborts_connection() {
    let _ = pretty_env_logger::try_init();

    // keep the handle alive so reads stay pending instead of reporting EOF
    let (io, handle) = IoBuilder::new().build_with_handle();

    let service = service_fn(|_req: Request<Body>| async {
        Ok::<_, stoker::Error>(Response::new(Body::empty()))
    });

    let err = builder()
        .header_read_timeout(Duration::from_secs(5))
        .serve_connection(io, service)
        .await
        .expect_err("times out");
    assert!(err.is_header_timeout(), "unexpected error: {:?}", err);

    drop(handle);
}

#[tokio::test]
async fn byte_counters_track_the_exchange() {
    let _ = pretty_env_logger::try_init();

    let request = b"GET / HTTP/1.1\r\nHost: h\r\n\r\n";
    let response = b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n";
    let io = IoBuilder::new().read(request).write(response).build();

    let service = service_fn(|_req: Request<Body>| async {
        Ok::<_, stoker::Error>(Response::new(Body::empty()))
    });

    let mut conn = builder().serve_connection(io, service);
    (&mut conn).await.expect("connection");

    assert_eq!(conn.bytes_read(), request.len() as u64);
    assert_eq!(conn.bytes_written(), response.len() as u64);
}
