#![cfg(feature = "ureq-connector")]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use reqflow::prelude::{ByteArrayContent, Error, RequestFactory, RetryStrategy};
use reqflow::testing::RecordingSleeper;
use reqflow::{ErrorCode, FixedBackOff, TransportErrorKind, UreqConnector};
use serde_json::Value;

/// One canned answer, served on its own connection.
struct Reply {
    status: u16,
    reason: &'static str,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
}

impl Reply {
    fn new(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// What the server saw for one attempt.
#[derive(Debug)]
struct Exchange {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Exchange {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Loopback server answering one connection per scripted reply, in order.
struct ScriptedServer {
    origin: String,
    exchanges: mpsc::Receiver<Exchange>,
}

impl ScriptedServer {
    fn serve(script: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let origin = format!("http://{}", listener.local_addr().expect("local address"));
        let (sender, exchanges) = mpsc::channel();

        thread::spawn(move || {
            for reply in script {
                let Ok((stream, _)) = listener.accept() else {
                    return;
                };
                if answer(stream, &reply, &sender).is_err() {
                    return;
                }
            }
        });

        Self { origin, exchanges }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.origin)
    }

    /// Exchanges recorded so far. Each one is recorded before its reply is
    /// written, so everything a finished call touched is present.
    fn exchanges(&self) -> Vec<Exchange> {
        self.exchanges.try_iter().collect()
    }
}

fn answer(
    stream: TcpStream,
    reply: &Reply,
    exchanges: &mpsc::Sender<Exchange>,
) -> std::io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut line = String::new();
    reader.read_line(&mut line)?;
    let mut request_line = line.split_whitespace();
    let method = request_line.next().unwrap_or_default().to_owned();
    let target = request_line.next().unwrap_or_default().to_owned();

    let mut headers = Vec::new();
    loop {
        line.clear();
        reader.read_line(&mut line)?;
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_owned()));
        }
    }

    let length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0_u8; length];
    reader.read_exact(&mut body)?;

    let _ = exchanges.send(Exchange {
        method,
        target,
        headers,
        body,
    });

    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        reply.status,
        reply.reason,
        reply.body.len()
    );
    for (name, value) in &reply.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");

    let mut stream = stream;
    stream.write_all(head.as_bytes())?;
    stream.write_all(&reply.body)?;
    stream.flush()
}

fn factory() -> RequestFactory {
    RequestFactory::new(UreqConnector::new())
}

#[test]
fn get_json_succeeds_and_advertises_gzip() {
    let server = ScriptedServer::serve(vec![
        Reply::new(200, "OK")
            .header("Content-Type", "application/json")
            .body(r#"{"ok":true}"#),
    ]);

    let mut request = factory().get(&server.url("/v1/ping")).expect("request");
    request.headers_mut().set_user_agent(Some("integration/1.0"));
    let body: Value = request
        .execute()
        .expect("call should succeed")
        .parse_as()
        .expect("json body");
    assert_eq!(body["ok"], true);

    let exchanges = server.exchanges();
    assert_eq!(exchanges.len(), 1);
    assert_eq!(exchanges[0].method, "GET");
    assert_eq!(exchanges[0].target, "/v1/ping");
    assert!(exchanges[0].body.is_empty());
    assert_eq!(exchanges[0].header("accept-encoding"), Some("gzip"));
    assert!(
        exchanges[0]
            .header("user-agent")
            .is_some_and(|value| value.starts_with("integration/1.0 reqflow/"))
    );
}

#[test]
fn unavailable_responses_are_retried_with_backoff() {
    let server = ScriptedServer::serve(vec![
        Reply::new(503, "Service Unavailable").body("busy"),
        Reply::new(200, "OK")
            .header("Content-Type", "text/plain")
            .body("created"),
    ]);
    let sleeper = Arc::new(RecordingSleeper::new());

    let mut request = factory()
        .post(
            &server.url("/v1/orders"),
            ByteArrayContent::from_string(Some("text/plain"), "order-1"),
        )
        .expect("request");
    request
        .set_num_retries(2)
        .set_retry_strategy(RetryStrategy::FixedInterval(FixedBackOff::new(
            Duration::from_millis(20),
        )))
        .set_sleeper(sleeper.clone());
    let mut response = request.execute().expect("retried call should succeed");

    assert_eq!(response.parse_as_string().expect("body"), "created");
    assert_eq!(sleeper.sleeps(), vec![Duration::from_millis(20)]);

    let exchanges = server.exchanges();
    assert_eq!(exchanges.len(), 2);
    for exchange in &exchanges {
        assert_eq!(exchange.body, b"order-1");
        assert_eq!(exchange.header("content-type"), Some("text/plain"));
    }
}

#[test]
fn see_other_redirect_is_followed_as_get() {
    let server = ScriptedServer::serve(vec![
        Reply::new(303, "See Other").header("Location", "/v1/orders/7"),
        Reply::new(200, "OK").body("order 7"),
    ]);

    let mut request = factory()
        .post(
            &server.url("/v1/orders"),
            ByteArrayContent::from_string(None, "payload"),
        )
        .expect("request");
    request.headers_mut().set_authorization(Some("Bearer secret"));
    let mut response = request.execute().expect("redirect followed");

    assert_eq!(response.parse_as_string().expect("body"), "order 7");
    let exchanges = server.exchanges();
    assert_eq!(exchanges.len(), 2);
    assert_eq!(exchanges[0].header("authorization"), Some("Bearer secret"));
    assert_eq!(exchanges[1].method, "GET");
    assert_eq!(exchanges[1].target, "/v1/orders/7");
    assert!(exchanges[1].body.is_empty());
    assert_eq!(exchanges[1].header("authorization"), None);
}

#[test]
fn large_content_streams_with_its_declared_length() {
    let payload: Vec<u8> = (0..300_000_u32).map(|value| (value % 239) as u8).collect();
    let server = ScriptedServer::serve(vec![Reply::new(201, "Created")]);

    let mut request = factory()
        .put(
            &server.url("/v1/blobs/9"),
            ByteArrayContent::new(Some("application/octet-stream"), payload.clone()),
        )
        .expect("request");
    let response = request.execute().expect("upload accepted");
    assert_eq!(response.status_code(), 201);

    let exchanges = server.exchanges();
    assert_eq!(exchanges.len(), 1);
    let expected_length = payload.len().to_string();
    assert_eq!(
        exchanges[0].header("content-length"),
        Some(expected_length.as_str())
    );
    assert_eq!(exchanges[0].header("transfer-encoding"), None);
    assert_eq!(exchanges[0].body, payload);
}

#[test]
fn gzip_body_is_decoded() {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(b"compressed payload")
        .expect("gzip write");
    let compressed = encoder.finish().expect("gzip finish");
    let server = ScriptedServer::serve(vec![
        Reply::new(200, "OK")
            .header("Content-Encoding", "gzip")
            .body(compressed),
    ]);

    let mut response = factory()
        .get(&server.url("/v1/blob"))
        .expect("request")
        .execute()
        .expect("response");
    assert_eq!(response.content_encoding(), Some("gzip"));
    assert_eq!(
        response.parse_as_string().expect("decoded"),
        "compressed payload"
    );
}

#[test]
fn non_success_status_surfaces_status_and_body() {
    let server = ScriptedServer::serve(vec![Reply::new(404, "Not Found").body("no such order")]);

    let error = factory()
        .get(&server.url("/v1/orders/404"))
        .expect("request")
        .execute()
        .expect_err("404 raised");

    assert_eq!(error.code(), ErrorCode::HttpResponse);
    assert_eq!(error.status_code(), Some(404));
    let http_error = error.as_http_response().expect("http response error");
    assert_eq!(http_error.message(), "404 Not Found\nno such order");
}

#[test]
fn refused_connection_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let address = listener.local_addr().expect("address");
    drop(listener);

    let mut request = factory()
        .get(&format!("http://{address}/v1/ping"))
        .expect("request");
    request.set_connect_timeout(Duration::from_secs(1));
    let error = request.execute().expect_err("connection refused");

    match error {
        Error::Transport { source, .. } => {
            assert!(matches!(
                source.kind(),
                TransportErrorKind::Connect | TransportErrorKind::Other
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
}
