use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use http::Method;

use super::{Connector, LowLevelRequest, LowLevelResponse, Timeouts};
use crate::content::Content;
use crate::error::{TransportError, TransportErrorKind, classify_io_error};
use crate::headers;
use crate::util::lock_unpoisoned;

/// Blocking connector backed by a pooled [`ureq::Agent`].
///
/// The agent neither follows redirects nor treats non-2xx statuses as errors,
/// and it leaves content codings alone; the executor handles all three.
#[derive(Clone, Debug)]
pub struct UreqConnector {
    agent: ureq::Agent,
}

impl Default for UreqConnector {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl UreqConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> UreqConnectorBuilder {
        UreqConnectorBuilder::default()
    }

    pub fn agent(&self) -> &ureq::Agent {
        &self.agent
    }
}

#[derive(Clone, Debug)]
pub struct UreqConnectorBuilder {
    pool_idle_timeout: Duration,
    pool_max_idle_per_host: usize,
    pool_max_idle_connections: usize,
}

impl Default for UreqConnectorBuilder {
    fn default() -> Self {
        Self {
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 8,
            pool_max_idle_connections: 64,
        }
    }
}

impl UreqConnectorBuilder {
    pub fn pool_idle_timeout(mut self, pool_idle_timeout: Duration) -> Self {
        self.pool_idle_timeout = pool_idle_timeout;
        self
    }

    pub fn pool_max_idle_per_host(mut self, pool_max_idle_per_host: usize) -> Self {
        self.pool_max_idle_per_host = pool_max_idle_per_host;
        self
    }

    pub fn pool_max_idle_connections(mut self, pool_max_idle_connections: usize) -> Self {
        self.pool_max_idle_connections = pool_max_idle_connections;
        self
    }

    pub fn build(self) -> UreqConnector {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(0)
            .max_redirects_will_error(false)
            .max_idle_age(self.pool_idle_timeout)
            .max_idle_connections_per_host(self.pool_max_idle_per_host)
            .max_idle_connections(self.pool_max_idle_connections)
            .build();
        UreqConnector {
            agent: config.new_agent(),
        }
    }
}

impl Connector for UreqConnector {
    fn build_request(&self, method: &Method, url: &str) -> crate::Result<Box<dyn LowLevelRequest>> {
        Ok(Box::new(UreqRequest {
            agent: self.agent.clone(),
            method: method.clone(),
            url: url.to_owned(),
            headers: Vec::new(),
            content_type: None,
            content_encoding: None,
            content_length: None,
            content: None,
            timeouts: Timeouts {
                connect: Duration::ZERO,
                read: Duration::ZERO,
                write: Duration::ZERO,
            },
        }))
    }
}

struct UreqRequest {
    agent: ureq::Agent,
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    content_type: Option<String>,
    content_encoding: Option<String>,
    content_length: Option<u64>,
    content: Option<Arc<dyn Content>>,
    timeouts: Timeouts,
}

impl UreqRequest {
    fn builder(&self) -> ureq::http::request::Builder {
        let mut builder = ureq::http::Request::builder()
            .method(self.method.clone())
            .uri(self.url.as_str());
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(content_type) = &self.content_type {
            builder = builder.header(headers::CONTENT_TYPE, content_type.as_str());
        }
        if let Some(content_encoding) = &self.content_encoding {
            builder = builder.header(headers::CONTENT_ENCODING, content_encoding.as_str());
        }
        builder
    }

    fn run<S: ureq::AsSendBody>(
        &self,
        request: ureq::http::Request<S>,
    ) -> Result<ureq::http::Response<ureq::Body>, TransportError> {
        let configured = self
            .agent
            .configure_request(request)
            .timeout_connect(Timeouts::as_option(self.timeouts.connect))
            .timeout_recv_response(Timeouts::as_option(self.timeouts.read))
            .timeout_recv_body(Timeouts::as_option(self.timeouts.read))
            .timeout_send_body(Timeouts::as_option(self.timeouts.write))
            .build();
        self.agent
            .run(configured)
            .map_err(|source| TransportError::new(classify_ureq_error(&source), source))
    }
}

impl LowLevelRequest for UreqRequest {
    fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_owned(), value.to_owned()));
    }

    fn set_content_type(&mut self, content_type: Option<&str>) {
        self.content_type = content_type.map(ToOwned::to_owned);
    }

    fn set_content_encoding(&mut self, content_encoding: Option<&str>) {
        self.content_encoding = content_encoding.map(ToOwned::to_owned);
    }

    fn set_content_length(&mut self, content_length: Option<u64>) {
        self.content_length = content_length;
    }

    fn set_streaming_content(&mut self, content: Option<Arc<dyn Content>>) {
        self.content = content;
    }

    fn set_timeouts(&mut self, timeouts: Timeouts) {
        self.timeouts = timeouts;
    }

    fn execute(self: Box<Self>) -> Result<Box<dyn LowLevelResponse>, TransportError> {
        let builder = self.builder();
        let response = match self.content.clone() {
            Some(content) if self.content_length.is_some_and(|length| length <= BUFFERED_LIMIT) => {
                let mut body = Vec::new();
                content
                    .write_to(&mut body)
                    .map_err(|source| TransportError::new(TransportErrorKind::Write, source))?;
                let request = builder
                    .body(body)
                    .map_err(|source| TransportError::new(TransportErrorKind::Other, source))?;
                self.run(request)?
            }
            Some(content) => {
                let builder = match self.content_length {
                    Some(length) => builder.header(headers::CONTENT_LENGTH, length.to_string()),
                    None => builder,
                };
                let reader = PipedContent::spawn(content)?;
                let request = builder
                    .body(ureq::SendBody::from_owned_reader(reader))
                    .map_err(|source| TransportError::new(TransportErrorKind::Other, source))?;
                self.run(request)?
            }
            None => {
                let request = builder
                    .body(())
                    .map_err(|source| TransportError::new(TransportErrorKind::Other, source))?;
                self.run(request)?
            }
        };

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        Ok(Box::new(UreqResponse {
            status_code: status.as_u16(),
            reason_phrase: status.canonical_reason(),
            headers,
            body: Some(response.into_body()),
        }))
    }
}

/// Content of known length up to this size is buffered before sending;
/// anything else streams through [`PipedContent`].
const BUFFERED_LIMIT: u64 = 64 * 1024;
const PIPE_CHUNK: usize = 16 * 1024;
const PIPE_DEPTH: usize = 4;

type Chunk = io::Result<Vec<u8>>;

/// Turns a writer-driven [`Content`] into the reader ureq sends from. A
/// worker thread runs `write_to` and hands chunks over a bounded channel.
struct PipedContent {
    chunks: Mutex<mpsc::Receiver<Chunk>>,
    current: Cursor<Vec<u8>>,
}

impl PipedContent {
    fn spawn(content: Arc<dyn Content>) -> Result<Self, TransportError> {
        let (sender, receiver) = mpsc::sync_channel(PIPE_DEPTH);
        thread::Builder::new()
            .name("reqflow-content".to_owned())
            .spawn(move || {
                let mut writer = io::BufWriter::with_capacity(
                    PIPE_CHUNK,
                    ChannelWriter {
                        sender: sender.clone(),
                    },
                );
                let written = content
                    .write_to(&mut writer)
                    .and_then(|()| writer.flush());
                if let Err(error) = written {
                    // The receiver is gone when the send itself failed.
                    let _ = sender.send(Err(error));
                }
            })
            .map_err(|source| TransportError::new(TransportErrorKind::Write, source))?;
        Ok(Self {
            chunks: Mutex::new(receiver),
            current: Cursor::new(Vec::new()),
        })
    }
}

impl Read for PipedContent {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let read = self.current.read(buf)?;
            if read > 0 || buf.is_empty() {
                return Ok(read);
            }
            let next = lock_unpoisoned(&self.chunks).recv();
            match next {
                Ok(Ok(chunk)) => self.current = Cursor::new(chunk),
                Ok(Err(error)) => return Err(error),
                // Writer finished and dropped its sender.
                Err(mpsc::RecvError) => return Ok(0),
            }
        }
    }
}

struct ChannelWriter {
    sender: mpsc::SyncSender<Chunk>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.sender
            .send(Ok(buf.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "request body no longer read"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct UreqResponse {
    status_code: u16,
    reason_phrase: Option<&'static str>,
    headers: Vec<(String, String)>,
    body: Option<ureq::Body>,
}

impl LowLevelResponse for UreqResponse {
    fn status_code(&self) -> u16 {
        self.status_code
    }

    fn reason_phrase(&self) -> Option<&str> {
        self.reason_phrase
    }

    fn headers(&self) -> Vec<(String, String)> {
        self.headers.clone()
    }

    fn content(&mut self) -> io::Result<Option<Box<dyn Read + Send>>> {
        Ok(self
            .body
            .take()
            .map(|body| Box::new(body.into_reader()) as Box<dyn Read + Send>))
    }

    fn disconnect(&mut self) {
        self.body = None;
    }
}

fn classify_ureq_error(error: &ureq::Error) -> TransportErrorKind {
    match error {
        ureq::Error::HostNotFound => TransportErrorKind::Dns,
        ureq::Error::Timeout(_) => TransportErrorKind::Timeout,
        ureq::Error::Tls(_) => TransportErrorKind::Tls,
        ureq::Error::ConnectProxyFailed(_) | ureq::Error::ConnectionFailed => {
            TransportErrorKind::Connect
        }
        ureq::Error::Io(source) => classify_io_error(source),
        _ => TransportErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Read, Write};
    use std::sync::Arc;

    use super::{PipedContent, classify_ureq_error};
    use crate::content::{ByteArrayContent, Content};
    use crate::error::TransportErrorKind;

    struct FailsMidway;

    impl Content for FailsMidway {
        fn media_type(&self) -> Option<&str> {
            None
        }

        fn write_to(&self, sink: &mut dyn Write) -> io::Result<()> {
            sink.write_all(b"partial")?;
            Err(io::Error::other("source vanished"))
        }
    }

    #[test]
    fn piped_content_streams_every_byte() {
        let payload: Vec<u8> = (0..200_000_u32).map(|value| (value % 251) as u8).collect();
        let mut reader = PipedContent::spawn(Arc::new(ByteArrayContent::new(
            None,
            payload.clone(),
        )))
        .expect("spawn writer");

        let mut received = Vec::new();
        reader.read_to_end(&mut received).expect("read piped body");
        assert_eq!(received, payload);
    }

    #[test]
    fn piped_content_surfaces_write_failures() {
        let mut reader = PipedContent::spawn(Arc::new(FailsMidway)).expect("spawn writer");
        let mut received = Vec::new();
        let error = reader
            .read_to_end(&mut received)
            .expect_err("write failure reaches the reader");
        assert!(error.to_string().contains("source vanished"));
    }

    #[test]
    fn ureq_errors_map_to_transport_kinds() {
        assert_eq!(
            classify_ureq_error(&ureq::Error::HostNotFound),
            TransportErrorKind::Dns
        );
        assert_eq!(
            classify_ureq_error(&ureq::Error::ConnectionFailed),
            TransportErrorKind::Connect
        );
        assert_eq!(
            classify_ureq_error(&ureq::Error::Io(io::Error::from(
                io::ErrorKind::ConnectionReset
            ))),
            TransportErrorKind::Read
        );
    }
}
