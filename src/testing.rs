//! Test doubles for driving requests without a network.
//!
//! [`MockConnector`] replays a scripted sequence of responses and failures
//! and records every transmission it receives.

use std::collections::VecDeque;
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use http::Method;

use crate::backoff::{Clock, Interrupted, Sleeper};
use crate::connector::{Connector, LowLevelRequest, LowLevelResponse, Timeouts};
use crate::content::Content;
use crate::error::{TransportError, TransportErrorKind};
use crate::util::lock_unpoisoned;

/// Tracks how much of a mock body has been read off the "connection".
#[derive(Clone, Debug, Default)]
pub struct DrainGauge {
    read: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
    disconnected: Arc<AtomicBool>,
}

impl DrainGauge {
    pub fn bytes_read(&self) -> u64 {
        self.read.load(Ordering::SeqCst)
    }

    pub fn fully_drained(&self) -> bool {
        self.bytes_read() >= self.total.load(Ordering::SeqCst)
    }

    pub fn disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

/// Scripted response returned by [`MockConnector`].
#[derive(Clone, Debug)]
pub struct MockResponse {
    status_code: u16,
    reason_phrase: Option<String>,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    gauge: DrainGauge,
}

impl MockResponse {
    pub fn status(status_code: u16) -> Self {
        let reason_phrase = http::StatusCode::from_u16(status_code)
            .ok()
            .and_then(|status| status.canonical_reason())
            .map(ToOwned::to_owned);
        Self {
            status_code,
            reason_phrase,
            headers: Vec::new(),
            body: None,
            gauge: DrainGauge::default(),
        }
    }

    pub fn ok() -> Self {
        Self::status(200)
    }

    pub fn with_reason(mut self, reason_phrase: impl Into<String>) -> Self {
        self.reason_phrase = Some(reason_phrase.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        self.gauge
            .total
            .store(body.len() as u64, Ordering::SeqCst);
        self.body = Some(body);
        self
    }

    pub fn drain_gauge(&self) -> DrainGauge {
        self.gauge.clone()
    }

    pub fn into_low_level(self) -> Box<dyn LowLevelResponse> {
        Box::new(MockLowLevelResponse {
            body: self
                .body
                .map(|body| GaugedReader {
                    inner: Cursor::new(body),
                    gauge: self.gauge.clone(),
                }),
            status_code: self.status_code,
            reason_phrase: self.reason_phrase,
            headers: self.headers,
            gauge: self.gauge,
        })
    }
}

struct GaugedReader {
    inner: Cursor<Vec<u8>>,
    gauge: DrainGauge,
}

impl Read for GaugedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.gauge.read.fetch_add(read as u64, Ordering::SeqCst);
        Ok(read)
    }
}

struct MockLowLevelResponse {
    status_code: u16,
    reason_phrase: Option<String>,
    headers: Vec<(String, String)>,
    body: Option<GaugedReader>,
    gauge: DrainGauge,
}

impl LowLevelResponse for MockLowLevelResponse {
    fn status_code(&self) -> u16 {
        self.status_code
    }

    fn reason_phrase(&self) -> Option<&str> {
        self.reason_phrase.as_deref()
    }

    fn headers(&self) -> Vec<(String, String)> {
        self.headers.clone()
    }

    fn content(&mut self) -> io::Result<Option<Box<dyn Read + Send>>> {
        Ok(self
            .body
            .take()
            .map(|body| Box::new(body) as Box<dyn Read + Send>))
    }

    fn disconnect(&mut self) {
        self.body = None;
        self.gauge.disconnected.store(true, Ordering::SeqCst);
    }
}

/// What one attempt against a [`MockConnector`] produces.
#[derive(Clone, Debug)]
pub enum MockOutcome {
    Respond(MockResponse),
    Fail(TransportErrorKind, String),
}

/// Everything a connector received for one attempt.
#[derive(Clone, Debug)]
pub struct Transmission {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub content_length: Option<u64>,
    /// Bytes written by the streaming content, if any was attached.
    pub content: Option<Vec<u8>>,
    pub timeouts: Option<Timeouts>,
}

impl Transmission {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Default)]
struct MockState {
    script: VecDeque<MockOutcome>,
    fallback: Option<MockOutcome>,
    transmissions: Vec<Transmission>,
}

/// Connector that replays scripted outcomes in order, then the fallback,
/// then empty `200 OK` responses.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    unsupported_methods: Arc<Vec<Method>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_methods(methods: impl IntoIterator<Item = Method>) -> Self {
        Self {
            state: Arc::default(),
            unsupported_methods: Arc::new(methods.into_iter().collect()),
        }
    }

    pub fn push_response(&self, response: MockResponse) -> &Self {
        lock_unpoisoned(&self.state)
            .script
            .push_back(MockOutcome::Respond(response));
        self
    }

    pub fn push_failure(&self, kind: TransportErrorKind, message: impl Into<String>) -> &Self {
        lock_unpoisoned(&self.state)
            .script
            .push_back(MockOutcome::Fail(kind, message.into()));
        self
    }

    /// Outcome repeated once the script runs out.
    pub fn set_fallback(&self, outcome: MockOutcome) -> &Self {
        lock_unpoisoned(&self.state).fallback = Some(outcome);
        self
    }

    pub fn transmissions(&self) -> Vec<Transmission> {
        lock_unpoisoned(&self.state).transmissions.clone()
    }

    pub fn attempts(&self) -> usize {
        lock_unpoisoned(&self.state).transmissions.len()
    }

    fn next_outcome(&self, transmission: Transmission) -> MockOutcome {
        let mut state = lock_unpoisoned(&self.state);
        state.transmissions.push(transmission);
        match state.script.pop_front() {
            Some(outcome) => outcome,
            None => state
                .fallback
                .clone()
                .unwrap_or_else(|| MockOutcome::Respond(MockResponse::ok())),
        }
    }
}

impl Connector for MockConnector {
    fn build_request(&self, method: &Method, url: &str) -> crate::Result<Box<dyn LowLevelRequest>> {
        Ok(Box::new(MockRequest {
            connector: self.clone(),
            transmission: Transmission {
                method: method.clone(),
                url: url.to_owned(),
                headers: Vec::new(),
                content_type: None,
                content_encoding: None,
                content_length: None,
                content: None,
                timeouts: None,
            },
            streaming: None,
        }))
    }

    fn supports_method(&self, method: &Method) -> bool {
        !self.unsupported_methods.contains(method)
    }
}

struct MockRequest {
    connector: MockConnector,
    transmission: Transmission,
    streaming: Option<Arc<dyn Content>>,
}

impl LowLevelRequest for MockRequest {
    fn add_header(&mut self, name: &str, value: &str) {
        self.transmission
            .headers
            .push((name.to_owned(), value.to_owned()));
    }

    fn set_content_type(&mut self, content_type: Option<&str>) {
        self.transmission.content_type = content_type.map(ToOwned::to_owned);
    }

    fn set_content_encoding(&mut self, content_encoding: Option<&str>) {
        self.transmission.content_encoding = content_encoding.map(ToOwned::to_owned);
    }

    fn set_content_length(&mut self, content_length: Option<u64>) {
        self.transmission.content_length = content_length;
    }

    fn set_streaming_content(&mut self, content: Option<Arc<dyn Content>>) {
        self.streaming = content;
    }

    fn set_timeouts(&mut self, timeouts: Timeouts) {
        self.transmission.timeouts = Some(timeouts);
    }

    fn execute(self: Box<Self>) -> Result<Box<dyn LowLevelResponse>, TransportError> {
        let MockRequest {
            connector,
            mut transmission,
            streaming,
        } = *self;
        if let Some(content) = streaming {
            let mut written = Vec::new();
            content
                .write_to(&mut written)
                .map_err(|source| TransportError::new(TransportErrorKind::Write, source))?;
            transmission.content = Some(written);
        }
        match connector.next_outcome(transmission) {
            MockOutcome::Respond(response) => Ok(response.into_low_level()),
            MockOutcome::Fail(kind, message) => Err(TransportError::new(kind, message)),
        }
    }
}

/// Manually advanced clock.
#[derive(Debug)]
pub struct FakeClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut offset = lock_unpoisoned(&self.offset);
        *offset = offset.saturating_add(duration);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.origin + *lock_unpoisoned(&self.offset)
    }
}

/// Sleeper that records requested waits instead of blocking.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
    interrupt: AtomicBool,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sleep reports [`Interrupted`] after being recorded.
    pub fn interrupting() -> Self {
        Self {
            sleeps: Mutex::new(Vec::new()),
            interrupt: AtomicBool::new(true),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        lock_unpoisoned(&self.sleeps).clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        lock_unpoisoned(&self.sleeps).push(duration);
        if self.interrupt.load(Ordering::SeqCst) {
            return Err(Interrupted);
        }
        Ok(())
    }
}
