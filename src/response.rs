use std::fmt;
use std::io::{self, Read, Write};

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::connector::LowLevelResponse;
use crate::encoding::{BoxedReader, ConsumingReader, decode_response_stream, parse_content_codings};
use crate::error::Error;
use crate::headers::Headers;
use crate::media_type::{Charset, MediaType};
use crate::util::{is_success_status, truncate_body};

/// Where the one-shot response content stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentState {
    /// Nothing has been read yet.
    Unread,
    /// The stream was handed to the caller.
    Reading,
    /// Fully read, drained or released.
    Consumed,
}

impl ContentState {
    fn describe(self) -> &'static str {
        match self {
            Self::Unread => "unread",
            Self::Reading => "already being read",
            Self::Consumed => "already consumed",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct ResponseOptions {
    pub(crate) return_raw_stream: bool,
    pub(crate) logging_enabled: bool,
    pub(crate) content_logging_limit: usize,
}

/// Response to one attempt of a [`Request`](crate::Request).
///
/// The content is materialized lazily and can be read once; reading again
/// fails with [`Error::ContentState`].
pub struct Response {
    status_code: u16,
    status_message: Option<String>,
    headers: Headers,
    media_type: Option<MediaType>,
    content_codings: Vec<String>,
    options: ResponseOptions,
    low_level: Box<dyn LowLevelResponse>,
    state: ContentState,
}

impl fmt::Debug for Response {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Response")
            .field("status_code", &self.status_code)
            .field("status_message", &self.status_message)
            .field("headers", &self.headers)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Response {
    pub(crate) fn new(
        low_level: Box<dyn LowLevelResponse>,
        header_template: &Headers,
        options: ResponseOptions,
    ) -> Self {
        let status_code = low_level.status_code();
        let status_message = low_level
            .reason_phrase()
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .map(ToOwned::to_owned);
        // Only wire headers reach a response; template values are dropped.
        let mut headers = header_template.clone();
        headers.clear();
        headers.extend_from_wire(low_level.headers());
        let media_type = headers.content_type().and_then(MediaType::parse);
        let content_codings = headers
            .get_all(crate::headers::CONTENT_ENCODING)
            .iter()
            .flat_map(|value| parse_content_codings(value))
            .collect();

        if options.logging_enabled {
            tracing::debug!(
                status = status_code,
                reason = status_message.as_deref().unwrap_or_default(),
                headers = ?headers.to_wire(),
                "received response"
            );
        }

        Self {
            status_code,
            status_message,
            headers,
            media_type,
            content_codings,
            options,
            low_level,
            state: ContentState::Unread,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.content_type()
    }

    pub fn media_type(&self) -> Option<&MediaType> {
        self.media_type.as_ref()
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.headers.content_encoding()
    }

    pub fn content_state(&self) -> ContentState {
        self.state
    }

    pub fn is_success_status_code(&self) -> bool {
        is_success_status(self.status_code)
    }

    /// Charset used by [`Response::parse_as_string`].
    pub fn content_charset(&self) -> Charset {
        self.media_type
            .as_ref()
            .map_or(Charset::Latin1, MediaType::charset)
    }

    fn take_stream(&mut self) -> crate::Result<Option<BoxedReader>> {
        if self.state != ContentState::Unread {
            return Err(Error::ContentState {
                state: self.state.describe(),
            });
        }
        self.state = ContentState::Consumed;
        let raw = self
            .low_level
            .content()
            .map_err(|source| Error::ReadContent { source })?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let mut stream: BoxedReader =
            if self.options.return_raw_stream || self.content_codings.is_empty() {
                Box::new(ConsumingReader::new(raw))
            } else {
                decode_response_stream(&self.content_codings, raw)
                    .map_err(|source| Error::ReadContent { source })?
            };
        if self.options.logging_enabled
            && self.options.content_logging_limit > 0
            && tracing::enabled!(tracing::Level::TRACE)
        {
            stream = Box::new(LoggingReader::new(stream, self.options.content_logging_limit));
        }
        Ok(Some(stream))
    }

    /// Hands out the decoded content stream. The stream drains the connection
    /// when dropped.
    pub fn content(&mut self) -> crate::Result<Option<Box<dyn Read + Send>>> {
        let stream = self.take_stream()?;
        if stream.is_some() {
            self.state = ContentState::Reading;
        }
        Ok(stream)
    }

    pub fn into_content(mut self) -> crate::Result<Option<Box<dyn Read + Send>>> {
        self.content()
    }

    pub fn read_bytes(&mut self) -> crate::Result<Bytes> {
        let Some(mut stream) = self.take_stream()? else {
            return Ok(Bytes::new());
        };
        let mut buffer = Vec::new();
        stream
            .read_to_end(&mut buffer)
            .map_err(|source| Error::ReadContent { source })?;
        Ok(Bytes::from(buffer))
    }

    pub fn parse_as_string(&mut self) -> crate::Result<String> {
        let charset = self.content_charset();
        let bytes = self.read_bytes()?;
        Ok(charset.decode(&bytes))
    }

    /// Deserializes JSON content. Responses declaring a non-JSON media type
    /// are rejected without reading.
    pub fn parse_as<T: DeserializeOwned>(&mut self) -> crate::Result<T> {
        if let Some(media_type) = &self.media_type
            && !media_type.is_json()
        {
            return Err(Error::UnsupportedContentType {
                content_type: self.content_type().map(ToOwned::to_owned),
            });
        }
        let bytes = self.read_bytes()?;
        serde_json::from_slice(&bytes).map_err(|source| Error::Deserialize {
            source,
            body: truncate_body(&bytes),
        })
    }

    /// Copies the content into `sink`, returning the number of bytes copied.
    pub fn download(&mut self, sink: &mut dyn Write) -> crate::Result<u64> {
        let Some(mut stream) = self.take_stream()? else {
            return Ok(0);
        };
        let copied = io::copy(&mut stream, sink).map_err(|source| Error::ReadContent { source })?;
        sink.flush()?;
        Ok(copied)
    }

    /// Reads and discards unread content so the connection can be reused.
    /// Safe to call repeatedly.
    pub fn ignore(&mut self) -> crate::Result<()> {
        if self.state != ContentState::Unread {
            return Ok(());
        }
        self.state = ContentState::Consumed;
        let raw = self
            .low_level
            .content()
            .map_err(|source| Error::ReadContent { source })?;
        if let Some(raw) = raw {
            ConsumingReader::new(raw)
                .exhaust()
                .map_err(|source| Error::ReadContent { source })?;
        }
        Ok(())
    }

    pub(crate) fn ignore_quietly(&mut self) {
        if let Err(error) = self.ignore() {
            tracing::debug!(error = %error, "failed to drain response content");
        }
    }

    /// Drains what is left and releases the connection.
    pub fn disconnect(&mut self) {
        self.ignore_quietly();
        self.low_level.disconnect();
    }

    /// Reads up to `limit` decoded bytes and drains the rest. Returns `None`
    /// when the content was already taken.
    pub(crate) fn content_snapshot(&mut self, limit: usize) -> Option<Bytes> {
        let stream = match self.take_stream() {
            Ok(Some(stream)) => stream,
            Ok(None) => return Some(Bytes::new()),
            Err(error) => {
                tracing::debug!(error = %error, "response content unavailable for error snapshot");
                return None;
            }
        };
        let mut snapshot = Vec::new();
        let mut limited = stream.take(limit as u64);
        if let Err(error) = limited.read_to_end(&mut snapshot) {
            tracing::debug!(error = %error, "failed to read response content for error snapshot");
        }
        Some(Bytes::from(snapshot))
    }
}

/// Traces the first `limit` bytes read through it once the stream ends or
/// is dropped.
struct LoggingReader<R: Read> {
    inner: R,
    captured: Vec<u8>,
    limit: usize,
    total: u64,
    logged: bool,
}

impl<R: Read> LoggingReader<R> {
    fn new(inner: R, limit: usize) -> Self {
        Self {
            inner,
            captured: Vec::new(),
            limit,
            total: 0,
            logged: false,
        }
    }

    fn log_once(&mut self) {
        if self.logged || self.captured.is_empty() {
            return;
        }
        self.logged = true;
        tracing::trace!(
            bytes = self.total,
            content = %String::from_utf8_lossy(&self.captured),
            "response content"
        );
    }
}

impl<R: Read> Read for LoggingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        if read == 0 {
            self.log_once();
            return Ok(0);
        }
        let room = self.limit.saturating_sub(self.captured.len());
        self.captured.extend_from_slice(&buf[..read.min(room)]);
        self.total = self.total.saturating_add(read as u64);
        Ok(read)
    }
}

impl<R: Read> Drop for LoggingReader<R> {
    fn drop(&mut self) {
        self.log_once();
    }
}
