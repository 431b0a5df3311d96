use std::io;

use bytes::Bytes;
use http::Method;
use thiserror::Error;

use crate::headers::Headers;
use crate::response::Response;
use crate::util::truncate_body;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Upper bound on the response content kept by an [`HttpResponseError`].
pub const MAX_ERROR_CONTENT_BYTES: usize = 16 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Timeout,
    Read,
    Write,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Timeout => "timeout",
            Self::Read => "read",
            Self::Write => "write",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Failure reported by a connector while executing one attempt.
#[derive(Debug, Error)]
#[error("{kind} failure: {source}")]
pub struct TransportError {
    kind: TransportErrorKind,
    #[source]
    source: BoxError,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    /// Wraps an I/O failure, classifying it by its [`io::ErrorKind`].
    pub fn from_io(error: io::Error) -> Self {
        let kind = classify_io_error(&error);
        Self::new(kind, error)
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn into_source(self) -> BoxError {
        self.source
    }
}

pub(crate) fn classify_io_error(error: &io::Error) -> TransportErrorKind {
    match error.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportErrorKind::Timeout,
        io::ErrorKind::NotFound => TransportErrorKind::Dns,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::AddrNotAvailable => TransportErrorKind::Connect,
        io::ErrorKind::BrokenPipe | io::ErrorKind::WriteZero => TransportErrorKind::Write,
        io::ErrorKind::ConnectionReset | io::ErrorKind::UnexpectedEof => TransportErrorKind::Read,
        _ => TransportErrorKind::Other,
    }
}

/// Final non-2xx response surfaced when `throw_on_error` is enabled.
///
/// The content is captured once, bounded by [`MAX_ERROR_CONTENT_BYTES`], and
/// the underlying stream is never touched again.
#[derive(Debug)]
pub struct HttpResponseError {
    status_code: u16,
    status_message: Option<String>,
    headers: Headers,
    content: Option<Bytes>,
    message: String,
}

impl HttpResponseError {
    pub(crate) fn from_response(response: &mut Response) -> Self {
        let content = response.content_snapshot(MAX_ERROR_CONTENT_BYTES);
        let mut message = status_line(response.status_code(), response.status_message());
        if let Some(content) = &content
            && !content.is_empty()
        {
            message.push('\n');
            message.push_str(&truncate_body(content));
        }
        Self {
            status_code: response.status_code(),
            status_message: response.status_message().map(ToOwned::to_owned),
            headers: response.headers().clone(),
            content,
            message,
        }
    }

    pub fn new(status_code: u16, status_message: Option<String>, headers: Headers) -> Self {
        let message = status_line(status_code, status_message.as_deref());
        Self {
            status_code,
            status_message,
            headers,
            content: None,
            message,
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

    pub fn raw_content(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    pub fn content_lossy(&self) -> Option<String> {
        self.content
            .as_ref()
            .map(|content| String::from_utf8_lossy(content).into_owned())
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_success_status_code(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

impl std::fmt::Display for HttpResponseError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(&self.message)
    }
}

impl std::error::Error for HttpResponseError {}

fn status_line(status_code: u16, status_message: Option<&str>) -> String {
    let mut line = String::new();
    if status_code != 0 {
        line.push_str(&status_code.to_string());
    }
    if let Some(status_message) = status_message {
        if status_code != 0 {
            line.push(' ');
        }
        line.push_str(status_message);
    }
    line
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidArgument,
    InvalidUrl,
    InvalidRedirectLocation,
    Transport,
    HttpResponse,
    ReadContent,
    ContentState,
    Deserialize,
    SerializeJson,
    SerializeForm,
    UnsupportedContentType,
    Io,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::InvalidUrl => "invalid_url",
            Self::InvalidRedirectLocation => "invalid_redirect_location",
            Self::Transport => "transport",
            Self::HttpResponse => "http_response",
            Self::ReadContent => "read_content",
            Self::ContentState => "content_state",
            Self::Deserialize => "deserialize",
            Self::SerializeJson => "serialize_json",
            Self::SerializeForm => "serialize_form",
            Self::UnsupportedContentType => "unsupported_content_type",
            Self::Io => "io",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid redirect location {location} for {method} {url}")]
    InvalidRedirectLocation {
        location: String,
        method: Method,
        url: String,
    },
    #[error("http transport error for {method} {url}: {source}")]
    Transport {
        method: Method,
        url: String,
        #[source]
        source: TransportError,
    },
    #[error("{0}")]
    HttpResponse(Box<HttpResponseError>),
    #[error("failed to read response content: {source}")]
    ReadContent {
        #[source]
        source: io::Error,
    },
    #[error("response content is {state}")]
    ContentState { state: &'static str },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("failed to serialize request json: {source}")]
    SerializeJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize request form: {source}")]
    SerializeForm {
        #[source]
        source: serde_urlencoded::ser::Error,
    },
    #[error("no parser defined for content type {content_type:?}")]
    UnsupportedContentType { content_type: Option<String> },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Self::InvalidRedirectLocation { .. } => ErrorCode::InvalidRedirectLocation,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::HttpResponse(_) => ErrorCode::HttpResponse,
            Self::ReadContent { .. } => ErrorCode::ReadContent,
            Self::ContentState { .. } => ErrorCode::ContentState,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::SerializeJson { .. } => ErrorCode::SerializeJson,
            Self::SerializeForm { .. } => ErrorCode::SerializeForm,
            Self::UnsupportedContentType { .. } => ErrorCode::UnsupportedContentType,
            Self::Io(_) => ErrorCode::Io,
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Status code of the response behind an [`Error::HttpResponse`].
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpResponse(error) => Some(error.status_code()),
            _ => None,
        }
    }

    pub fn as_http_response(&self) -> Option<&HttpResponseError> {
        match self {
            Self::HttpResponse(error) => Some(error),
            _ => None,
        }
    }

    pub fn as_transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::{Error, ErrorCode, TransportError, TransportErrorKind};

    #[test]
    fn io_failures_are_classified_by_kind() {
        let refused = TransportError::from_io(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(refused.kind(), TransportErrorKind::Connect);

        let timed_out = TransportError::from_io(io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(timed_out.kind(), TransportErrorKind::Timeout);

        let reset = TransportError::from_io(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(reset.kind(), TransportErrorKind::Read);
    }

    #[test]
    fn error_codes_are_stable_snake_case() {
        let error = Error::invalid_argument("num_retries must be set");
        assert_eq!(error.code(), ErrorCode::InvalidArgument);
        assert_eq!(error.code().as_str(), "invalid_argument");
        assert_eq!(error.status_code(), None);
    }
}
