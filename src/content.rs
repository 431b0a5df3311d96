//! Request content: a byte source with a declared length, media type and
//! replay capability.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rand::RngExt;
use serde::Serialize;

use crate::encoding::{EncodedContent, HttpEncoding};
use crate::error::Error;
use crate::headers::{self, Headers};
use crate::media_type::MediaType;
use crate::util::{ByteCountingWriter, TeeWriter, lock_unpoisoned};

pub const APPLICATION_JSON: &str = "application/json; charset=UTF-8";
pub const APPLICATION_FORM: &str = "application/x-www-form-urlencoded; charset=UTF-8";

pub trait Content: Send + Sync {
    /// Byte length, or `None` when unknown.
    fn length(&self) -> Option<u64> {
        compute_length(self)
    }

    fn media_type(&self) -> Option<&str>;

    /// Whether [`Content::write_to`] may be called more than once.
    fn retry_supported(&self) -> bool {
        true
    }

    fn write_to(&self, sink: &mut dyn Write) -> io::Result<()>;
}

/// Counts the bytes `content` writes. Content that cannot be replayed is
/// never consumed for this and reports an unknown length.
pub fn compute_length<C: Content + ?Sized>(content: &C) -> Option<u64> {
    if !content.retry_supported() {
        return None;
    }
    let mut counter = ByteCountingWriter::default();
    content.write_to(&mut counter).ok()?;
    Some(counter.count())
}

impl fmt::Debug for dyn Content {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Content")
            .field("media_type", &self.media_type())
            .field("retry_supported", &self.retry_supported())
            .finish()
    }
}

/// In-memory content.
#[derive(Clone, Debug)]
pub struct ByteArrayContent {
    bytes: Bytes,
    media_type: Option<String>,
}

impl ByteArrayContent {
    pub fn new(media_type: Option<&str>, bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            media_type: media_type.map(ToOwned::to_owned),
        }
    }

    pub fn from_string(media_type: Option<&str>, text: impl Into<String>) -> Self {
        Self::new(media_type, text.into().into_bytes())
    }

    pub fn json<T: Serialize + ?Sized>(value: &T) -> crate::Result<Self> {
        let bytes = serde_json::to_vec(value).map_err(|source| Error::SerializeJson { source })?;
        Ok(Self::new(Some(APPLICATION_JSON), bytes))
    }

    pub fn form<T: Serialize + ?Sized>(value: &T) -> crate::Result<Self> {
        let encoded =
            serde_urlencoded::to_string(value).map_err(|source| Error::SerializeForm { source })?;
        Ok(Self::new(Some(APPLICATION_FORM), encoded.into_bytes()))
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

impl Content for ByteArrayContent {
    fn length(&self) -> Option<u64> {
        Some(self.bytes.len() as u64)
    }

    fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    fn write_to(&self, sink: &mut dyn Write) -> io::Result<()> {
        sink.write_all(&self.bytes)?;
        sink.flush()
    }
}

/// Zero-length content, useful for POST or PUT without a body.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyContent;

impl Content for EmptyContent {
    fn length(&self) -> Option<u64> {
        Some(0)
    }

    fn media_type(&self) -> Option<&str> {
        None
    }

    fn write_to(&self, sink: &mut dyn Write) -> io::Result<()> {
        sink.flush()
    }
}

type ReaderFactory = Box<dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync>;

enum ReaderSource {
    Once(Mutex<Option<Box<dyn Read + Send>>>),
    Replayable(ReaderFactory),
}

/// Streamed content backed by a reader.
///
/// A plain reader can be transmitted once; [`ReaderContent::replayable`]
/// opens a fresh reader for every attempt.
pub struct ReaderContent {
    source: ReaderSource,
    media_type: Option<String>,
    length: Option<u64>,
}

impl ReaderContent {
    pub fn new(media_type: Option<&str>, reader: impl Read + Send + 'static) -> Self {
        Self {
            source: ReaderSource::Once(Mutex::new(Some(Box::new(reader)))),
            media_type: media_type.map(ToOwned::to_owned),
            length: None,
        }
    }

    pub fn replayable<F>(media_type: Option<&str>, open: F) -> Self
    where
        F: Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync + 'static,
    {
        Self {
            source: ReaderSource::Replayable(Box::new(open)),
            media_type: media_type.map(ToOwned::to_owned),
            length: None,
        }
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }
}

impl fmt::Debug for ReaderContent {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ReaderContent")
            .field("media_type", &self.media_type)
            .field("length", &self.length)
            .field("retry_supported", &self.retry_supported())
            .finish()
    }
}

impl Content for ReaderContent {
    fn length(&self) -> Option<u64> {
        self.length.or_else(|| compute_length(self))
    }

    fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    fn retry_supported(&self) -> bool {
        matches!(self.source, ReaderSource::Replayable(_))
    }

    fn write_to(&self, sink: &mut dyn Write) -> io::Result<()> {
        let mut reader = match &self.source {
            ReaderSource::Once(slot) => lock_unpoisoned(slot).take().ok_or_else(|| {
                io::Error::other("reader content has already been written")
            })?,
            ReaderSource::Replayable(open) => open()?,
        };
        io::copy(&mut reader, sink)?;
        sink.flush()
    }
}

/// Content read from a file each time it is written.
#[derive(Clone, Debug)]
pub struct FileContent {
    path: PathBuf,
    media_type: Option<String>,
}

impl FileContent {
    pub fn new(media_type: Option<&str>, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            media_type: media_type.map(ToOwned::to_owned),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Content for FileContent {
    fn length(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|metadata| metadata.len())
    }

    fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    fn write_to(&self, sink: &mut dyn Write) -> io::Result<()> {
        let mut file = File::open(&self.path)?;
        io::copy(&mut file, sink)?;
        sink.flush()
    }
}

/// One body part of a [`MultipartContent`].
#[derive(Clone, Default)]
pub struct Part {
    headers: Headers,
    content: Option<Arc<dyn Content>>,
    encoding: Option<Arc<dyn HttpEncoding>>,
}

impl Part {
    pub fn new(content: impl Content + 'static) -> Self {
        Self {
            headers: Headers::new(),
            content: Some(Arc::new(content)),
            encoding: None,
        }
    }

    pub fn headers_only(headers: Headers) -> Self {
        Self {
            headers,
            content: None,
            encoding: None,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_encoding(mut self, encoding: Arc<dyn HttpEncoding>) -> Self {
        self.encoding = Some(encoding);
        self
    }

    fn wire_headers(&self) -> Headers {
        let mut headers = self.headers.clone();
        headers.remove(headers::ACCEPT_ENCODING);
        headers.remove(headers::CONTENT_ENCODING);
        headers.remove(headers::USER_AGENT);
        headers.remove(headers::CONTENT_TYPE);
        headers.remove(headers::CONTENT_LENGTH);
        headers.remove("Content-Transfer-Encoding");

        let Some(content) = &self.content else {
            return headers;
        };
        headers.set("Content-Transfer-Encoding", "binary");
        headers.set_content_type(content.media_type());
        let length = match &self.encoding {
            Some(encoding) => {
                headers.set(headers::CONTENT_ENCODING, encoding.name());
                compute_length(content.as_ref())
            }
            None => content.length(),
        };
        headers.set_content_length(length);
        headers
    }
}

/// `multipart/related` content; replayable only if every part is.
#[derive(Clone)]
pub struct MultipartContent {
    media_type: String,
    boundary: String,
    parts: Vec<Part>,
}

impl Default for MultipartContent {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartContent {
    pub fn new() -> Self {
        let mut rng = rand::rng();
        let high = rng.random_range(0..u64::MAX);
        let low = rng.random_range(0..u64::MAX);
        Self::with_boundary(format!("__END_OF_PART__{high:016x}{low:016x}__"))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        let boundary = boundary.into();
        let media_type = MediaType::new("multipart", "related")
            .with_parameter("boundary", &boundary)
            .to_string();
        Self {
            media_type,
            boundary,
            parts: Vec::new(),
        }
    }

    pub fn add_part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }
}

impl Content for MultipartContent {
    fn media_type(&self) -> Option<&str> {
        Some(&self.media_type)
    }

    fn retry_supported(&self) -> bool {
        self.parts.iter().all(|part| {
            part.content
                .as_ref()
                .is_none_or(|content| content.retry_supported())
        })
    }

    fn write_to(&self, sink: &mut dyn Write) -> io::Result<()> {
        for part in &self.parts {
            write!(sink, "--{}\r\n", self.boundary)?;
            for (name, value) in part.wire_headers().iter() {
                write!(sink, "{name}: {value}\r\n")?;
            }
            if let Some(content) = &part.content {
                sink.write_all(b"\r\n")?;
                match &part.encoding {
                    Some(encoding) => {
                        EncodedContent::new(Arc::clone(content), Arc::clone(encoding))
                            .write_to(sink)?
                    }
                    None => content.write_to(sink)?,
                }
            }
            sink.write_all(b"\r\n")?;
        }
        write!(sink, "--{}--\r\n", self.boundary)?;
        sink.flush()
    }
}

/// Wraps content so the first `limit` bytes written are traced.
pub struct LoggingContent {
    inner: Arc<dyn Content>,
    limit: usize,
}

impl LoggingContent {
    pub fn new(inner: Arc<dyn Content>, limit: usize) -> Self {
        Self { inner, limit }
    }
}

impl Content for LoggingContent {
    fn length(&self) -> Option<u64> {
        self.inner.length()
    }

    fn media_type(&self) -> Option<&str> {
        self.inner.media_type()
    }

    fn retry_supported(&self) -> bool {
        self.inner.retry_supported()
    }

    fn write_to(&self, sink: &mut dyn Write) -> io::Result<()> {
        let mut tee = TeeWriter::new(sink, self.limit);
        self.inner.write_to(&mut tee)?;
        let (captured, total) = tee.finish();
        if !captured.is_empty() {
            tracing::trace!(
                bytes = total,
                content = %String::from_utf8_lossy(&captured),
                "request content"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, Read};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{
        ByteArrayContent, Content, EmptyContent, LoggingContent, MultipartContent, Part,
        ReaderContent, compute_length,
    };
    use crate::encoding::GzipEncoding;

    fn written(content: &dyn Content) -> Vec<u8> {
        let mut sink = Vec::new();
        content.write_to(&mut sink).expect("write to vec");
        sink
    }

    #[test]
    fn one_shot_reader_reports_unknown_length_without_consuming() {
        let content = ReaderContent::new(Some("text/plain"), Cursor::new(b"payload".to_vec()));
        assert!(!content.retry_supported());
        assert_eq!(content.length(), None);
        assert_eq!(written(&content), b"payload");

        let mut sink = Vec::new();
        assert!(content.write_to(&mut sink).is_err());
    }

    #[test]
    fn replayable_reader_is_counted_by_writing() {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        let content = ReaderContent::replayable(None, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Cursor::new(b"0123456789".to_vec())) as Box<dyn Read + Send>)
        });
        assert!(content.retry_supported());
        assert_eq!(content.length(), Some(10));
        assert_eq!(written(&content), b"0123456789");
        assert_eq!(opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn json_content_sets_media_type() {
        let content = ByteArrayContent::json(&serde_json::json!({"name": "reqflow"}))
            .expect("serialize json");
        assert_eq!(content.media_type(), Some(super::APPLICATION_JSON));
        assert_eq!(written(&content), br#"{"name":"reqflow"}"#);
        assert_eq!(compute_length(&content), Some(18));
    }

    #[test]
    fn form_content_is_url_encoded() {
        let content =
            ByteArrayContent::form(&[("q", "a b"), ("page", "2")]).expect("serialize form");
        assert_eq!(written(&content), b"q=a+b&page=2");
    }

    #[test]
    fn multipart_writes_parts_between_boundaries() {
        let content = MultipartContent::with_boundary("xyz")
            .add_part(Part::new(ByteArrayContent::from_string(
                Some("text/plain"),
                "hello",
            )))
            .add_part(Part::new(EmptyContent));
        assert_eq!(
            content.media_type(),
            Some("multipart/related; boundary=xyz")
        );
        let expected = "--xyz\r\n\
            Content-Length: 5\r\n\
            Content-Type: text/plain\r\n\
            Content-Transfer-Encoding: binary\r\n\
            \r\n\
            hello\r\n\
            --xyz\r\n\
            Content-Length: 0\r\n\
            Content-Transfer-Encoding: binary\r\n\
            \r\n\
            \r\n\
            --xyz--\r\n";
        assert_eq!(String::from_utf8(written(&content)).expect("utf8"), expected);
        assert!(content.retry_supported());
    }

    #[test]
    fn multipart_with_one_shot_part_is_not_replayable() {
        let content = MultipartContent::new().add_part(Part::new(ReaderContent::new(
            None,
            io::empty(),
        )));
        assert!(!content.retry_supported());
        assert!(content.boundary().starts_with("__END_OF_PART__"));
    }

    #[test]
    fn encoded_part_declares_content_encoding() {
        let content = MultipartContent::with_boundary("b").add_part(
            Part::new(ByteArrayContent::from_string(None, "zip me"))
                .with_encoding(Arc::new(GzipEncoding)),
        );
        let text = String::from_utf8_lossy(&written(&content)).into_owned();
        assert!(text.contains("Content-Encoding: gzip\r\n"));
    }

    #[test]
    fn logging_content_forwards_all_bytes() {
        let inner: Arc<dyn Content> = Arc::new(ByteArrayContent::from_string(None, "abcdef"));
        let content = LoggingContent::new(inner, 2);
        assert_eq!(written(&content), b"abcdef");
        assert_eq!(content.length(), Some(6));
    }
}
