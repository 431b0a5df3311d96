use std::io::{self, Read, Write};
use std::sync::Arc;

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::content::Content;

/// Named transform applied to request content while it is written.
pub trait HttpEncoding: Send + Sync {
    /// Value emitted in the `Content-Encoding` header.
    fn name(&self) -> &str;

    fn encode(&self, content: &dyn Content, sink: &mut dyn Write) -> io::Result<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GzipEncoding;

impl HttpEncoding for GzipEncoding {
    fn name(&self) -> &str {
        "gzip"
    }

    fn encode(&self, content: &dyn Content, sink: &mut dyn Write) -> io::Result<()> {
        let mut encoder = GzEncoder::new(sink, Compression::default());
        content.write_to(&mut encoder)?;
        encoder.finish()?.flush()
    }
}

/// Content whose bytes pass through an [`HttpEncoding`]. The encoded length
/// is not known up front.
pub struct EncodedContent {
    inner: Arc<dyn Content>,
    encoding: Arc<dyn HttpEncoding>,
}

impl EncodedContent {
    pub fn new(inner: Arc<dyn Content>, encoding: Arc<dyn HttpEncoding>) -> Self {
        Self { inner, encoding }
    }

    pub fn encoding_name(&self) -> &str {
        self.encoding.name()
    }
}

impl Content for EncodedContent {
    fn length(&self) -> Option<u64> {
        None
    }

    fn media_type(&self) -> Option<&str> {
        self.inner.media_type()
    }

    fn retry_supported(&self) -> bool {
        self.inner.retry_supported()
    }

    fn write_to(&self, sink: &mut dyn Write) -> io::Result<()> {
        self.encoding.encode(self.inner.as_ref(), sink)
    }
}

/// Reader that reads its inner stream to the end before releasing it, so a
/// pooled connection is never handed back with unread bytes.
pub struct ConsumingReader<R: Read> {
    inner: Option<R>,
}

impl<R: Read> ConsumingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner: Some(inner) }
    }

    /// Reads and discards whatever is left, then drops the inner stream.
    pub fn exhaust(&mut self) -> io::Result<u64> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(0);
        };
        io::copy(&mut inner, &mut io::sink())
    }
}

impl<R: Read> Read for ConsumingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(inner) => inner.read(buf),
            None => Ok(0),
        }
    }
}

impl<R: Read> Drop for ConsumingReader<R> {
    fn drop(&mut self) {
        if let Err(error) = self.exhaust() {
            tracing::debug!(error = %error, "failed to drain response content");
        }
    }
}

pub(crate) type BoxedReader = Box<dyn Read + Send>;

/// Splits a `Content-Encoding` value into its codings, in application order.
pub(crate) fn parse_content_codings(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

/// Wraps `raw` in decoders for the codings, last applied first. The raw
/// stream sits inside a [`ConsumingReader`] so trailing bytes the decoders
/// leave behind are still drained. Unknown codings stop decoding and the
/// stream is returned as decoded so far.
pub(crate) fn decode_response_stream(
    codings: &[String],
    raw: BoxedReader,
) -> io::Result<BoxedReader> {
    let mut stream: BoxedReader = Box::new(ConsumingReader::new(raw));
    for coding in codings.iter().rev() {
        stream = match coding.as_str() {
            "identity" => stream,
            "gzip" | "x-gzip" => Box::new(flate2::read::GzDecoder::new(stream)),
            "deflate" => Box::new(flate2::read::ZlibDecoder::new(stream)),
            "br" => Box::new(brotli::Decompressor::new(stream, 4096)),
            "zstd" => Box::new(zstd::stream::read::Decoder::new(stream)?),
            other => {
                tracing::debug!(encoding = other, "leaving unsupported content-encoding undecoded");
                return Ok(stream);
            }
        };
    }
    Ok(Box::new(ConsumingReader::new(stream)))
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use flate2::Compression;
    use flate2::write::{GzEncoder, ZlibEncoder};

    use super::{
        ConsumingReader, EncodedContent, GzipEncoding, decode_response_stream,
        parse_content_codings,
    };
    use crate::content::{ByteArrayContent, Content};

    struct CountingReader {
        inner: Cursor<Vec<u8>>,
        read: Arc<AtomicUsize>,
    }

    impl Read for CountingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let read = self.inner.read(buf)?;
            self.read.fetch_add(read, Ordering::SeqCst);
            Ok(read)
        }
    }

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).expect("gzip write");
        encoder.finish().expect("gzip finish")
    }

    #[test]
    fn gzip_encoding_round_trips_through_decoder() {
        let content = EncodedContent::new(
            Arc::new(ByteArrayContent::from_string(None, "hello hello hello")),
            Arc::new(GzipEncoding),
        );
        assert_eq!(content.length(), None);
        assert_eq!(content.encoding_name(), "gzip");

        let mut wire = Vec::new();
        content.write_to(&mut wire).expect("encode");
        let mut decoded = String::new();
        decode_response_stream(&["gzip".to_owned()], Box::new(Cursor::new(wire)))
            .expect("decoder")
            .read_to_string(&mut decoded)
            .expect("decode");
        assert_eq!(decoded, "hello hello hello");
    }

    #[test]
    fn decoder_drains_trailing_bytes_when_dropped() {
        let mut wire = gzip(b"body");
        wire.extend_from_slice(b"trailing garbage left on the connection");
        let total = wire.len();
        let read = Arc::new(AtomicUsize::new(0));
        let raw = CountingReader {
            inner: Cursor::new(wire),
            read: Arc::clone(&read),
        };

        let mut stream = decode_response_stream(&["gzip".to_owned()], Box::new(raw))
            .expect("decoder");
        let mut first = [0_u8; 4];
        stream.read_exact(&mut first).expect("read decoded");
        assert_eq!(&first, b"body");
        drop(stream);

        assert_eq!(read.load(Ordering::SeqCst), total);
    }

    #[test]
    fn codings_are_undone_last_first() {
        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(b"layered").expect("zlib write");
        let wire = gzip(&zlib.finish().expect("zlib finish"));

        let codings = parse_content_codings("deflate, GZIP");
        assert_eq!(codings, ["deflate", "gzip"]);
        let mut decoded = Vec::new();
        decode_response_stream(&codings, Box::new(Cursor::new(wire)))
            .expect("decoder")
            .read_to_end(&mut decoded)
            .expect("decode");
        assert_eq!(decoded, b"layered");
    }

    #[test]
    fn unknown_coding_passes_bytes_through() {
        let mut decoded = Vec::new();
        decode_response_stream(&["compress".to_owned()], Box::new(Cursor::new(b"raw".to_vec())))
            .expect("decoder")
            .read_to_end(&mut decoded)
            .expect("read");
        assert_eq!(decoded, b"raw");
    }

    #[test]
    fn exhaust_is_idempotent() {
        let mut reader = ConsumingReader::new(Cursor::new(vec![1_u8; 10]));
        assert_eq!(reader.exhaust().expect("exhaust"), 10);
        assert_eq!(reader.exhaust().expect("exhaust"), 0);
        let mut buf = [0_u8; 1];
        assert_eq!(reader.read(&mut buf).expect("read"), 0);
    }
}
