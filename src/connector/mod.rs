//! Boundary between the executor and the stack that moves bytes.
//!
//! A [`Connector`] turns a method and url into a [`LowLevelRequest`], which is
//! configured and executed exactly once per attempt. Connectors must be
//! thread-safe and hold no per-call state, since one factory serves many
//! concurrent logical calls.

use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use http::Method;

use crate::content::Content;
use crate::error::TransportError;

#[cfg(feature = "ureq-connector")]
mod ureq_connector;

#[cfg(feature = "ureq-connector")]
pub use self::ureq_connector::{UreqConnector, UreqConnectorBuilder};

/// Per-attempt socket timeouts. [`Duration::ZERO`] means no limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Timeouts {
    pub(crate) fn as_option(duration: Duration) -> Option<Duration> {
        if duration.is_zero() { None } else { Some(duration) }
    }
}

pub trait Connector: Send + Sync {
    fn build_request(&self, method: &Method, url: &str) -> crate::Result<Box<dyn LowLevelRequest>>;

    fn supports_method(&self, method: &Method) -> bool {
        let _ = method;
        true
    }
}

pub trait LowLevelRequest: Send {
    fn add_header(&mut self, name: &str, value: &str);

    fn set_content_type(&mut self, content_type: Option<&str>);

    fn set_content_encoding(&mut self, content_encoding: Option<&str>);

    fn set_content_length(&mut self, content_length: Option<u64>);

    fn set_streaming_content(&mut self, content: Option<Arc<dyn Content>>);

    fn set_timeouts(&mut self, timeouts: Timeouts);

    fn execute(self: Box<Self>) -> Result<Box<dyn LowLevelResponse>, TransportError>;
}

pub trait LowLevelResponse: Send {
    fn status_code(&self) -> u16;

    fn reason_phrase(&self) -> Option<&str>;

    /// Header pairs in wire order.
    fn headers(&self) -> Vec<(String, String)>;

    /// Takes the body stream. Later calls return `None`.
    fn content(&mut self) -> io::Result<Option<Box<dyn Read + Send>>>;

    /// Releases the connection without reading further.
    fn disconnect(&mut self);
}
