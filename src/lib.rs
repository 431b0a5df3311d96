//! `reqflow` drives HTTP requests through a pluggable connector and handles
//! everything between the first attempt and the final response: retries on
//! abnormal statuses, exponential backoff, redirect following, transport
//! failure recovery and content-encoding decode.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use reqflow::prelude::{
//!     BackOffUnsuccessfulResponseHandler, ExponentialBackOff, RequestFactory,
//! };
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Item {
//!     id: String,
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let factory = RequestFactory::ureq();
//!     let mut request = factory.get("https://api.example.com/v1/items/42")?;
//!     request
//!         .set_num_retries(3)
//!         .set_unsuccessful_response_handler(Some(Arc::new(
//!             BackOffUnsuccessfulResponseHandler::new(ExponentialBackOff::default()),
//!         )));
//!
//!     let item: Item = request.execute()?.parse_as()?;
//!     println!("item id={}", item.id);
//!     Ok(())
//! }
//! ```
//!
//! # Defaults
//!
//! - Connect and read timeouts are 20 seconds; writes are unbounded.
//! - Ten retries are budgeted, shared by redirects and error recovery.
//! - Non-2xx final responses are returned as [`Error::HttpResponse`].

pub mod backoff;
mod config;
pub mod connector;
pub mod content;
pub mod encoding;
mod error;
mod execute;
mod factory;
mod handlers;
pub mod headers;
pub mod media_type;
mod redirect;
mod request;
mod response;
pub mod testing;
mod util;

pub use crate::backoff::{
    BackOff, BackOffPolicy, Clock, ExponentialBackOff, ExponentialBackOffBuilder, FixedBackOff,
    Interrupted, RetryStrategy, Sleeper, StopBackOff, SystemClock, ThreadSleeper, ZeroBackOff,
};
pub use crate::config::RequestDefaults;
pub use crate::connector::{Connector, LowLevelRequest, LowLevelResponse, Timeouts};
#[cfg(feature = "ureq-connector")]
pub use crate::connector::{UreqConnector, UreqConnectorBuilder};
pub use crate::content::{
    ByteArrayContent, Content, EmptyContent, FileContent, LoggingContent, MultipartContent, Part,
    ReaderContent,
};
pub use crate::encoding::{ConsumingReader, EncodedContent, GzipEncoding, HttpEncoding};
pub use crate::error::{
    Error, ErrorCode, HttpResponseError, MAX_ERROR_CONTENT_BYTES, TransportError,
    TransportErrorKind,
};
pub use crate::factory::{RequestFactory, RequestInitializer};
pub use crate::handlers::{
    BackOffRequired, BackOffTransportFailureHandler, BackOffUnsuccessfulResponseHandler,
    BasicAuthentication, ExecuteInterceptor, ResponseInterceptor, TransportFailureHandler,
    UnsuccessfulResponseHandler,
};
pub use crate::headers::Headers;
pub use crate::media_type::{Charset, MediaType};
pub use crate::redirect::is_redirect_status;
pub use crate::request::Request;
pub use crate::response::{ContentState, Response};

/// Appended to every `User-Agent` unless a request suppresses it.
pub const USER_AGENT_SUFFIX: &str = concat!("reqflow/", env!("CARGO_PKG_VERSION"), " (gzip)");

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        BackOffRequired, BackOffTransportFailureHandler, BackOffUnsuccessfulResponseHandler,
        ByteArrayContent, Content, Error, ExponentialBackOff, Headers, Request, RequestDefaults,
        RequestFactory, Response, RetryStrategy,
    };
}
