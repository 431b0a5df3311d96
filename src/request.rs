use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use url::Url;

use crate::backoff::{RetryStrategy, Sleeper, ThreadSleeper};
use crate::config::RequestDefaults;
use crate::connector::{Connector, Timeouts};
use crate::content::Content;
use crate::encoding::HttpEncoding;
use crate::error::Error;
use crate::handlers::{
    ExecuteInterceptor, ResponseInterceptor, TransportFailureHandler,
    UnsuccessfulResponseHandler,
};
use crate::headers::Headers;

/// One logical HTTP call: everything needed to drive it through a connector,
/// across as many attempts as recovery requires.
///
/// Built by a [`RequestFactory`](crate::RequestFactory) and executed once.
/// Interceptors and redirect handling may rewrite the url, method, headers
/// and content between attempts.
pub struct Request {
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: Headers,
    pub(crate) response_headers: Headers,
    pub(crate) content: Option<Arc<dyn Content>>,
    pub(crate) encoding: Option<Arc<dyn HttpEncoding>>,
    pub(crate) timeouts: Timeouts,
    pub(crate) num_retries: usize,
    pub(crate) follow_redirects: bool,
    pub(crate) use_raw_redirect_urls: bool,
    pub(crate) throw_on_error: bool,
    pub(crate) suppress_user_agent_suffix: bool,
    pub(crate) response_return_raw_stream: bool,
    pub(crate) logging_enabled: bool,
    pub(crate) content_logging_limit: usize,
    pub(crate) interceptor: Option<Arc<dyn ExecuteInterceptor>>,
    pub(crate) unsuccessful_response_handler: Option<Arc<dyn UnsuccessfulResponseHandler>>,
    pub(crate) transport_failure_handler: Option<Arc<dyn TransportFailureHandler>>,
    pub(crate) response_interceptor: Option<Arc<dyn ResponseInterceptor>>,
    pub(crate) retry_strategy: RetryStrategy,
    pub(crate) sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for Request {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Request")
            .field("method", &self.method)
            .field("url", &crate::util::redact_url_for_logs(&self.url))
            .field("num_retries", &self.num_retries)
            .field("timeouts", &self.timeouts)
            .field("follow_redirects", &self.follow_redirects)
            .field("throw_on_error", &self.throw_on_error)
            .field("retry_strategy", &self.retry_strategy)
            .finish_non_exhaustive()
    }
}

impl Request {
    pub fn new(connector: Arc<dyn Connector>, method: Method, url: Url) -> Self {
        let mut headers = Headers::new();
        headers.set_accept_encoding(Some("gzip"));
        let mut request = Self {
            connector,
            method,
            url,
            headers,
            response_headers: Headers::new(),
            content: None,
            encoding: None,
            timeouts: RequestDefaults::default().timeouts(),
            num_retries: 0,
            follow_redirects: true,
            use_raw_redirect_urls: false,
            throw_on_error: true,
            suppress_user_agent_suffix: false,
            response_return_raw_stream: false,
            logging_enabled: true,
            content_logging_limit: 0,
            interceptor: None,
            unsuccessful_response_handler: None,
            transport_failure_handler: None,
            response_interceptor: None,
            retry_strategy: RetryStrategy::None,
            sleeper: Arc::new(ThreadSleeper),
        };
        request.apply_defaults(&RequestDefaults::default());
        request
    }

    pub(crate) fn apply_defaults(&mut self, defaults: &RequestDefaults) {
        self.timeouts = defaults.timeouts();
        self.num_retries = defaults.num_retries;
        self.follow_redirects = defaults.follow_redirects;
        self.use_raw_redirect_urls = defaults.use_raw_redirect_urls;
        self.throw_on_error = defaults.throw_on_error;
        self.suppress_user_agent_suffix = defaults.suppress_user_agent_suffix;
        self.logging_enabled = defaults.logging_enabled;
        self.content_logging_limit = defaults.content_logging_limit;
        self.encoding = defaults.encoding.clone();
    }

    /// Fails fast on requests that could never be sent.
    pub(crate) fn validate(&self) -> crate::Result<()> {
        if !self.connector.supports_method(&self.method) {
            return Err(Error::invalid_argument(format!(
                "connector does not support the {} method",
                self.method
            )));
        }
        if self.url.cannot_be_a_base() || self.url.host_str().is_none() {
            return Err(Error::invalid_argument(format!(
                "url has no host: {}",
                crate::util::redact_url_for_logs(&self.url)
            )));
        }
        Ok(())
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) -> &mut Self {
        self.method = method;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn set_url(&mut self, url: Url) -> &mut Self {
        self.url = url;
        self
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn set_headers(&mut self, headers: Headers) -> &mut Self {
        self.headers = headers;
        self
    }

    /// Template the response headers are parsed into.
    pub fn response_headers(&self) -> &Headers {
        &self.response_headers
    }

    pub fn set_response_headers(&mut self, response_headers: Headers) -> &mut Self {
        self.response_headers = response_headers;
        self
    }

    pub fn content(&self) -> Option<&Arc<dyn Content>> {
        self.content.as_ref()
    }

    pub fn set_content(&mut self, content: Option<Arc<dyn Content>>) -> &mut Self {
        self.content = content;
        self
    }

    pub fn encoding(&self) -> Option<&Arc<dyn HttpEncoding>> {
        self.encoding.as_ref()
    }

    pub fn set_encoding(&mut self, encoding: Option<Arc<dyn HttpEncoding>>) -> &mut Self {
        self.encoding = encoding;
        self
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn set_connect_timeout(&mut self, connect_timeout: Duration) -> &mut Self {
        self.timeouts.connect = connect_timeout;
        self
    }

    pub fn set_read_timeout(&mut self, read_timeout: Duration) -> &mut Self {
        self.timeouts.read = read_timeout;
        self
    }

    pub fn set_write_timeout(&mut self, write_timeout: Duration) -> &mut Self {
        self.timeouts.write = write_timeout;
        self
    }

    pub fn num_retries(&self) -> usize {
        self.num_retries
    }

    pub fn set_num_retries(&mut self, num_retries: usize) -> &mut Self {
        self.num_retries = num_retries;
        self
    }

    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    pub fn set_follow_redirects(&mut self, follow_redirects: bool) -> &mut Self {
        self.follow_redirects = follow_redirects;
        self
    }

    pub fn use_raw_redirect_urls(&self) -> bool {
        self.use_raw_redirect_urls
    }

    pub fn set_use_raw_redirect_urls(&mut self, use_raw_redirect_urls: bool) -> &mut Self {
        self.use_raw_redirect_urls = use_raw_redirect_urls;
        self
    }

    pub fn throw_on_error(&self) -> bool {
        self.throw_on_error
    }

    pub fn set_throw_on_error(&mut self, throw_on_error: bool) -> &mut Self {
        self.throw_on_error = throw_on_error;
        self
    }

    pub fn suppress_user_agent_suffix(&self) -> bool {
        self.suppress_user_agent_suffix
    }

    pub fn set_suppress_user_agent_suffix(&mut self, suppress: bool) -> &mut Self {
        self.suppress_user_agent_suffix = suppress;
        self
    }

    pub fn response_return_raw_stream(&self) -> bool {
        self.response_return_raw_stream
    }

    /// Hands the response content back exactly as received, without
    /// undoing its content codings.
    pub fn set_response_return_raw_stream(&mut self, raw: bool) -> &mut Self {
        self.response_return_raw_stream = raw;
        self
    }

    pub fn logging_enabled(&self) -> bool {
        self.logging_enabled
    }

    pub fn set_logging_enabled(&mut self, logging_enabled: bool) -> &mut Self {
        self.logging_enabled = logging_enabled;
        self
    }

    pub fn content_logging_limit(&self) -> usize {
        self.content_logging_limit
    }

    pub fn set_content_logging_limit(&mut self, limit: usize) -> &mut Self {
        self.content_logging_limit = limit;
        self
    }

    pub fn interceptor(&self) -> Option<&Arc<dyn ExecuteInterceptor>> {
        self.interceptor.as_ref()
    }

    pub fn set_interceptor(&mut self, interceptor: Option<Arc<dyn ExecuteInterceptor>>) -> &mut Self {
        self.interceptor = interceptor;
        self
    }

    pub fn unsuccessful_response_handler(&self) -> Option<&Arc<dyn UnsuccessfulResponseHandler>> {
        self.unsuccessful_response_handler.as_ref()
    }

    pub fn set_unsuccessful_response_handler(
        &mut self,
        handler: Option<Arc<dyn UnsuccessfulResponseHandler>>,
    ) -> &mut Self {
        self.unsuccessful_response_handler = handler;
        self
    }

    pub fn transport_failure_handler(&self) -> Option<&Arc<dyn TransportFailureHandler>> {
        self.transport_failure_handler.as_ref()
    }

    pub fn set_transport_failure_handler(
        &mut self,
        handler: Option<Arc<dyn TransportFailureHandler>>,
    ) -> &mut Self {
        self.transport_failure_handler = handler;
        self
    }

    pub fn response_interceptor(&self) -> Option<&Arc<dyn ResponseInterceptor>> {
        self.response_interceptor.as_ref()
    }

    pub fn set_response_interceptor(
        &mut self,
        interceptor: Option<Arc<dyn ResponseInterceptor>>,
    ) -> &mut Self {
        self.response_interceptor = interceptor;
        self
    }

    pub fn retry_strategy(&self) -> &RetryStrategy {
        &self.retry_strategy
    }

    pub fn set_retry_strategy(&mut self, retry_strategy: RetryStrategy) -> &mut Self {
        self.retry_strategy = retry_strategy;
        self
    }

    /// Wait primitive used for [`RetryStrategy`] backoff.
    pub fn set_sleeper(&mut self, sleeper: Arc<dyn Sleeper>) -> &mut Self {
        self.sleeper = sleeper;
        self
    }
}
