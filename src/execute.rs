use std::sync::Arc;

use tracing::{debug, info_span, warn};

use crate::USER_AGENT_SUFFIX;
use crate::connector::LowLevelRequest;
use crate::content::{Content, LoggingContent, compute_length};
use crate::encoding::EncodedContent;
use crate::error::{Error, HttpResponseError, TransportError};
use crate::headers::{self, Headers};
use crate::request::Request;
use crate::response::{Response, ResponseOptions};
use crate::util::redact_url_for_logs;

const NOT_LOGGED: &str = "<not logged>";

enum Attempt {
    Responded(Response),
    Failed(TransportError),
}

impl Request {
    /// Runs the request to completion, retrying, redirecting and backing off
    /// as the installed handlers and retry strategy allow.
    ///
    /// Fails with [`Error::Transport`] when no response was obtained and with
    /// [`Error::HttpResponse`] when `throw_on_error` is set and the final
    /// status is not 2xx.
    pub fn execute(&mut self) -> crate::Result<Response> {
        let span = info_span!(
            "reqflow.request",
            method = %self.method,
            url = %redact_url_for_logs(&self.url),
            num_retries = self.num_retries,
        );
        let _entered = span.enter();

        let mut retries_remaining = self.num_retries;
        self.retry_strategy.reset();
        if let Some(handler) = &self.unsuccessful_response_handler {
            handler.reset();
        }
        if let Some(handler) = &self.transport_failure_handler {
            handler.reset();
        }

        let mut attempt_number = 0_usize;
        let outcome = loop {
            attempt_number += 1;

            if let Some(interceptor) = self.interceptor.clone() {
                interceptor.intercept(self)?;
            }
            // Interceptors and redirects may have changed the method or url.
            self.validate()?;

            let url_text = self.url.to_string();
            let mut low_level = self.connector.build_request(&self.method, &url_text)?;
            self.write_headers(low_level.as_mut(), attempt_number);
            let content_retry_supported = self.attach_content(low_level.as_mut());
            low_level.set_timeouts(self.timeouts);

            let mut retry_allowed = content_retry_supported && retries_remaining > 0;
            let attempt = match low_level.execute() {
                Ok(raw) => Attempt::Responded(Response::new(
                    raw,
                    &self.response_headers,
                    self.response_options(),
                )),
                Err(error) => {
                    let Some(handler) = self.transport_failure_handler.clone() else {
                        return Err(self.transport_error(error));
                    };
                    if !handler.handle_failure(self, &error, retry_allowed) {
                        return Err(self.transport_error(error));
                    }
                    warn!(
                        attempt = attempt_number,
                        kind = %error.kind(),
                        error = %error,
                        "transport failure handled; retrying"
                    );
                    Attempt::Failed(error)
                }
            };

            let recovery = match &attempt {
                Attempt::Responded(response) if response.is_success_status_code() => {
                    retry_allowed = false;
                    None
                }
                Attempt::Responded(response) => {
                    Some(self.recover_unsuccessful(response, retry_allowed))
                }
                Attempt::Failed(_) => None,
            };
            match recovery {
                Some(Ok(handled)) => retry_allowed &= handled,
                Some(Err(error)) => {
                    if let Attempt::Responded(mut response) = attempt {
                        response.disconnect();
                    }
                    return Err(error);
                }
                None => {}
            }

            retries_remaining = retries_remaining.saturating_sub(1);
            if !retry_allowed {
                break attempt;
            }
            // The next attempt must not start before this connection is released.
            if let Attempt::Responded(mut response) = attempt {
                response.ignore_quietly();
            }
        };

        let mut response = match outcome {
            Attempt::Responded(response) => response,
            Attempt::Failed(error) => return Err(self.transport_error(error)),
        };

        if let Some(interceptor) = &self.response_interceptor {
            interceptor.intercept_response(&response);
        }

        if self.throw_on_error && !response.is_success_status_code() {
            let error = HttpResponseError::from_response(&mut response);
            response.disconnect();
            return Err(Error::HttpResponse(Box::new(error)));
        }
        Ok(response)
    }

    /// Submits the whole blocking call to the runtime's blocking pool.
    /// Aborting the handle only takes effect before the call starts.
    #[cfg(feature = "async")]
    pub fn execute_async(
        mut self,
        handle: &tokio::runtime::Handle,
    ) -> tokio::task::JoinHandle<crate::Result<Response>> {
        handle.spawn_blocking(move || self.execute())
    }

    fn response_options(&self) -> ResponseOptions {
        ResponseOptions {
            return_raw_stream: self.response_return_raw_stream,
            logging_enabled: self.logging_enabled,
            content_logging_limit: self.content_logging_limit,
        }
    }

    fn transport_error(&self, source: TransportError) -> Error {
        Error::Transport {
            method: self.method.clone(),
            url: redact_url_for_logs(&self.url),
            source,
        }
    }

    /// Handler first, then redirect, then the retry strategy. Returns whether
    /// the status was dealt with.
    fn recover_unsuccessful(
        &mut self,
        response: &Response,
        retry_allowed: bool,
    ) -> crate::Result<bool> {
        if let Some(handler) = self.unsuccessful_response_handler.clone()
            && handler.handle_response(self, response, retry_allowed)?
        {
            return Ok(true);
        }
        if self.handle_redirect(response.status_code(), response.headers())? {
            return Ok(true);
        }
        if !retry_allowed || !self.retry_strategy.is_backoff_required(response.status_code()) {
            return Ok(false);
        }
        let Some(interval) = self.retry_strategy.next_backoff() else {
            return Ok(false);
        };
        debug!(
            status = response.status_code(),
            delay_ms = interval.as_millis() as u64,
            "backing off before retry"
        );
        if let Err(error) = self.sleeper.sleep(interval) {
            warn!(error = %error, "backoff sleep interrupted; retrying immediately");
        }
        Ok(true)
    }

    fn write_headers(&self, low_level: &mut dyn LowLevelRequest, attempt_number: usize) {
        let mut wire_headers: Headers = self.headers.clone();
        if !self.suppress_user_agent_suffix {
            let user_agent = match wire_headers.user_agent() {
                Some(user_agent) => format!("{user_agent} {USER_AGENT_SUFFIX}"),
                None => USER_AGENT_SUFFIX.to_owned(),
            };
            wire_headers.set_user_agent(Some(user_agent));
        }

        let has_content = self.content.is_some();
        let mut logged = Vec::new();
        for (name, value) in wire_headers.iter() {
            if has_content && is_content_header(name) {
                continue;
            }
            low_level.add_header(name, value);
            if self.logging_enabled {
                let shown = if name.eq_ignore_ascii_case(headers::AUTHORIZATION) {
                    NOT_LOGGED
                } else {
                    value
                };
                logged.push(format!("{name}: {shown}"));
            }
        }

        if self.logging_enabled {
            debug!(
                attempt = attempt_number,
                method = %self.method,
                url = %redact_url_for_logs(&self.url),
                headers = ?logged,
                "sending request"
            );
        }
    }

    /// Hands the content to the connector. Returns whether it may be sent
    /// again.
    fn attach_content(&self, low_level: &mut dyn LowLevelRequest) -> bool {
        let Some(content) = self.content.clone() else {
            return true;
        };
        let retry_supported = content.retry_supported();
        let content_type = content
            .media_type()
            .or_else(|| self.headers.content_type())
            .map(ToOwned::to_owned);

        let mut streaming: Arc<dyn Content> = Arc::clone(&content);
        if self.logging_enabled
            && self.content_logging_limit > 0
            && tracing::enabled!(tracing::Level::TRACE)
        {
            streaming = Arc::new(LoggingContent::new(streaming, self.content_logging_limit));
        }

        // Codings the caller already applied come first, in wire order.
        let mut codings: Vec<&str> = self
            .headers
            .get_all(headers::CONTENT_ENCODING)
            .iter()
            .map(String::as_str)
            .collect();
        let content_length = match &self.encoding {
            Some(encoding) => {
                let length = if retry_supported {
                    compute_length(&EncodedContent::new(
                        Arc::clone(&content),
                        Arc::clone(encoding),
                    ))
                } else {
                    None
                };
                streaming = Arc::new(EncodedContent::new(streaming, Arc::clone(encoding)));
                codings.push(encoding.name());
                length
            }
            None => content.length(),
        };
        let content_encoding = (!codings.is_empty()).then(|| codings.join(", "));

        low_level.set_content_type(content_type.as_deref());
        low_level.set_content_encoding(content_encoding.as_deref());
        low_level.set_content_length(content_length);
        low_level.set_streaming_content(Some(streaming));
        retry_supported
    }
}

fn is_content_header(name: &str) -> bool {
    [
        headers::CONTENT_TYPE,
        headers::CONTENT_ENCODING,
        headers::CONTENT_LENGTH,
    ]
    .iter()
    .any(|content_header| content_header.eq_ignore_ascii_case(name))
}
