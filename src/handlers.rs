//! Pluggable hooks run by the executor around each attempt.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::backoff::{BackOff, ExponentialBackOff, Sleeper, ThreadSleeper};
use crate::error::TransportError;
use crate::factory::RequestInitializer;
use crate::request::Request;
use crate::response::Response;
use crate::util::lock_unpoisoned;

/// Runs before every attempt; may rewrite the request or abort the call.
pub trait ExecuteInterceptor: Send + Sync {
    fn intercept(&self, request: &mut Request) -> crate::Result<()>;
}

/// Decides whether a non-2xx response has been dealt with so the request can
/// be sent again.
pub trait UnsuccessfulResponseHandler: Send + Sync {
    fn handle_response(
        &self,
        request: &mut Request,
        response: &Response,
        retry_allowed: bool,
    ) -> crate::Result<bool>;

    /// Called once at the start of every logical call.
    fn reset(&self) {}
}

/// Decides whether a failed attempt should be retried.
pub trait TransportFailureHandler: Send + Sync {
    fn handle_failure(
        &self,
        request: &mut Request,
        error: &TransportError,
        retry_allowed: bool,
    ) -> bool;

    /// Called once at the start of every logical call.
    fn reset(&self) {}
}

/// Observes the final response of a logical call.
pub trait ResponseInterceptor: Send + Sync {
    fn intercept_response(&self, response: &Response);
}

impl<F> ExecuteInterceptor for F
where
    F: Fn(&mut Request) -> crate::Result<()> + Send + Sync,
{
    fn intercept(&self, request: &mut Request) -> crate::Result<()> {
        self(request)
    }
}

impl<F> UnsuccessfulResponseHandler for F
where
    F: Fn(&mut Request, &Response, bool) -> crate::Result<bool> + Send + Sync,
{
    fn handle_response(
        &self,
        request: &mut Request,
        response: &Response,
        retry_allowed: bool,
    ) -> crate::Result<bool> {
        self(request, response, retry_allowed)
    }
}

impl<F> TransportFailureHandler for F
where
    F: Fn(&mut Request, &TransportError, bool) -> bool + Send + Sync,
{
    fn handle_failure(
        &self,
        request: &mut Request,
        error: &TransportError,
        retry_allowed: bool,
    ) -> bool {
        self(request, error, retry_allowed)
    }
}

impl<F> ResponseInterceptor for F
where
    F: Fn(&Response) + Send + Sync,
{
    fn intercept_response(&self, response: &Response) {
        self(response)
    }
}

/// Which statuses [`BackOffUnsuccessfulResponseHandler`] waits on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum BackOffRequired {
    Always,
    /// Any 5xx status.
    #[default]
    OnServerError,
    Statuses(Vec<u16>),
}

impl BackOffRequired {
    pub fn is_required(&self, status_code: u16) -> bool {
        match self {
            Self::Always => true,
            Self::OnServerError => status_code / 100 == 5,
            Self::Statuses(statuses) => statuses.contains(&status_code),
        }
    }
}

/// Waits according to a [`BackOff`] before letting the executor retry a
/// non-2xx response.
///
/// Holds per-call state; install a fresh handler on each request.
pub struct BackOffUnsuccessfulResponseHandler {
    backoff: Mutex<Box<dyn BackOff>>,
    required: BackOffRequired,
    sleeper: Arc<dyn Sleeper>,
    honor_retry_after: bool,
}

impl fmt::Debug for BackOffUnsuccessfulResponseHandler {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("BackOffUnsuccessfulResponseHandler")
            .field("required", &self.required)
            .field("honor_retry_after", &self.honor_retry_after)
            .finish()
    }
}

impl Default for BackOffUnsuccessfulResponseHandler {
    fn default() -> Self {
        Self::new(ExponentialBackOff::default())
    }
}

impl BackOffUnsuccessfulResponseHandler {
    pub fn new(backoff: impl BackOff + 'static) -> Self {
        Self {
            backoff: Mutex::new(Box::new(backoff)),
            required: BackOffRequired::default(),
            sleeper: Arc::new(ThreadSleeper),
            honor_retry_after: false,
        }
    }

    pub fn backoff_required(mut self, required: BackOffRequired) -> Self {
        self.required = required;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Waits at least as long as a `Retry-After` header asks for.
    pub fn honor_retry_after(mut self, honor_retry_after: bool) -> Self {
        self.honor_retry_after = honor_retry_after;
        self
    }
}

impl UnsuccessfulResponseHandler for BackOffUnsuccessfulResponseHandler {
    fn handle_response(
        &self,
        _request: &mut Request,
        response: &Response,
        retry_allowed: bool,
    ) -> crate::Result<bool> {
        if !retry_allowed || !self.required.is_required(response.status_code()) {
            return Ok(false);
        }
        let Some(mut interval) = lock_unpoisoned(&self.backoff).next_backoff() else {
            return Ok(false);
        };
        if self.honor_retry_after
            && let Some(retry_after) = response.headers().retry_after()
        {
            interval = interval.max(retry_after);
        }
        Ok(self.sleeper.sleep(interval).is_ok())
    }

    fn reset(&self) {
        lock_unpoisoned(&self.backoff).reset();
    }
}

/// Waits according to a [`BackOff`] before letting the executor retry after
/// a transport failure.
pub struct BackOffTransportFailureHandler {
    backoff: Mutex<Box<dyn BackOff>>,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for BackOffTransportFailureHandler {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("BackOffTransportFailureHandler")
            .finish_non_exhaustive()
    }
}

impl Default for BackOffTransportFailureHandler {
    fn default() -> Self {
        Self::new(ExponentialBackOff::default())
    }
}

impl BackOffTransportFailureHandler {
    pub fn new(backoff: impl BackOff + 'static) -> Self {
        Self {
            backoff: Mutex::new(Box::new(backoff)),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

impl TransportFailureHandler for BackOffTransportFailureHandler {
    fn handle_failure(
        &self,
        _request: &mut Request,
        _error: &TransportError,
        retry_allowed: bool,
    ) -> bool {
        if !retry_allowed {
            return false;
        }
        let mut backoff = lock_unpoisoned(&self.backoff);
        crate::backoff::next_backoff_and_sleep(backoff.as_mut(), self.sleeper.as_ref())
    }

    fn reset(&self) {
        lock_unpoisoned(&self.backoff).reset();
    }
}

/// Sets a basic `Authorization` header before every attempt.
#[derive(Clone)]
pub struct BasicAuthentication {
    username: String,
    password: String,
}

impl fmt::Debug for BasicAuthentication {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("BasicAuthentication")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl BasicAuthentication {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl ExecuteInterceptor for BasicAuthentication {
    fn intercept(&self, request: &mut Request) -> crate::Result<()> {
        request
            .headers_mut()
            .set_basic_authentication(&self.username, &self.password);
        Ok(())
    }
}

impl RequestInitializer for BasicAuthentication {
    fn initialize(&self, request: &mut Request) -> crate::Result<()> {
        request.set_interceptor(Some(Arc::new(self.clone())));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::BackOffRequired;

    #[test]
    fn backoff_required_variants() {
        assert!(BackOffRequired::Always.is_required(404));
        assert!(BackOffRequired::OnServerError.is_required(502));
        assert!(!BackOffRequired::OnServerError.is_required(429));
        assert!(BackOffRequired::Statuses(vec![429]).is_required(429));
    }
}
