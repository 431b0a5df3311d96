use std::fmt;
use std::sync::Arc;

use http::Method;
use url::Url;

use crate::config::RequestDefaults;
use crate::connector::Connector;
use crate::content::Content;
use crate::error::Error;
use crate::request::Request;

/// Runs once on every request a [`RequestFactory`] builds.
pub trait RequestInitializer: Send + Sync {
    fn initialize(&self, request: &mut Request) -> crate::Result<()>;
}

impl<F> RequestInitializer for F
where
    F: Fn(&mut Request) -> crate::Result<()> + Send + Sync,
{
    fn initialize(&self, request: &mut Request) -> crate::Result<()> {
        self(request)
    }
}

/// Builds requests bound to one connector.
///
/// Cheap to clone and safe to share between threads; it holds no per-call
/// state.
#[derive(Clone)]
pub struct RequestFactory {
    connector: Arc<dyn Connector>,
    defaults: RequestDefaults,
    initializer: Option<Arc<dyn RequestInitializer>>,
}

impl fmt::Debug for RequestFactory {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RequestFactory")
            .field("defaults", &self.defaults)
            .field("has_initializer", &self.initializer.is_some())
            .finish()
    }
}

impl RequestFactory {
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self::from_shared(Arc::new(connector))
    }

    pub fn from_shared(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            defaults: RequestDefaults::default(),
            initializer: None,
        }
    }

    /// Factory over the bundled pooled connector.
    #[cfg(feature = "ureq-connector")]
    pub fn ureq() -> Self {
        Self::new(crate::connector::UreqConnector::new())
    }

    pub fn with_defaults(mut self, defaults: RequestDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_initializer(mut self, initializer: impl RequestInitializer + 'static) -> Self {
        self.initializer = Some(Arc::new(initializer));
        self
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn defaults(&self) -> &RequestDefaults {
        &self.defaults
    }

    pub fn build(
        &self,
        method: Method,
        url: &str,
        content: Option<Arc<dyn Content>>,
    ) -> crate::Result<Request> {
        let url = Url::parse(url).map_err(|source| Error::InvalidUrl {
            url: url.to_owned(),
            source,
        })?;
        let mut request = Request::new(Arc::clone(&self.connector), method, url);
        request.apply_defaults(&self.defaults);
        request.set_content(content);
        if let Some(initializer) = &self.initializer {
            initializer.initialize(&mut request)?;
        }
        Ok(request)
    }

    pub fn get(&self, url: &str) -> crate::Result<Request> {
        self.build(Method::GET, url, None)
    }

    pub fn head(&self, url: &str) -> crate::Result<Request> {
        self.build(Method::HEAD, url, None)
    }

    pub fn delete(&self, url: &str) -> crate::Result<Request> {
        self.build(Method::DELETE, url, None)
    }

    pub fn post(&self, url: &str, content: impl Content + 'static) -> crate::Result<Request> {
        self.build(Method::POST, url, Some(Arc::new(content)))
    }

    pub fn put(&self, url: &str, content: impl Content + 'static) -> crate::Result<Request> {
        self.build(Method::PUT, url, Some(Arc::new(content)))
    }

    pub fn patch(&self, url: &str, content: impl Content + 'static) -> crate::Result<Request> {
        self.build(Method::PATCH, url, Some(Arc::new(content)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RequestFactory;
    use crate::config::RequestDefaults;
    use crate::content::EmptyContent;
    use crate::error::ErrorCode;
    use crate::handlers::BasicAuthentication;
    use crate::request::Request;
    use crate::testing::MockConnector;

    #[test]
    fn build_applies_defaults_then_initializer() {
        let factory = RequestFactory::new(MockConnector::new())
            .with_defaults(
                RequestDefaults::default()
                    .with_num_retries(3)
                    .with_read_timeout(Duration::from_secs(5)),
            )
            .with_initializer(|request: &mut Request| -> crate::Result<()> {
                request.set_num_retries(1);
                Ok(())
            });

        let request = factory
            .post("https://api.example.com/items", EmptyContent)
            .expect("request");
        assert_eq!(request.num_retries(), 1);
        assert_eq!(request.timeouts().read, Duration::from_secs(5));
        assert_eq!(request.method(), &http::Method::POST);
        assert!(request.content().is_some());
        assert_eq!(request.headers().accept_encoding(), ["gzip"]);
    }

    #[test]
    fn invalid_url_fails_before_any_network_activity() {
        let connector = MockConnector::new();
        let factory = RequestFactory::new(connector.clone());
        let error = factory.get("not a url").expect_err("invalid url");
        assert_eq!(error.code(), ErrorCode::InvalidUrl);
        assert_eq!(connector.attempts(), 0);
    }

    #[test]
    fn basic_authentication_initializer_installs_interceptor() {
        let factory = RequestFactory::new(MockConnector::new())
            .with_initializer(BasicAuthentication::new("user", "pass"));
        let request = factory.get("https://api.example.com/").expect("request");
        assert!(request.interceptor().is_some());
    }
}
