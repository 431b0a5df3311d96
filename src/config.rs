use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::connector::Timeouts;
use crate::encoding::HttpEncoding;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_NUM_RETRIES: usize = 10;
pub const DEFAULT_CONTENT_LOGGING_LIMIT: usize = 16 * 1024;

/// Settings copied into every request a factory builds.
#[derive(Clone)]
pub struct RequestDefaults {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// [`Duration::ZERO`] disables the write timeout.
    pub write_timeout: Duration,
    pub num_retries: usize,
    pub follow_redirects: bool,
    pub use_raw_redirect_urls: bool,
    pub throw_on_error: bool,
    pub suppress_user_agent_suffix: bool,
    pub logging_enabled: bool,
    pub content_logging_limit: usize,
    pub encoding: Option<Arc<dyn HttpEncoding>>,
}

impl fmt::Debug for RequestDefaults {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RequestDefaults")
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("num_retries", &self.num_retries)
            .field("follow_redirects", &self.follow_redirects)
            .field("use_raw_redirect_urls", &self.use_raw_redirect_urls)
            .field("throw_on_error", &self.throw_on_error)
            .field(
                "suppress_user_agent_suffix",
                &self.suppress_user_agent_suffix,
            )
            .field("logging_enabled", &self.logging_enabled)
            .field("content_logging_limit", &self.content_logging_limit)
            .field(
                "encoding",
                &self.encoding.as_ref().map(|encoding| encoding.name().to_owned()),
            )
            .finish()
    }
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: Duration::ZERO,
            num_retries: DEFAULT_NUM_RETRIES,
            follow_redirects: true,
            use_raw_redirect_urls: false,
            throw_on_error: true,
            suppress_user_agent_suffix: false,
            logging_enabled: true,
            content_logging_limit: DEFAULT_CONTENT_LOGGING_LIMIT,
            encoding: None,
        }
    }
}

impl RequestDefaults {
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn with_num_retries(mut self, num_retries: usize) -> Self {
        self.num_retries = num_retries;
        self
    }

    pub fn with_follow_redirects(mut self, follow_redirects: bool) -> Self {
        self.follow_redirects = follow_redirects;
        self
    }

    pub fn with_raw_redirect_urls(mut self, use_raw_redirect_urls: bool) -> Self {
        self.use_raw_redirect_urls = use_raw_redirect_urls;
        self
    }

    pub fn with_throw_on_error(mut self, throw_on_error: bool) -> Self {
        self.throw_on_error = throw_on_error;
        self
    }

    pub fn with_suppress_user_agent_suffix(mut self, suppress_user_agent_suffix: bool) -> Self {
        self.suppress_user_agent_suffix = suppress_user_agent_suffix;
        self
    }

    pub fn with_logging_enabled(mut self, logging_enabled: bool) -> Self {
        self.logging_enabled = logging_enabled;
        self
    }

    pub fn with_content_logging_limit(mut self, content_logging_limit: usize) -> Self {
        self.content_logging_limit = content_logging_limit;
        self
    }

    pub fn with_encoding(mut self, encoding: Arc<dyn HttpEncoding>) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: self.connect_timeout,
            read: self.read_timeout,
            write: self.write_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RequestDefaults;

    #[test]
    fn defaults_match_documented_values() {
        let defaults = RequestDefaults::default();
        let timeouts = defaults.timeouts();
        assert_eq!(timeouts.connect, Duration::from_secs(20));
        assert_eq!(timeouts.read, Duration::from_secs(20));
        assert_eq!(timeouts.write, Duration::ZERO);
        assert_eq!(defaults.num_retries, 10);
        assert!(defaults.follow_redirects);
        assert!(defaults.throw_on_error);
        assert_eq!(defaults.content_logging_limit, 0x4000);
    }
}
