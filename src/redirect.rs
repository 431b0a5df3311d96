use http::Method;
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use url::Url;

use crate::error::Error;
use crate::headers::Headers;
use crate::request::Request;

const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

pub fn is_redirect_status(status_code: u16) -> bool {
    matches!(status_code, 301 | 302 | 303 | 307)
}

impl Request {
    /// Rewrites the request to follow a redirect response. Returns whether
    /// the redirect was applied.
    ///
    /// A 303 turns the request into a body-less GET. Every followed redirect
    /// drops `Authorization` and the conditional `If-*` headers.
    pub fn handle_redirect(
        &mut self,
        status_code: u16,
        response_headers: &Headers,
    ) -> crate::Result<bool> {
        if !self.follow_redirects || !is_redirect_status(status_code) {
            return Ok(false);
        }
        let Some(location) = response_headers.location() else {
            return Ok(false);
        };

        let target = resolve_location(&self.url, location, self.use_raw_redirect_urls).ok_or_else(
            || Error::InvalidRedirectLocation {
                location: location.to_owned(),
                method: self.method.clone(),
                url: crate::util::redact_url_for_logs(&self.url),
            },
        )?;
        tracing::debug!(
            status = status_code,
            location = %crate::util::redact_url_for_logs(&target),
            "following redirect"
        );

        self.url = target;
        if status_code == 303 {
            self.method = Method::GET;
            self.content = None;
        }
        self.headers.set_authorization(None::<String>);
        self.headers.remove_conditional();
        Ok(true)
    }
}

fn resolve_location(base: &Url, location: &str, raw: bool) -> Option<Url> {
    let mut target = base.join(location.trim()).ok()?;
    if !raw {
        let normalized = target
            .path()
            .split('/')
            .map(|segment| {
                let decoded = percent_decode_str(segment).decode_utf8_lossy();
                utf8_percent_encode(&decoded, PATH_SEGMENT).to_string()
            })
            .collect::<Vec<_>>()
            .join("/");
        target.set_path(&normalized);
    }
    Some(target)
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::{is_redirect_status, resolve_location};

    #[test]
    fn only_classic_redirect_statuses_are_followed() {
        for status in [301, 302, 303, 307] {
            assert!(is_redirect_status(status));
        }
        for status in [300, 304, 308, 200] {
            assert!(!is_redirect_status(status));
        }
    }

    #[test]
    fn relative_locations_resolve_against_the_current_url() {
        let base = Url::parse("https://api.example.com/v1/items/7?x=1").expect("base url");
        let target = resolve_location(&base, "../users/3", false).expect("resolved");
        assert_eq!(target.as_str(), "https://api.example.com/v1/users/3");

        let absolute = resolve_location(&base, "http://other.example.com/a", false).expect("abs");
        assert_eq!(absolute.as_str(), "http://other.example.com/a");
    }

    #[test]
    fn decoded_mode_normalizes_escapes_and_raw_mode_keeps_them() {
        let base = Url::parse("https://example.com/").expect("base url");
        let decoded = resolve_location(&base, "/a%7Eb/c%20d/e%2Ff", false).expect("decoded");
        assert_eq!(decoded.path(), "/a~b/c%20d/e%2Ff");

        let raw = resolve_location(&base, "/a%7Eb/c%20d/e%2Ff", true).expect("raw");
        assert_eq!(raw.path(), "/a%7Eb/c%20d/e%2Ff");
    }
}
