//! Case-insensitive, order-preserving header bag.
//!
//! Well-known headers are described by a fixed schema ([`KNOWN_HEADERS`]) so
//! they always serialize with their conventional wire capitalization. Any
//! other name lands in an ordered overflow list that keeps the first-seen
//! casing, which makes `Headers::from_wire(h.to_wire()) == h` hold for every
//! representable value.

use std::time::{Duration, SystemTime};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::util::parse_retry_after;

pub const ACCEPT: &str = "Accept";
pub const ACCEPT_ENCODING: &str = "Accept-Encoding";
pub const AGE: &str = "Age";
pub const AUTHORIZATION: &str = "Authorization";
pub const CACHE_CONTROL: &str = "Cache-Control";
pub const CONTENT_ENCODING: &str = "Content-Encoding";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_MD5: &str = "Content-MD5";
pub const CONTENT_RANGE: &str = "Content-Range";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const COOKIE: &str = "Cookie";
pub const DATE: &str = "Date";
pub const ETAG: &str = "ETag";
pub const EXPIRES: &str = "Expires";
pub const IF_MATCH: &str = "If-Match";
pub const IF_MODIFIED_SINCE: &str = "If-Modified-Since";
pub const IF_NONE_MATCH: &str = "If-None-Match";
pub const IF_RANGE: &str = "If-Range";
pub const IF_UNMODIFIED_SINCE: &str = "If-Unmodified-Since";
pub const LAST_MODIFIED: &str = "Last-Modified";
pub const LOCATION: &str = "Location";
pub const MIME_VERSION: &str = "MIME-Version";
pub const RANGE: &str = "Range";
pub const RETRY_AFTER: &str = "Retry-After";
pub const USER_AGENT: &str = "User-Agent";
pub const WARNING: &str = "Warning";
pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    /// A later value replaces the earlier one.
    Single,
    /// Values accumulate in arrival order.
    Repeated,
}

#[derive(Clone, Copy, Debug)]
pub struct KnownHeader {
    pub wire_name: &'static str,
    pub cardinality: Cardinality,
}

const fn single(wire_name: &'static str) -> KnownHeader {
    KnownHeader {
        wire_name,
        cardinality: Cardinality::Single,
    }
}

const fn repeated(wire_name: &'static str) -> KnownHeader {
    KnownHeader {
        wire_name,
        cardinality: Cardinality::Repeated,
    }
}

/// Serialization order of the well-known fields.
pub const KNOWN_HEADERS: &[KnownHeader] = &[
    repeated(ACCEPT),
    repeated(ACCEPT_ENCODING),
    single(AGE),
    single(AUTHORIZATION),
    repeated(CACHE_CONTROL),
    repeated(CONTENT_ENCODING),
    single(CONTENT_LENGTH),
    single(CONTENT_MD5),
    single(CONTENT_RANGE),
    single(CONTENT_TYPE),
    single(COOKIE),
    single(DATE),
    single(ETAG),
    single(EXPIRES),
    repeated(IF_MATCH),
    single(IF_MODIFIED_SINCE),
    repeated(IF_NONE_MATCH),
    single(IF_RANGE),
    single(IF_UNMODIFIED_SINCE),
    single(LAST_MODIFIED),
    single(LOCATION),
    single(MIME_VERSION),
    single(RANGE),
    single(RETRY_AFTER),
    single(USER_AGENT),
    repeated(WARNING),
    repeated(WWW_AUTHENTICATE),
];

fn known_index(name: &str) -> Option<usize> {
    KNOWN_HEADERS
        .iter()
        .position(|known| known.wire_name.eq_ignore_ascii_case(name))
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct OverflowEntry {
    name: String,
    values: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Headers {
    known: Vec<Vec<String>>,
    overflow: Vec<OverflowEntry>,
}

impl Default for Headers {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! single_value_accessors {
    ($($getter:ident, $setter:ident => $name:expr;)*) => {
        $(
            pub fn $getter(&self) -> Option<&str> {
                self.get($name)
            }

            pub fn $setter(&mut self, value: Option<impl Into<String>>) -> &mut Self {
                self.set_optional($name, value)
            }
        )*
    };
}

impl Headers {
    pub fn new() -> Self {
        Self {
            known: vec![Vec::new(); KNOWN_HEADERS.len()],
            overflow: Vec::new(),
        }
    }

    /// Builds headers from wire pairs, field by field.
    pub fn from_wire<I, N, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: Into<String>,
    {
        let mut headers = Self::new();
        headers.extend_from_wire(pairs);
        headers
    }

    pub fn extend_from_wire<I, N, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: Into<String>,
    {
        for (name, value) in pairs {
            self.append(name.as_ref(), value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        if let Some(index) = known_index(name) {
            return &self.known[index];
        }
        self.overflow
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
            .map(|entry| entry.values.as_slice())
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        !self.get_all(name).is_empty()
    }

    /// Replaces every value stored under `name`.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.set_all(name, vec![value.into()])
    }

    pub fn set_all(&mut self, name: &str, values: Vec<String>) -> &mut Self {
        if values.is_empty() {
            self.remove(name);
            return self;
        }
        if let Some(index) = known_index(name) {
            self.known[index] = values;
            return self;
        }
        match self
            .overflow
            .iter_mut()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.values = values,
            None => self.overflow.push(OverflowEntry {
                name: name.to_owned(),
                values,
            }),
        }
        self
    }

    /// Adds a value; single-valued well-known fields keep only the latest one.
    pub fn append(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        if let Some(index) = known_index(name) {
            match KNOWN_HEADERS[index].cardinality {
                Cardinality::Single => self.known[index] = vec![value],
                Cardinality::Repeated => self.known[index].push(value),
            }
            return self;
        }
        match self
            .overflow
            .iter_mut()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.values.push(value),
            None => self.overflow.push(OverflowEntry {
                name: name.to_owned(),
                values: vec![value],
            }),
        }
        self
    }

    pub fn remove(&mut self, name: &str) -> Vec<String> {
        if let Some(index) = known_index(name) {
            return std::mem::take(&mut self.known[index]);
        }
        match self
            .overflow
            .iter()
            .position(|entry| entry.name.eq_ignore_ascii_case(name))
        {
            Some(position) => self.overflow.remove(position).values,
            None => Vec::new(),
        }
    }

    /// Drops every conditional (`If-*`) header, known or not.
    pub fn remove_conditional(&mut self) {
        for (index, known) in KNOWN_HEADERS.iter().enumerate() {
            if is_conditional(known.wire_name) {
                self.known[index].clear();
            }
        }
        self.overflow.retain(|entry| !is_conditional(&entry.name));
    }

    pub fn clear(&mut self) {
        self.known.iter_mut().for_each(Vec::clear);
        self.overflow.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.known.iter().all(Vec::is_empty) && self.overflow.is_empty()
    }

    /// Number of distinct header names present.
    pub fn len(&self) -> usize {
        self.known.iter().filter(|values| !values.is_empty()).count() + self.overflow.len()
    }

    /// Wire pairs: well-known fields in schema order, then the overflow bag in
    /// insertion order. Repeated values produce one pair each.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        let known = KNOWN_HEADERS
            .iter()
            .zip(self.known.iter())
            .flat_map(|(known, values)| {
                values
                    .iter()
                    .map(move |value| (known.wire_name, value.as_str()))
            });
        let overflow = self.overflow.iter().flat_map(|entry| {
            entry
                .values
                .iter()
                .map(move |value| (entry.name.as_str(), value.as_str()))
        });
        known.chain(overflow)
    }

    pub fn to_wire(&self) -> Vec<(String, String)> {
        self.iter()
            .map(|(name, value)| (name.to_owned(), value.to_owned()))
            .collect()
    }

    fn set_optional(&mut self, name: &str, value: Option<impl Into<String>>) -> &mut Self {
        match value {
            Some(value) => self.set(name, value),
            None => {
                self.remove(name);
                self
            }
        }
    }

    single_value_accessors! {
        authorization, set_authorization => AUTHORIZATION;
        content_range, set_content_range => CONTENT_RANGE;
        content_type, set_content_type => CONTENT_TYPE;
        cookie, set_cookie => COOKIE;
        date, set_date => DATE;
        etag, set_etag => ETAG;
        expires, set_expires => EXPIRES;
        if_modified_since, set_if_modified_since => IF_MODIFIED_SINCE;
        if_range, set_if_range => IF_RANGE;
        if_unmodified_since, set_if_unmodified_since => IF_UNMODIFIED_SINCE;
        last_modified, set_last_modified => LAST_MODIFIED;
        location, set_location => LOCATION;
        range, set_range => RANGE;
        user_agent, set_user_agent => USER_AGENT;
    }

    pub fn accept_encoding(&self) -> &[String] {
        self.get_all(ACCEPT_ENCODING)
    }

    pub fn set_accept_encoding(&mut self, value: Option<impl Into<String>>) -> &mut Self {
        self.set_optional(ACCEPT_ENCODING, value)
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.get(CONTENT_ENCODING)
    }

    pub fn if_match(&self) -> &[String] {
        self.get_all(IF_MATCH)
    }

    pub fn set_if_match(&mut self, value: Option<impl Into<String>>) -> &mut Self {
        self.set_optional(IF_MATCH, value)
    }

    pub fn if_none_match(&self) -> &[String] {
        self.get_all(IF_NONE_MATCH)
    }

    pub fn set_if_none_match(&mut self, value: Option<impl Into<String>>) -> &mut Self {
        self.set_optional(IF_NONE_MATCH, value)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get(CONTENT_LENGTH)?.trim().parse().ok()
    }

    pub fn set_content_length(&mut self, value: Option<u64>) -> &mut Self {
        self.set_optional(CONTENT_LENGTH, value.map(|length| length.to_string()))
    }

    pub fn age(&self) -> Option<u64> {
        self.get(AGE)?.trim().parse().ok()
    }

    /// Delay requested by the server, relative to the current time.
    pub fn retry_after(&self) -> Option<Duration> {
        parse_retry_after(self.get(RETRY_AFTER)?, SystemTime::now())
    }

    pub fn set_basic_authentication(&mut self, username: &str, password: &str) -> &mut Self {
        let encoded = BASE64.encode(format!("{username}:{password}"));
        self.set(AUTHORIZATION, format!("Basic {encoded}"))
    }
}

fn is_conditional(name: &str) -> bool {
    name.len() > 3
        && name
            .get(..3)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("if-"))
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::{Headers, USER_AGENT};

    #[test]
    fn lookup_is_case_insensitive() {
        let mut headers = Headers::new();
        headers.set("content-type", "application/json");
        assert_eq!(headers.get("Content-Type"), Some("application/json"));
        assert_eq!(headers.content_type(), Some("application/json"));

        headers.set("X-Request-Id", "abc");
        assert_eq!(headers.get("x-request-id"), Some("abc"));
    }

    #[test]
    fn well_known_names_serialize_with_conventional_casing() {
        let mut headers = Headers::new();
        headers.set("etag", "\"v1\"");
        headers.set("user-agent", "sdk/1.0");
        let wire = headers.to_wire();
        assert_eq!(
            wire,
            vec![
                ("ETag".to_owned(), "\"v1\"".to_owned()),
                (USER_AGENT.to_owned(), "sdk/1.0".to_owned()),
            ]
        );
    }

    #[test]
    fn unknown_names_keep_first_seen_casing_and_order() {
        let headers = Headers::from_wire([
            ("X-Trace", "1"),
            ("x-b", "2"),
            ("x-trace", "3"),
        ]);
        assert_eq!(
            headers.to_wire(),
            vec![
                ("X-Trace".to_owned(), "1".to_owned()),
                ("X-Trace".to_owned(), "3".to_owned()),
                ("x-b".to_owned(), "2".to_owned()),
            ]
        );
    }

    #[test]
    fn single_fields_replace_and_repeated_fields_accumulate() {
        let headers = Headers::from_wire([
            ("Location", "/a"),
            ("location", "/b"),
            ("Warning", "199 one"),
            ("warning", "199 two"),
        ]);
        assert_eq!(headers.location(), Some("/b"));
        assert_eq!(headers.get_all("Warning"), ["199 one", "199 two"]);
    }

    #[test]
    fn parse_of_serialize_round_trips() {
        let mut headers = Headers::new();
        headers
            .set_content_type(Some("text/plain"))
            .set_content_length(Some(12))
            .set_if_none_match(Some("\"abc\""));
        headers.append("Cache-Control", "no-cache");
        headers.append("Cache-Control", "no-store");
        headers.append("X-Custom", "one");
        headers.append("X-Custom", "two");

        let reparsed = Headers::from_wire(headers.to_wire());
        assert_eq!(reparsed, headers);
        assert_eq!(reparsed.content_length(), Some(12));
    }

    #[test]
    fn remove_conditional_clears_known_and_unknown_if_headers() {
        let mut headers = Headers::new();
        headers
            .set_if_match(Some("\"a\""))
            .set_if_modified_since(Some("Wed, 21 Oct 2015 07:28:00 GMT"))
            .set_etag(Some("\"keep\""));
        headers.set("If-Schedule-Tag-Match", "x");
        headers.remove_conditional();

        assert!(headers.if_match().is_empty());
        assert_eq!(headers.if_modified_since(), None);
        assert!(!headers.contains("if-schedule-tag-match"));
        assert_eq!(headers.etag(), Some("\"keep\""));
    }

    #[test]
    fn clear_drops_known_and_overflow_values() {
        let mut headers = Headers::new();
        headers.set_location(Some("/somewhere"));
        headers.set("X-Extra", "1");
        headers.clear();

        assert!(headers.is_empty());
        assert_eq!(headers.location(), None);
        assert_eq!(headers.len(), 0);
    }

    #[test]
    fn basic_authentication_is_base64_encoded() {
        let mut headers = Headers::new();
        headers.set_basic_authentication("user", "pass");
        assert_eq!(headers.authorization(), Some("Basic dXNlcjpwYXNz"));
    }

    #[test]
    fn setting_none_removes_the_header() {
        let mut headers = Headers::new();
        headers.set_authorization(Some("Bearer t"));
        headers.set_authorization(None::<String>);
        assert!(headers.is_empty());
    }
}
