use std::fmt;

/// Character set used to turn response bytes into text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Latin1,
}

impl Charset {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().trim_matches('"').to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Self::Utf8),
            "iso-8859-1" | "iso8859-1" | "latin1" | "us-ascii" => Some(Self::Latin1),
            _ => None,
        }
    }

    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Latin1 => bytes.iter().map(|byte| char::from(*byte)).collect(),
        }
    }
}

/// Parsed `type/subtype; name=value` media type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaType {
    main_type: String,
    sub_type: String,
    parameters: Vec<(String, String)>,
}

impl MediaType {
    pub fn new(main_type: &str, sub_type: &str) -> Self {
        Self {
            main_type: main_type.to_ascii_lowercase(),
            sub_type: sub_type.to_ascii_lowercase(),
            parameters: Vec::new(),
        }
    }

    /// Returns `None` when the value has no `type/subtype` pair.
    pub fn parse(value: &str) -> Option<Self> {
        let mut segments = value.split(';');
        let essence = segments.next()?.trim();
        let (main_type, sub_type) = essence.split_once('/')?;
        let (main_type, sub_type) = (main_type.trim(), sub_type.trim());
        if main_type.is_empty() || sub_type.is_empty() {
            return None;
        }

        let mut media_type = Self::new(main_type, sub_type);
        for segment in segments {
            let Some((name, raw_value)) = segment.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let raw_value = raw_value.trim();
            let value = raw_value
                .strip_prefix('"')
                .and_then(|inner| inner.strip_suffix('"'))
                .unwrap_or(raw_value);
            media_type = media_type.with_parameter(name, value);
        }
        Some(media_type)
    }

    pub fn main_type(&self) -> &str {
        &self.main_type
    }

    pub fn sub_type(&self) -> &str {
        &self.sub_type
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn with_parameter(mut self, name: &str, value: &str) -> Self {
        let name = name.to_ascii_lowercase();
        match self
            .parameters
            .iter_mut()
            .find(|(candidate, _)| *candidate == name)
        {
            Some(existing) => existing.1 = value.to_owned(),
            None => self.parameters.push((name, value.to_owned())),
        }
        self
    }

    /// Compares type and subtype only, ignoring parameters.
    pub fn same_essence(&self, other: &MediaType) -> bool {
        self.main_type == other.main_type && self.sub_type == other.sub_type
    }

    pub fn is_json(&self) -> bool {
        self.main_type == "application"
            && (self.sub_type == "json" || self.sub_type.ends_with("+json"))
    }

    /// Explicit charset parameter, then the media type's conventional default.
    pub fn charset(&self) -> Charset {
        if let Some(charset) = self.parameter("charset").and_then(Charset::from_label) {
            return charset;
        }
        if self.is_json() {
            return Charset::Utf8;
        }
        if self.main_type == "text" {
            return Charset::Latin1;
        }
        Charset::Utf8
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}/{}", self.main_type, self.sub_type)?;
        for (name, value) in &self.parameters {
            let needs_quotes = value.is_empty()
                || value
                    .chars()
                    .any(|character| !(character.is_ascii_alphanumeric() || "-_.+!#$&^".contains(character)));
            if needs_quotes {
                write!(formatter, "; {name}=\"{value}\"")?;
            } else {
                write!(formatter, "; {name}={value}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Charset, MediaType};

    #[test]
    fn parses_parameters_and_normalizes_case() {
        let media_type =
            MediaType::parse("Text/HTML; Charset=\"UTF-8\"; q=0.5").expect("valid media type");
        assert_eq!(media_type.main_type(), "text");
        assert_eq!(media_type.sub_type(), "html");
        assert_eq!(media_type.parameter("charset"), Some("UTF-8"));
        assert_eq!(media_type.charset(), Charset::Utf8);
        assert_eq!(media_type.to_string(), "text/html; charset=UTF-8; q=0.5");
    }

    #[test]
    fn charset_defaults_follow_the_media_type() {
        let json = MediaType::parse("application/vnd.api+json").expect("json");
        assert_eq!(json.charset(), Charset::Utf8);

        let text = MediaType::parse("text/plain").expect("text");
        assert_eq!(text.charset(), Charset::Latin1);

        let binary = MediaType::parse("application/octet-stream").expect("binary");
        assert_eq!(binary.charset(), Charset::Utf8);
    }

    #[test]
    fn rejects_values_without_subtype() {
        assert_eq!(MediaType::parse("text"), None);
        assert_eq!(MediaType::parse("/plain"), None);
    }

    #[test]
    fn latin1_maps_bytes_to_code_points() {
        assert_eq!(Charset::Latin1.decode(&[0x63, 0x61, 0x66, 0xE9]), "café");
    }
}
