//! Header block of a single part.

use crate::content_type::split_params;

/// Headers of one part, kept both verbatim and as parsed fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartHeaders {
    raw: String,
    fields: Vec<(String, String)>,
}

impl PartHeaders {
    /// Parse a header block (without the terminating blank line).
    pub fn parse(block: &[u8]) -> Self {
        let raw = String::from_utf8_lossy(block).into_owned();
        let mut fields: Vec<(String, String)> = Vec::new();

        for line in raw.split("\r\n") {
            if line.is_empty() {
                continue;
            }
            // obs-fold continuation
            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some((_, value)) = fields.last_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                fields.push((name.trim().to_string(), value.trim().to_string()));
            }
        }

        Self { raw, fields }
    }

    /// The header block exactly as received.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// First header value with the given (case-insensitive) name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get("content-type")
    }

    /// `name` parameter of `Content-Disposition` (the form field name).
    pub fn field_name(&self) -> Option<String> {
        self.disposition_param("name")
    }

    /// `filename` parameter of `Content-Disposition`.
    pub fn file_name(&self) -> Option<String> {
        self.disposition_param("filename")
    }

    fn disposition_param(&self, key: &str) -> Option<String> {
        let disposition = self.get("content-disposition")?;
        let (_, params) = disposition.split_once(';')?;
        split_params(params)
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_disposition_and_type() {
        let h = PartHeaders::parse(
            b"Content-Disposition: form-data; name=\"file\"; filename=\"patients.ndjson\"\r\nContent-Type: application/fhir+ndjson",
        );
        assert_eq!(h.field_name().as_deref(), Some("file"));
        assert_eq!(h.file_name().as_deref(), Some("patients.ndjson"));
        assert_eq!(h.content_type(), Some("application/fhir+ndjson"));
        assert!(h.raw().starts_with("Content-Disposition"));
    }

    #[test]
    fn folded_lines_are_joined() {
        let h = PartHeaders::parse(b"X-Note: first\r\n  second");
        assert_eq!(h.get("x-note"), Some("first second"));
    }

    #[test]
    fn empty_block_has_no_fields() {
        let h = PartHeaders::parse(b"");
        assert!(h.is_empty());
        assert_eq!(h.raw(), "");
        assert_eq!(h.file_name(), None);
    }
}
