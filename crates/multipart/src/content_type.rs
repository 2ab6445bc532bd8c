//! `Content-Type` negotiation for multipart bodies.

use crate::error::MultipartError;

/// The only media type accepted for import submissions.
pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";

/// RFC 2046 upper bound on boundary length.
pub const MAX_BOUNDARY_LEN: usize = 70;

/// A parsed `type/subtype; key=value` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    essence: String,
    params: Vec<(String, String)>,
}

impl MediaType {
    pub fn parse(value: &str) -> Result<Self, MultipartError> {
        let (essence, rest) = match value.split_once(';') {
            Some((essence, rest)) => (essence, rest),
            None => (value, ""),
        };

        let essence = essence.trim().to_ascii_lowercase();
        match essence.split_once('/') {
            Some((top, sub)) if !top.is_empty() && !sub.is_empty() => {}
            _ => return Err(MultipartError::InvalidContentType(value.to_string())),
        }

        Ok(Self {
            essence,
            params: split_params(rest),
        })
    }

    /// Lowercased `type/subtype`.
    pub fn essence(&self) -> &str {
        &self.essence
    }

    /// Parameter value by (case-insensitive) name, unquoted.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Extract the boundary token from a request `Content-Type`.
///
/// Fails if the header is absent, is not `multipart/form-data`, or carries no
/// usable `boundary` parameter.
pub fn boundary_from_content_type(value: Option<&str>) -> Result<String, MultipartError> {
    let value = value.ok_or(MultipartError::MissingContentType)?;
    let media = MediaType::parse(value)?;

    if media.essence() != MULTIPART_FORM_DATA {
        return Err(MultipartError::NotMultipart(media.essence().to_string()));
    }

    let boundary = media.param("boundary").ok_or(MultipartError::MissingBoundary)?;
    validate_boundary(boundary)?;
    Ok(boundary.to_string())
}

pub(crate) fn validate_boundary(boundary: &str) -> Result<(), MultipartError> {
    if boundary.is_empty() {
        return Err(MultipartError::InvalidBoundary("boundary is empty".to_string()));
    }
    if boundary.len() > MAX_BOUNDARY_LEN {
        return Err(MultipartError::InvalidBoundary(format!(
            "boundary is {} characters (max {MAX_BOUNDARY_LEN})",
            boundary.len()
        )));
    }
    if boundary.ends_with(' ') {
        return Err(MultipartError::InvalidBoundary(
            "boundary must not end with a space".to_string(),
        ));
    }
    if let Some(c) = boundary.chars().find(|c| !is_bchar(*c)) {
        return Err(MultipartError::InvalidBoundary(format!(
            "character {c:?} is not allowed in a boundary"
        )));
    }
    Ok(())
}

fn is_bchar(c: char) -> bool {
    c.is_ascii_alphanumeric() || "'()+_,-./:=? ".contains(c)
}

/// Split `; key=value; key="quoted;value"` into lowercased keys and unquoted values.
pub(crate) fn split_params(input: &str) -> Vec<(String, String)> {
    split_unquoted(input, ';')
        .into_iter()
        .filter_map(|segment| {
            let (key, value) = segment.split_once('=')?;
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                return None;
            }
            Some((key, unquote(value.trim())))
        })
        .collect()
}

fn split_unquoted(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn unquote(value: &str) -> String {
    if value.len() < 2 || !value.starts_with('"') || !value.ends_with('"') {
        return value.to_string();
    }

    let inner = &value[1..value.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut escaped = false;
    for c in inner.chars() {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_boundary() {
        let b = boundary_from_content_type(Some("multipart/form-data; boundary=abc123")).unwrap();
        assert_eq!(b, "abc123");
    }

    #[test]
    fn extracts_quoted_boundary_with_space_inside() {
        let b = boundary_from_content_type(Some(
            r#"Multipart/Form-Data; charset=utf-8; BOUNDARY="a:b c""#,
        ))
        .unwrap();
        assert_eq!(b, "a:b c");
    }

    #[test]
    fn quoted_boundary_with_semicolon_is_rejected() {
        let err = boundary_from_content_type(Some(r#"multipart/form-data; boundary="a;b c""#)).unwrap_err();
        assert!(matches!(err, MultipartError::InvalidBoundary(_)), "{err:?}");
    }

    #[test]
    fn rejects_other_media_types() {
        let err = boundary_from_content_type(Some("application/json")).unwrap_err();
        assert!(matches!(err, MultipartError::NotMultipart(t) if t == "application/json"));

        let err = boundary_from_content_type(Some("multipart/mixed; boundary=x")).unwrap_err();
        assert!(matches!(err, MultipartError::NotMultipart(_)));
    }

    #[test]
    fn missing_header_or_boundary_is_rejected() {
        assert!(matches!(
            boundary_from_content_type(None),
            Err(MultipartError::MissingContentType)
        ));
        assert!(matches!(
            boundary_from_content_type(Some("multipart/form-data")),
            Err(MultipartError::MissingBoundary)
        ));
        assert!(matches!(
            boundary_from_content_type(Some("multipart/form-data; charset=utf-8")),
            Err(MultipartError::MissingBoundary)
        ));
    }

    #[test]
    fn garbage_content_type_is_invalid() {
        assert!(matches!(
            boundary_from_content_type(Some("nonsense")),
            Err(MultipartError::InvalidContentType(_))
        ));
    }

    #[test]
    fn boundary_rules() {
        assert!(validate_boundary("----WebKitFormBoundary7MA4YWxkTrZu0gW").is_ok());
        assert!(validate_boundary("").is_err());
        assert!(validate_boundary("trailing ").is_err());
        assert!(validate_boundary("semi\"quote").is_err());
        assert!(validate_boundary(&"x".repeat(MAX_BOUNDARY_LEN)).is_ok());
        assert!(validate_boundary(&"x".repeat(MAX_BOUNDARY_LEN + 1)).is_err());
    }

    #[test]
    fn media_type_params_are_case_insensitive() {
        let media = MediaType::parse("text/plain; Charset=\"utf-8\"").unwrap();
        assert_eq!(media.essence(), "text/plain");
        assert_eq!(media.param("charset"), Some("utf-8"));
        assert_eq!(media.param("CHARSET"), Some("utf-8"));
        assert_eq!(media.param("boundary"), None);
    }
}
