use std::io;

use thiserror::Error;

/// Failure while negotiating or decoding a multipart body.
///
/// Every variant is attributable to the client: the request is rejected as-is.
#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("missing Content-Type header")]
    MissingContentType,

    #[error("Content-Type must be multipart/form-data, got '{0}'")]
    NotMultipart(String),

    #[error("invalid Content-Type: {0}")]
    InvalidContentType(String),

    #[error("multipart boundary parameter is missing")]
    MissingBoundary,

    #[error("invalid multipart boundary: {0}")]
    InvalidBoundary(String),

    #[error("part header block exceeds {0} bytes")]
    HeaderTooLarge(usize),

    #[error("stream ended before {0}")]
    UnexpectedEof(&'static str),

    #[error("malformed boundary line")]
    MalformedBoundary,

    #[error("I/O error while reading multipart stream: {0}")]
    Io(#[from] io::Error),
}
