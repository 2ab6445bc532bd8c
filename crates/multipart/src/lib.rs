//! `bulkimport-multipart` — pull-based `multipart/form-data` stream reader.
//!
//! The reader consumes any [`std::io::Read`] through a fixed-size buffer and
//! yields parts one at a time, so memory stays bounded by the buffer plus the
//! part currently being accumulated.
//!
//! ```ignore
//! let boundary = boundary_from_content_type(Some(content_type))?;
//! for part in MultipartReader::new(body, &boundary, DEFAULT_BUFFER_SIZE)?.parts() {
//!     let part = part?;
//!     println!("{} bytes, headers: {}", part.body.len(), part.headers.raw());
//! }
//! ```

pub mod content_type;
pub mod error;
pub mod headers;
pub mod reader;

pub use content_type::{MediaType, boundary_from_content_type, MULTIPART_FORM_DATA};
pub use error::MultipartError;
pub use headers::PartHeaders;
pub use reader::{
    effective_buffer_size, MultipartReader, Part, Parts, BOUNDARY_MARGIN, DEFAULT_BUFFER_SIZE,
    MAX_HEADER_BLOCK,
};
