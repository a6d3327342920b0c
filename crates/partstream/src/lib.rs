//! Multipart/form-data parsing with in-memory and disk-spooled part
//! materialization.
//!
//! Builds on [`partstream_core`]'s streaming segmenter and adds the
//! realization layer:
//! - [`RealizedPart`]: a part drained into memory or a spooled temporary
//!   file, re-readable any number of times
//! - [`form_map`] / [`all_parts_in_memory`]: bucket a stream's parts by
//!   field name into an owned [`Parts`] collection whose `close` releases
//!   every temporary file
//!
//! The core streaming API is re-exported, so this crate is the only
//! dependency most callers need.
//!
//! # Example
//!
//! ```
//! use partstream::{Encoding, FormParts, MultipartFormBuilder, form_map};
//!
//! let boundary = "-----1234";
//! let body = MultipartFormBuilder::new(boundary)
//!     .file("file", "foo.tab", "text/whatever", "This is the content of the file\n")
//!     .field("field", "fieldValue")
//!     .build();
//!
//! let form = FormParts::parse(
//!     boundary.as_bytes(),
//!     std::io::Cursor::new(body),
//!     Encoding::Utf8,
//! );
//! let mut parts = form_map(form, Encoding::Utf8, 1024, None).unwrap();
//!
//! let field = &parts.get("field").unwrap()[0];
//! assert_eq!(field.string().unwrap(), "fieldValue");
//! parts.close().unwrap();
//! ```

#![forbid(unsafe_code)]

mod form_map;
mod part;

pub use form_map::{Parts, all_parts_in_memory, form_map};
pub use part::{PartReader, RealizedPart};

pub use partstream_core::{
    CircularBuffer, DEFAULT_BUFFER_SIZE, Encoding, FormParts, HEADER_SIZE_MAX, MultipartError,
    MultipartFormBuilder, ParseError, PartStream, StreamingPart, TokenStream,
};
