//! Streaming multipart/form-data parsing.
//!
//! This crate splits a raw multipart byte stream into discrete parts — form
//! fields and file uploads — without buffering whole bodies:
//! - [`CircularBuffer`]: a fixed-capacity lookahead buffer with
//!   `mark`/`reset` over any [`Read`](std::io::Read) source
//! - [`TokenStream`]: token search and bounded extraction on top of it,
//!   with an optional overall byte budget
//! - [`FormParts`]: the pull iterator that segments the stream into
//!   [`StreamingPart`] values, handling nested `multipart/mixed` sections
//! - [`MultipartFormBuilder`]: a reference encoder for building valid
//!   bodies in tests
//!
//! # Design Principles
//!
//! - Single pass: each content byte is examined once, plus bounded
//!   backtracking around boundary candidates
//! - Pull model: nothing is parsed until the caller asks for the next part
//! - Strict failure: malformed framing fails loudly with the offending
//!   token in the message; the stream is not recoverable past an error
//!
//! # Example
//!
//! ```
//! use partstream_core::{Encoding, FormParts, MultipartFormBuilder};
//!
//! let boundary = "-----1234";
//! let body = MultipartFormBuilder::new(boundary)
//!     .field("field", "fieldValue")
//!     .build();
//!
//! let mut form = FormParts::parse(
//!     boundary.as_bytes(),
//!     std::io::Cursor::new(body),
//!     Encoding::Utf8,
//! );
//! while form.has_next().unwrap() {
//!     let mut part = form.next_part().unwrap();
//!     println!(
//!         "{:?} = {}",
//!         part.field_name(),
//!         part.contents_as_string(4096).unwrap()
//!     );
//! }
//! ```

#![forbid(unsafe_code)]

mod buffer;
mod builder;
mod encoding;
mod error;
mod headers;
mod segmenter;
mod tokens;

pub use buffer::CircularBuffer;
pub use builder::MultipartFormBuilder;
pub use encoding::Encoding;
pub use error::{MultipartError, ParseError};
pub use segmenter::{
    DEFAULT_BUFFER_SIZE, FormParts, HEADER_SIZE_MAX, PartStream, StreamingPart,
};
pub use tokens::TokenStream;
