//! Part segmentation state machine for multipart/form-data streams.
//!
//! [`FormParts`] pulls discrete parts out of a raw byte stream, one at a
//! time, without buffering whole bodies: each yielded [`StreamingPart`]
//! exposes a content stream bounded to that part's body, and advancing the
//! iterator implicitly drains whatever the caller left unread.
//!
//! The machine moves through
//! `FindPrefix -> FindBoundary -> BoundaryFound -> {Header | Eos}`, then
//! `Header -> Contents -> FindPrefix` per part. Nested `multipart/mixed`
//! sections push a new boundary frame and are flattened: the container part
//! is never yielded, its attachments are, carrying the container's field
//! name.
//!
//! Parts are only well-defined in source order. The segmenter and the active
//! part's content stream share one position; a part handed to the caller is
//! invalidated the moment the iterator advances past it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Read;
use std::rc::Rc;

use log::debug;

use crate::encoding::Encoding;
use crate::error::{MultipartError, ParseError};
use crate::headers::parse_params;
use crate::tokens::TokenStream;

/// Default lookahead buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Maximum size of one part's header section in bytes.
pub const HEADER_SIZE_MAX: usize = 10240;

const CR: u8 = 0x0D;
const LF: u8 = 0x0A;
const DASH: u8 = 0x2D;

/// CRLF: terminates header lines and precedes every boundary.
pub(crate) const FIELD_SEPARATOR: [u8; 2] = [CR, LF];

/// `--`: marks the final instance of a boundary.
pub(crate) const STREAM_TERMINATOR: [u8; 2] = [DASH, DASH];

/// The boundary as it appears on the wire: `--` followed by the caller's
/// boundary bytes.
pub(crate) fn prepend_stream_terminator(boundary: &[u8]) -> Vec<u8> {
    let mut prefixed = Vec::with_capacity(STREAM_TERMINATOR.len() + boundary.len());
    prefixed.extend_from_slice(&STREAM_TERMINATOR);
    prefixed.extend_from_slice(boundary);
    prefixed
}

/// The boundary preceded by CRLF, for scanning inside part content without
/// tripping on boundary-like bytes mid-line.
fn prepend_field_separator(boundary: &[u8]) -> Vec<u8> {
    let mut prefixed = Vec::with_capacity(FIELD_SEPARATOR.len() + boundary.len());
    prefixed.extend_from_slice(&FIELD_SEPARATOR);
    prefixed.extend_from_slice(boundary);
    prefixed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    FindPrefix,
    FindBoundary,
    BoundaryFound,
    Eos,
    Header,
    Contents,
    Error,
}

/// One level of the boundary stack. The root frame carries the outer
/// boundary; nested `multipart/mixed` sections push frames that remember
/// the enclosing field name.
#[derive(Debug)]
struct BoundaryFrame {
    boundary: Vec<u8>,
    boundary_with_prefix: Vec<u8>,
    mixed_name: Option<String>,
}

/// Parsed metadata of a part whose header block just ended.
#[derive(Debug)]
struct PartHead {
    field_name: Option<String>,
    form_field: bool,
    content_type: Option<String>,
    file_name: Option<String>,
    headers: HashMap<String, String>,
}

/// State shared between the segmenter and the active part's content stream.
#[derive(Debug)]
struct SegmenterInner<R> {
    tokens: TokenStream<R>,
    current: BoundaryFrame,
    enclosing: Vec<BoundaryFrame>,
    state: StreamState,
    /// Sequence number of the most recently created part; a content stream
    /// whose number is older has been implicitly closed.
    active_seq: u64,
}

impl<R: Read> SegmenterInner<R> {
    fn require_state(&self, expected: StreamState) -> Result<(), MultipartError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(MultipartError::Parse {
                detail: format!("Expected state {expected:?} but got {:?}", self.state),
            })
        }
    }

    fn find_boundary(&mut self) -> Result<(), MultipartError> {
        if self.state == StreamState::FindPrefix {
            if !self.tokens.match_at_current(&FIELD_SEPARATOR)? {
                return Err(MultipartError::token_not_found(
                    "Boundary must be preceded by field separator, but didn't find it",
                ));
            }
            self.state = StreamState::FindBoundary;
        }

        self.require_state(StreamState::FindBoundary)?;

        loop {
            if !self.tokens.drop_until_matched(&self.current.boundary)? {
                return Err(MultipartError::token_not_found(format!(
                    "Boundary not found <<{}>>",
                    self.tokens.encoding().decode(&self.current.boundary),
                )));
            }
            self.state = StreamState::BoundaryFound;

            if self.tokens.match_at_current(&STREAM_TERMINATOR)? {
                if !self.tokens.match_at_current(&FIELD_SEPARATOR)? {
                    return Err(MultipartError::token_not_found(
                        "Stream terminator must be followed by field separator, but didn't find it",
                    ));
                }
                if let Some(frame) = self.enclosing.pop() {
                    debug!(
                        "nested multipart/mixed section ended, restoring boundary for field {:?}",
                        frame.mixed_name
                    );
                    self.current = frame;
                    self.state = StreamState::FindBoundary;
                    continue;
                }
                self.state = StreamState::Eos;
                return Ok(());
            }

            if !self.tokens.match_at_current(&FIELD_SEPARATOR)? {
                return Err(MultipartError::token_not_found(
                    "Boundary must be followed by field separator, but didn't find it",
                ));
            }
            self.state = StreamState::Header;
            return Ok(());
        }
    }

    fn parse_next_part(&mut self) -> Result<Option<PartHead>, MultipartError> {
        loop {
            self.find_boundary()?;
            if self.state != StreamState::Header {
                return Ok(None);
            }

            let headers = self.parse_header_lines()?;
            let content_type = headers.get("Content-Type").cloned();

            if let Some(content_type) = content_type.as_deref() {
                if content_type.starts_with("multipart/mixed") {
                    self.enter_mixed_section(&headers, content_type);
                    continue;
                }
            }

            let disposition =
                parse_params(headers.get("Content-Disposition").map(String::as_str));
            let field_name = if disposition.contains_key("attachment") {
                self.current.mixed_name.clone()
            } else {
                disposition.get("name").and_then(|value| value.clone())
            };
            let file_name = disposition
                .get("filename")
                .map(|value| value.clone().unwrap_or_default());
            let form_field = !disposition.contains_key("filename");

            return Ok(Some(PartHead {
                field_name,
                form_field,
                content_type,
                file_name,
                headers,
            }));
        }
    }

    /// The container part of a nested section is never yielded; its field
    /// name is remembered for the attachments inside.
    fn enter_mixed_section(&mut self, headers: &HashMap<String, String>, content_type: &str) {
        let disposition = parse_params(headers.get("Content-Disposition").map(String::as_str));
        let type_params = parse_params(Some(content_type));

        let mixed_name = disposition.get("name").and_then(|value| value.clone());
        let sub_boundary = type_params
            .get("boundary")
            .and_then(|value| value.clone())
            .unwrap_or_default();
        debug!(
            "entering nested multipart/mixed section for field {mixed_name:?} with boundary {sub_boundary:?}"
        );

        let boundary =
            prepend_stream_terminator(&self.tokens.encoding().encode(sub_boundary.trim()));
        let boundary_with_prefix = prepend_field_separator(&boundary);
        let frame = BoundaryFrame {
            boundary,
            boundary_with_prefix,
            mixed_name,
        };
        self.enclosing.push(std::mem::replace(&mut self.current, frame));
        self.state = StreamState::FindBoundary;
    }

    fn parse_header_lines(&mut self) -> Result<HashMap<String, String>, MultipartError> {
        self.require_state(StreamState::Header)?;

        let mut result: HashMap<String, String> = HashMap::new();
        let mut previous_header_name: Option<String> = None;
        let header_start = self.tokens.current_byte_index();

        loop {
            let header = self
                .tokens
                .read_string_until_matched(&FIELD_SEPARATOR, HEADER_SIZE_MAX)?;
            if self.tokens.current_byte_index() - header_start >= HEADER_SIZE_MAX as u64 {
                return Err(MultipartError::token_not_found(format!(
                    "Didn't find end of Header section within {HEADER_SIZE_MAX} bytes"
                )));
            }
            if header.is_empty() {
                self.state = StreamState::Contents;
                return Ok(result);
            }
            if header.starts_with(|c: char| c.is_whitespace()) {
                // folding continuation of the previous header
                if let Some(name) = &previous_header_name {
                    let folded = match result.get(name) {
                        Some(existing) => format!("{existing}; {}", header.trim()),
                        None => header.trim().to_string(),
                    };
                    result.insert(name.clone(), folded);
                }
                continue;
            }
            match header.split_once(':') {
                None => {
                    return Err(MultipartError::Parse {
                        detail: format!("Header didn't include a colon <<{header}>>"),
                    });
                }
                Some((name, value)) => {
                    let name = name.trim().to_string();
                    result.insert(name.clone(), value.trim().to_string());
                    previous_header_name = Some(name);
                }
            }
        }
    }

    /// One content byte, or `None` at this part's boundary.
    fn read_content_byte(&mut self) -> Result<Option<u8>, MultipartError> {
        let token = &self.current.boundary_with_prefix;
        let result = self.tokens.read_byte_until_matched(token)?;
        if result.is_none() {
            self.state = StreamState::FindPrefix;
        }
        Ok(result)
    }

    fn drain_contents(&mut self) -> Result<(), MultipartError> {
        while self.state == StreamState::Contents {
            if self.read_content_byte()?.is_none() {
                break;
            }
        }
        Ok(())
    }
}

/// Pull iterator over the parts of a multipart/form-data stream.
///
/// `has_next` is idempotent: it parses ahead at most one part and caches the
/// answer until `next_part` consumes it. Parse failures surface as
/// [`ParseError`]; after a failure the stream is not recoverable and
/// iteration reports no further parts.
#[derive(Debug)]
pub struct FormParts<R> {
    inner: Rc<RefCell<SegmenterInner<R>>>,
    current: Option<StreamingPart<R>>,
    next_is_known: bool,
}

impl<R: Read> FormParts<R> {
    /// Parse `input` with the default buffer size and no overall length cap.
    ///
    /// `boundary` is the bare boundary from the `Content-Type` header; the
    /// leading `--` convention is supplied internally.
    pub fn parse(boundary: &[u8], input: R, encoding: Encoding) -> Self {
        Self::parse_with_limits(boundary, input, DEFAULT_BUFFER_SIZE, encoding, None)
    }

    /// Parse with an explicit lookahead buffer size and optional overall
    /// stream length cap.
    ///
    /// # Panics
    ///
    /// Panics when `buf_size` cannot hold the boundary plus a field
    /// separator.
    pub fn parse_with_limits(
        boundary: &[u8],
        input: R,
        buf_size: usize,
        encoding: Encoding,
        max_stream_length: Option<u64>,
    ) -> Self {
        let boundary = prepend_stream_terminator(boundary);
        assert!(
            buf_size >= boundary.len() + FIELD_SEPARATOR.len(),
            "buf_size must be bigger than the boundary"
        );
        let boundary_with_prefix = prepend_field_separator(&boundary);
        let inner = SegmenterInner {
            tokens: TokenStream::new(input, buf_size, encoding, max_stream_length),
            current: BoundaryFrame {
                boundary,
                boundary_with_prefix,
                mixed_name: None,
            },
            enclosing: Vec::new(),
            state: StreamState::FindBoundary,
            active_seq: 0,
        };
        Self {
            inner: Rc::new(RefCell::new(inner)),
            current: None,
            next_is_known: false,
        }
    }

    /// Whether another part is available. Repeated calls without
    /// `next_part` return the same answer.
    pub fn has_next(&mut self) -> Result<bool, ParseError> {
        if self.next_is_known {
            return Ok(self.current.is_some());
        }
        self.next_is_known = true;
        self.advance()?;
        Ok(self.current.is_some())
    }

    /// The next part.
    ///
    /// Fails with a [`MultipartError::NoSuchElement`] cause when the stream
    /// has no more parts.
    pub fn next_part(&mut self) -> Result<StreamingPart<R>, ParseError> {
        if !self.next_is_known {
            self.next_is_known = true;
            self.advance()?;
        }
        match self.current.take() {
            Some(part) => {
                self.next_is_known = false;
                Ok(part)
            }
            None => Err(ParseError::from_cause(MultipartError::NoSuchElement)),
        }
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        {
            // drain whatever the caller left of the previous part so the
            // boundary search starts from a consistent position; a failed
            // drain resurfaces from the parse below
            let mut inner = self.inner.borrow_mut();
            if inner.state == StreamState::Contents {
                let _ = inner.drain_contents();
            }
            // advancing invalidates the previous part's content stream
            inner.active_seq += 1;
        }

        let parsed = self.inner.borrow_mut().parse_next_part();
        match parsed {
            Ok(Some(head)) => {
                let seq = self.inner.borrow().active_seq;
                debug!(
                    "yielding part {:?} (form field: {})",
                    head.field_name, head.form_field
                );
                self.current = Some(StreamingPart {
                    field_name: head.field_name,
                    form_field: head.form_field,
                    content_type: head.content_type,
                    file_name: head.file_name,
                    headers: head.headers,
                    content: PartStream {
                        inner: Rc::clone(&self.inner),
                        seq,
                        end_of_stream: false,
                        closed: false,
                    },
                });
                Ok(())
            }
            Ok(None) => {
                self.current = None;
                Ok(())
            }
            Err(err) => {
                self.inner.borrow_mut().state = StreamState::Error;
                self.current = None;
                Err(match err {
                    MultipartError::Parse { detail } => ParseError::new(detail),
                    other => ParseError::from_cause(other),
                })
            }
        }
    }
}

impl<R: Read> Iterator for FormParts<R> {
    type Item = Result<StreamingPart<R>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => Some(self.next_part()),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

/// One part of a multipart stream: metadata plus a one-shot content stream
/// bounded to this part's body.
#[derive(Debug)]
pub struct StreamingPart<R> {
    field_name: Option<String>,
    form_field: bool,
    content_type: Option<String>,
    file_name: Option<String>,
    headers: HashMap<String, String>,
    content: PartStream<R>,
}

impl<R: Read> StreamingPart<R> {
    /// The `name` parameter of `Content-Disposition`, or the enclosing
    /// field name for nested attachments. `None` when the part carried no
    /// usable disposition.
    #[must_use]
    pub fn field_name(&self) -> Option<&str> {
        self.field_name.as_deref()
    }

    /// `true` for ordinary form fields, `false` when a `filename` parameter
    /// was present.
    #[must_use]
    pub fn is_form_field(&self) -> bool {
        self.form_field
    }

    /// The part's raw `Content-Type` header value, if any.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The `filename` parameter. `Some("")` means an empty filename
    /// parameter was present; `None` means there was none at all.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// All headers of this part, names trimmed and case-preserved.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// The part's bounded content stream.
    pub fn content(&mut self) -> &mut PartStream<R> {
        &mut self.content
    }

    /// Close the content stream, draining any unread bytes. Idempotent.
    pub fn close(&mut self) -> Result<(), MultipartError> {
        self.content.close()
    }

    /// Drain the content into memory, then close the stream.
    ///
    /// Fails with [`MultipartError::StreamTooLong`] when the content
    /// exceeds `max_length` bytes.
    pub fn contents_as_bytes(&mut self, max_length: usize) -> Result<Vec<u8>, MultipartError> {
        let mut bytes = Vec::new();
        loop {
            match self.content.read_byte()? {
                None => {
                    self.content.close()?;
                    return Ok(bytes);
                }
                Some(byte) => {
                    if bytes.len() >= max_length {
                        self.content.close()?;
                        return Err(MultipartError::StreamTooLong {
                            detail: format!("Part contents was longer than {max_length} bytes"),
                        });
                    }
                    bytes.push(byte);
                }
            }
        }
    }

    /// Drain the content and decode it with the stream's encoding, then
    /// close the stream.
    pub fn contents_as_string(&mut self, max_length: usize) -> Result<String, MultipartError> {
        let encoding = self.content.encoding();
        let bytes = self.contents_as_bytes(max_length)?;
        Ok(encoding.decode(&bytes))
    }
}

/// One-shot readable stream over a single part's body.
///
/// Reading stops at the part's boundary. Once closed, or once the owning
/// segmenter has advanced past this part, reads fail with
/// [`MultipartError::AlreadyClosed`].
#[derive(Debug)]
pub struct PartStream<R> {
    inner: Rc<RefCell<SegmenterInner<R>>>,
    seq: u64,
    end_of_stream: bool,
    closed: bool,
}

impl<R: Read> PartStream<R> {
    /// Next content byte, or `None` at the end of this part's body.
    pub fn read_byte(&mut self) -> Result<Option<u8>, MultipartError> {
        if self.closed {
            return Err(MultipartError::AlreadyClosed);
        }
        let mut inner = self.inner.borrow_mut();
        if inner.active_seq != self.seq {
            return Err(MultipartError::AlreadyClosed);
        }
        if self.end_of_stream {
            return Ok(None);
        }
        match inner.read_content_byte()? {
            Some(byte) => Ok(Some(byte)),
            None => {
                self.end_of_stream = true;
                Ok(None)
            }
        }
    }

    /// Close the stream, draining unread bytes so the segmenter's position
    /// stays consistent. Closing more than once is a no-op.
    pub fn close(&mut self) -> Result<(), MultipartError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut inner = self.inner.borrow_mut();
        if inner.active_seq != self.seq {
            // the segmenter already drained this part when it advanced
            return Ok(());
        }
        if !self.end_of_stream {
            inner.drain_contents()?;
            self.end_of_stream = true;
        }
        Ok(())
    }

    fn encoding(&self) -> Encoding {
        self.inner.borrow().tokens.encoding()
    }
}

impl<R: Read> Read for PartStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_byte().map_err(std::io::Error::other)? {
                Some(byte) => {
                    buf[filled] = byte;
                    filled += 1;
                }
                None => break,
            }
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MultipartFormBuilder;

    fn parse_form(boundary: &str, body: Vec<u8>) -> FormParts<std::io::Cursor<Vec<u8>>> {
        FormParts::parse(boundary.as_bytes(), std::io::Cursor::new(body), Encoding::Utf8)
    }

    #[test]
    fn test_empty_form_has_no_parts() {
        let boundary = "-----1234";
        let mut form = parse_form(boundary, MultipartFormBuilder::new(boundary).build());
        assert!(!form.has_next().unwrap());
    }

    #[test]
    fn test_single_field_round_trips() {
        let boundary = "-----3456";
        let body = MultipartFormBuilder::new(boundary)
            .field("aField", "Here is the value of the field\n")
            .build();
        let mut form = parse_form(boundary, body);

        let mut part = form.next_part().unwrap();
        assert_eq!(part.field_name(), Some("aField"));
        assert!(part.is_form_field());
        assert_eq!(part.file_name(), None);
        assert_eq!(
            part.contents_as_string(4096).unwrap(),
            "Here is the value of the field\n"
        );
        assert!(!form.has_next().unwrap());
    }

    #[test]
    fn test_empty_filename_is_distinct_from_absent() {
        let boundary = "-----2345";
        let body = MultipartFormBuilder::new(boundary)
            .file("aFile", "", "doesnt/matter", "")
            .build();
        let mut form = parse_form(boundary, body);

        let mut part = form.next_part().unwrap();
        assert_eq!(part.file_name(), Some(""));
        assert!(!part.is_form_field());
        assert_eq!(part.content_type(), Some("doesnt/matter"));
        assert_eq!(part.contents_as_string(4096).unwrap(), "");
        assert!(!form.has_next().unwrap());
    }

    #[test]
    fn test_doubly_nested_mixed_sections_flatten_in_order() {
        let boundary = "-----outer";
        let body = MultipartFormBuilder::new(boundary)
            .field("plain", "one")
            .start_multipart("outerMixed", "-----level1")
            .attachment("a.txt", "text/plain", "first")
            .start_multipart("innerMixed", "-----level2")
            .attachment("b.txt", "text/plain", "second")
            .end_multipart()
            .attachment("c.txt", "text/plain", "third")
            .end_multipart()
            .field("tail", "four")
            .build();
        let mut form = parse_form(boundary, body);

        let expected = [
            (Some("plain"), "one"),
            (Some("outerMixed"), "first"),
            (Some("innerMixed"), "second"),
            (Some("outerMixed"), "third"),
            (Some("tail"), "four"),
        ];
        for (name, contents) in expected {
            let mut part = form.next_part().unwrap();
            assert_eq!(part.field_name(), name);
            assert_eq!(part.contents_as_string(4096).unwrap(), contents);
        }
        assert!(!form.has_next().unwrap());
    }

    #[test]
    fn test_part_stream_read_trait_drains_content() {
        let boundary = "-----2345";
        let body = MultipartFormBuilder::new(boundary)
            .file("aFile", "file.name", "application/octet-stream", "File contents here")
            .build();
        let mut form = parse_form(boundary, body);

        let mut part = form.next_part().unwrap();
        let mut contents = String::new();
        part.content().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "File contents here");
    }

    #[test]
    fn test_next_past_end_is_no_such_element() {
        let boundary = "-----1234";
        let mut form = parse_form(boundary, MultipartFormBuilder::new(boundary).build());
        let err = form.next_part().unwrap_err();
        assert!(matches!(err.cause(), Some(MultipartError::NoSuchElement)));
        // and again, without disturbing the exhausted state
        let err = form.next_part().unwrap_err();
        assert!(matches!(err.cause(), Some(MultipartError::NoSuchElement)));
    }

    #[test]
    fn test_iterator_yields_parts_in_order() {
        let boundary = "-----1234";
        let body = MultipartFormBuilder::new(boundary)
            .field("one", "1")
            .field("two", "2")
            .build();
        let form = parse_form(boundary, body);

        let names: Vec<_> = form
            .map(|part| part.unwrap().field_name().map(str::to_string))
            .collect();
        assert_eq!(
            names,
            vec![Some("one".to_string()), Some("two".to_string())]
        );
    }
}
