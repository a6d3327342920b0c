//! Reference encoder for syntactically valid multipart bodies.
//!
//! Mirrors the segmenter's framing rules, including nested
//! `multipart/mixed` sections, so tests and callers can construct bodies
//! without hand-assembling boundary bytes. The boundary is given without
//! the leading `--`, matching [`FormParts::parse`](crate::FormParts::parse).

use crate::encoding::Encoding;
use crate::segmenter::{FIELD_SEPARATOR, STREAM_TERMINATOR, prepend_stream_terminator};

/// Builds a well-formed multipart/form-data body.
#[derive(Debug)]
pub struct MultipartFormBuilder {
    /// Boundary stack, `--`-prefixed; the top is the section being written.
    boundary: Vec<Vec<u8>>,
    body: Vec<u8>,
    encoding: Encoding,
}

impl MultipartFormBuilder {
    /// Start a UTF-8 body delimited by `boundary`.
    #[must_use]
    pub fn new(boundary: &str) -> Self {
        Self::with_encoding(boundary.as_bytes(), Encoding::Utf8)
    }

    /// Start a body delimited by `boundary`, encoding text with `encoding`.
    #[must_use]
    pub fn with_encoding(boundary: &[u8], encoding: Encoding) -> Self {
        Self {
            boundary: vec![prepend_stream_terminator(boundary)],
            body: Vec::new(),
            encoding,
        }
    }

    /// Append a form field.
    #[must_use]
    pub fn field(self, name: &str, value: &str) -> Self {
        self.part(
            value,
            &[(
                "Content-Disposition",
                &[("form-data", None), ("name", Some(name))],
            )],
        )
    }

    /// Append a file upload.
    #[must_use]
    pub fn file(self, field_name: &str, file_name: &str, content_type: &str, contents: &str) -> Self {
        self.part(
            contents,
            &[
                (
                    "Content-Disposition",
                    &[
                        ("form-data", None),
                        ("name", Some(field_name)),
                        ("filename", Some(file_name)),
                    ],
                ),
                ("Content-Type", &[(content_type, None)]),
            ],
        )
    }

    /// Append a part with explicit headers. Each header is a name plus
    /// `key[="value"]` pairs joined by `"; "`.
    #[must_use]
    pub fn part(mut self, contents: &str, headers: &[(&str, &[(&str, Option<&str>)])]) -> Self {
        self.append_current_boundary();
        self.body.extend_from_slice(&FIELD_SEPARATOR);
        for (name, pairs) in headers {
            self.append_header(name, pairs);
        }
        self.body.extend_from_slice(&FIELD_SEPARATOR);
        let contents = self.encoding.encode(contents);
        self.body.extend_from_slice(&contents);
        self.body.extend_from_slice(&FIELD_SEPARATOR);
        self
    }

    /// Append a part given its raw bytes after the boundary line.
    #[must_use]
    pub fn raw_part(mut self, raw: &str) -> Self {
        self.append_current_boundary();
        self.body.extend_from_slice(&FIELD_SEPARATOR);
        let raw = self.encoding.encode(raw);
        self.body.extend_from_slice(&raw);
        self.body.extend_from_slice(&FIELD_SEPARATOR);
        self
    }

    /// Open a nested `multipart/mixed` section under `field_name`.
    #[must_use]
    pub fn start_multipart(mut self, field_name: &str, sub_boundary: &str) -> Self {
        self.append_current_boundary();
        self.body.extend_from_slice(&FIELD_SEPARATOR);
        self.append_header(
            "Content-Disposition",
            &[("form-data", None), ("name", Some(field_name))],
        );
        self.append_header(
            "Content-Type",
            &[("multipart/mixed", None), ("boundary", Some(sub_boundary))],
        );
        self.body.extend_from_slice(&FIELD_SEPARATOR);
        self.boundary
            .push(prepend_stream_terminator(&self.encoding.encode(sub_boundary)));
        self
    }

    /// Append an attachment inside a nested section.
    #[must_use]
    pub fn attachment(self, file_name: &str, content_type: &str, contents: &str) -> Self {
        self.part(
            contents,
            &[
                (
                    "Content-Disposition",
                    &[("attachment", None), ("filename", Some(file_name))],
                ),
                ("Content-Type", &[(content_type, None)]),
            ],
        )
    }

    /// Close the innermost nested section.
    #[must_use]
    pub fn end_multipart(mut self) -> Self {
        if self.boundary.len() > 1 {
            if let Some(boundary) = self.boundary.pop() {
                self.body.extend_from_slice(&boundary);
                self.body.extend_from_slice(&STREAM_TERMINATOR);
                self.body.extend_from_slice(&FIELD_SEPARATOR);
            }
        }
        self
    }

    /// Terminate the body and return its bytes.
    #[must_use]
    pub fn build(mut self) -> Vec<u8> {
        self.append_current_boundary();
        self.body.extend_from_slice(&STREAM_TERMINATOR);
        self.body.extend_from_slice(&FIELD_SEPARATOR);
        self.body
    }

    fn append_current_boundary(&mut self) {
        if let Some(boundary) = self.boundary.last() {
            self.body.extend_from_slice(boundary);
        }
    }

    fn append_header(&mut self, name: &str, pairs: &[(&str, Option<&str>)]) {
        let rendered = pairs
            .iter()
            .map(|(key, value)| match value {
                Some(value) => format!("{key}=\"{value}\""),
                None => (*key).to_string(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        let line = self.encoding.encode(&format!("{name}: {rendered}"));
        self.body.extend_from_slice(&line);
        self.body.extend_from_slice(&FIELD_SEPARATOR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_field_layout() {
        let body = MultipartFormBuilder::new("bnd").field("name", "value").build();
        let expected = "--bnd\r\n\
                        Content-Disposition: form-data; name=\"name\"\r\n\
                        \r\n\
                        value\r\n\
                        --bnd--\r\n";
        assert_eq!(body, expected.as_bytes());
    }

    #[test]
    fn test_nested_section_layout() {
        let body = MultipartFormBuilder::new("out")
            .start_multipart("mixed", "in")
            .attachment("a.txt", "text/plain", "x")
            .end_multipart()
            .build();
        let expected = "--out\r\n\
                        Content-Disposition: form-data; name=\"mixed\"\r\n\
                        Content-Type: multipart/mixed; boundary=\"in\"\r\n\
                        \r\n\
                        --in\r\n\
                        Content-Disposition: attachment; filename=\"a.txt\"\r\n\
                        Content-Type: text/plain\r\n\
                        \r\n\
                        x\r\n\
                        --in--\r\n\
                        --out--\r\n";
        assert_eq!(body, expected.as_bytes());
    }

    #[test]
    fn test_latin1_encoding_of_text() {
        let body = MultipartFormBuilder::with_encoding(b"bnd", Encoding::Latin1)
            .field("nom", "caf\u{e9}")
            .build();
        let needle: &[u8] = b"\r\ncaf\xe9\r\n";
        assert!(body.windows(needle.len()).any(|window| window == needle));
    }
}
