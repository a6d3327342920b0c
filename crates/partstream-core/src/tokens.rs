//! Token search and bounded extraction over the lookahead buffer.
//!
//! Matching is naive backtracking: each candidate position is marked, the
//! token compared byte-for-byte, and the buffer reset on mismatch. Boundary
//! and header-terminator tokens are short enough that this beats the setup
//! cost of a precompiled automaton. A `memchr` fast path skips buffered
//! bytes that cannot start the token.
//!
//! Every logical read advances a byte counter that is rewound on reset; an
//! optional cap on that counter bounds the overall stream.

use std::io::Read;

use crate::buffer::CircularBuffer;
use crate::encoding::Encoding;
use crate::error::MultipartError;

/// Token-matching reader with an optional overall byte budget.
#[derive(Debug)]
pub struct TokenStream<R> {
    input: CircularBuffer<R>,
    encoding: Encoding,
    max_stream_length: Option<u64>,
    current_byte_index: u64,
    mark_index: u64,
}

impl<R: Read> TokenStream<R> {
    /// Wrap `input` in a lookahead buffer of `buf_size` bytes (rounded up to
    /// a power of two).
    pub fn new(
        input: R,
        buf_size: usize,
        encoding: Encoding,
        max_stream_length: Option<u64>,
    ) -> Self {
        Self {
            input: CircularBuffer::new(input, buf_size),
            encoding,
            max_stream_length,
            current_byte_index: 0,
            mark_index: 0,
        }
    }

    /// Logical position in the stream: rewound by resets, so backtracked
    /// bytes are counted once.
    #[must_use]
    pub fn current_byte_index(&self) -> u64 {
        self.current_byte_index
    }

    #[must_use]
    pub(crate) fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Consume bytes up to and including a match of `token`.
    ///
    /// Returns `false` with the stream fully drained when the source ends
    /// before the token appears.
    pub fn drop_until_matched(&mut self, token: &[u8]) -> Result<bool, MultipartError> {
        debug_assert!(!token.is_empty());
        loop {
            // skip buffered bytes that cannot start the token
            match self.input.find_buffered(token[0]) {
                Some(0) => {}
                Some(offset) => self.skip(offset)?,
                None => {
                    let available = self.input.available();
                    if available > 0 {
                        self.skip(available)?;
                    }
                }
            }

            let Some(first) = self.read()? else {
                return Ok(false);
            };
            self.mark_stream(token);
            if self.match_token(token, Some(first))? == token.len() {
                return Ok(true);
            }
            self.reset_to_mark()?;
        }
    }

    /// Consume bytes up to and including a match of `token`, returning the
    /// consumed bytes (token excluded) decoded with the configured encoding.
    ///
    /// Fails with [`MultipartError::TokenNotFound`] when more than
    /// `max_string_size` bytes accumulate first, or when the source ends;
    /// the message carries the token and the last bytes read.
    pub fn read_string_until_matched(
        &mut self,
        token: &[u8],
        max_string_size: usize,
    ) -> Result<String, MultipartError> {
        let mut collected: Vec<u8> = Vec::new();
        loop {
            let Some(first) = self.read()? else {
                return Err(MultipartError::token_not_found(format!(
                    "Didn't find Token <<{}>>. Last {} bytes read were <<{}>>",
                    self.encoding.decode(token),
                    token.len(),
                    self.encoding.decode(last_bytes_read(token, &collected)),
                )));
            };
            if collected.len() >= max_string_size {
                return Err(MultipartError::token_not_found(format!(
                    "Didn't find end of Token <<{}>> within {} bytes",
                    self.encoding.decode(token),
                    max_string_size,
                )));
            }
            self.mark_stream(token);
            if self.match_token(token, Some(first))? == token.len() {
                return Ok(self.encoding.decode(&collected));
            }
            collected.push(first);
            self.reset_to_mark()?;
        }
    }

    /// Match `token` at exactly the current position, consuming it on
    /// success and leaving the stream untouched on failure.
    pub fn match_at_current(&mut self, token: &[u8]) -> Result<bool, MultipartError> {
        self.mark_stream(token);
        let first = self.read()?;
        if self.match_token(token, first)? == token.len() {
            return Ok(true);
        }
        self.reset_to_mark()?;
        Ok(false)
    }

    /// Next content byte, or `None` when `token` is matched at the current
    /// position. The token is not consumed in the `None` case, and end of
    /// source reports the same sentinel.
    pub fn read_byte_until_matched(&mut self, token: &[u8]) -> Result<Option<u8>, MultipartError> {
        self.mark_stream(token);
        let mut current = self.read()?;
        let mut matched = 0;
        while matched < token.len() && current == Some(token[matched]) {
            current = self.read()?;
            matched += 1;
        }
        if matched == token.len() {
            self.reset_to_mark()?;
            return Ok(None);
        }
        self.reset_to_mark()?;
        self.read()
    }

    /// Compare `token` byte-for-byte starting with `first`, reading ahead as
    /// needed. Returns how many token bytes matched.
    fn match_token(
        &mut self,
        token: &[u8],
        first: Option<u8>,
    ) -> Result<usize, MultipartError> {
        let mut matched = 0;
        let mut current = first;
        while let Some(byte) = current {
            if byte != token[matched] {
                break;
            }
            matched += 1;
            if matched >= token.len() {
                break;
            }
            current = self.read()?;
        }
        Ok(matched)
    }

    fn mark_stream(&mut self, token: &[u8]) {
        self.mark_index = self.current_byte_index;
        self.input.mark(token.len());
    }

    fn reset_to_mark(&mut self) -> Result<(), MultipartError> {
        self.current_byte_index = self.mark_index;
        self.input.reset()
    }

    fn read(&mut self) -> Result<Option<u8>, MultipartError> {
        self.current_byte_index += 1;
        self.check_budget()?;
        self.input.read_byte()
    }

    fn skip(&mut self, count: usize) -> Result<(), MultipartError> {
        self.current_byte_index += count as u64;
        self.check_budget()?;
        self.input.skip_buffered(count);
        Ok(())
    }

    fn check_budget(&self) -> Result<(), MultipartError> {
        if let Some(max) = self.max_stream_length {
            if self.current_byte_index >= max {
                return Err(MultipartError::StreamTooLong {
                    detail: format!("Form contents was longer than {max} bytes"),
                });
            }
        }
        Ok(())
    }
}

/// Tail of `collected` shown in not-found messages: the last `token.len()`
/// bytes where available, otherwise everything read.
fn last_bytes_read<'a>(token: &[u8], collected: &'a [u8]) -> &'a [u8] {
    if collected.len() > token.len() {
        &collected[collected.len() - token.len()..]
    } else {
        collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens_over(bytes: &[u8]) -> TokenStream<std::io::Cursor<Vec<u8>>> {
        TokenStream::new(std::io::Cursor::new(bytes.to_vec()), 64, Encoding::Utf8, None)
    }

    fn tokens_with_max(bytes: &[u8], max: u64) -> TokenStream<std::io::Cursor<Vec<u8>>> {
        TokenStream::new(
            std::io::Cursor::new(bytes.to_vec()),
            64,
            Encoding::Utf8,
            Some(max),
        )
    }

    #[test]
    fn test_drop_until_matched_consumes_through_token() {
        let mut tokens = tokens_over(b"junk junk--token after");
        assert!(tokens.drop_until_matched(b"--token").unwrap());
        assert_eq!(tokens.read_byte_until_matched(b"zz").unwrap(), Some(b' '));
    }

    #[test]
    fn test_drop_until_matched_handles_overlapping_candidates() {
        let mut tokens = tokens_over(b"\r\r\n rest");
        assert!(tokens.drop_until_matched(b"\r\n").unwrap());
        assert_eq!(tokens.read_byte_until_matched(b"zz").unwrap(), Some(b' '));
    }

    #[test]
    fn test_drop_until_matched_drains_on_missing_token() {
        let mut tokens = tokens_over(b"no delimiter here");
        assert!(!tokens.drop_until_matched(b"--boundary").unwrap());
        assert_eq!(tokens.read_byte_until_matched(b"zz").unwrap(), None);
    }

    #[test]
    fn test_read_string_until_matched_excludes_token() {
        let mut tokens = tokens_over(b"Content-Type: text/plain\r\nrest");
        let line = tokens.read_string_until_matched(b"\r\n", 4096).unwrap();
        assert_eq!(line, "Content-Type: text/plain");
    }

    #[test]
    fn test_read_string_reports_byte_budget_in_error() {
        let mut tokens = tokens_over(b"xxxxxxxxxxxxxxxxxxxx");
        let err = tokens.read_string_until_matched(b"\r\n", 10).unwrap_err();
        assert!(matches!(
            err,
            MultipartError::TokenNotFound { detail }
                if detail == "Didn't find end of Token <<\r\n>> within 10 bytes"
        ));
    }

    #[test]
    fn test_read_string_reports_tail_on_end_of_source() {
        let mut tokens = tokens_over(b"abcd");
        let err = tokens.read_string_until_matched(b"\r\n", 4096).unwrap_err();
        assert!(matches!(
            err,
            MultipartError::TokenNotFound { detail }
                if detail == "Didn't find Token <<\r\n>>. Last 2 bytes read were <<cd>>"
        ));
    }

    #[test]
    fn test_read_string_reports_empty_tail_at_immediate_end() {
        let mut tokens = tokens_over(b"");
        let err = tokens.read_string_until_matched(b"\r\n", 4096).unwrap_err();
        assert!(matches!(
            err,
            MultipartError::TokenNotFound { detail }
                if detail == "Didn't find Token <<\r\n>>. Last 2 bytes read were <<>>"
        ));
    }

    #[test]
    fn test_match_at_current_consumes_only_on_success() {
        let mut tokens = tokens_over(b"--x rest");
        assert!(!tokens.match_at_current(b"--y").unwrap());
        assert!(tokens.match_at_current(b"--x").unwrap());
        assert_eq!(tokens.read_byte_until_matched(b"zz").unwrap(), Some(b' '));
    }

    #[test]
    fn test_match_at_current_at_end_of_source() {
        let mut tokens = tokens_over(b"");
        assert!(!tokens.match_at_current(b"\r\n").unwrap());
    }

    #[test]
    fn test_read_byte_until_matched_leaves_token_unconsumed() {
        let mut tokens = tokens_over(b"ab\r\n--b tail");
        assert_eq!(tokens.read_byte_until_matched(b"\r\n--b").unwrap(), Some(b'a'));
        assert_eq!(tokens.read_byte_until_matched(b"\r\n--b").unwrap(), Some(b'b'));
        assert_eq!(tokens.read_byte_until_matched(b"\r\n--b").unwrap(), None);
        // the token is still on the stream
        assert!(tokens.match_at_current(b"\r\n--b").unwrap());
        assert_eq!(tokens.read_byte_until_matched(b"zz").unwrap(), Some(b' '));
    }

    #[test]
    fn test_read_byte_until_matched_passes_partial_matches_through() {
        let mut tokens = tokens_over(b"\r\nX");
        assert_eq!(tokens.read_byte_until_matched(b"\r\n-").unwrap(), Some(b'\r'));
        assert_eq!(tokens.read_byte_until_matched(b"\r\n-").unwrap(), Some(b'\n'));
        assert_eq!(tokens.read_byte_until_matched(b"\r\n-").unwrap(), Some(b'X'));
        assert_eq!(tokens.read_byte_until_matched(b"\r\n-").unwrap(), None);
    }

    #[test]
    fn test_stream_budget_fails_with_stream_too_long() {
        let mut tokens = tokens_with_max(&[b'x'; 64], 16);
        let err = tokens.drop_until_matched(b"\r\n").unwrap_err();
        assert!(matches!(
            err,
            MultipartError::StreamTooLong { detail }
                if detail == "Form contents was longer than 16 bytes"
        ));
    }

    #[test]
    fn test_backtracked_bytes_count_once_toward_budget() {
        // every CR starts a failed probe that reads one byte ahead; a budget
        // of 9 only suffices if resets rewind the counter
        let mut tokens = tokens_with_max(b"\r\r\r\r\r\r\r\n", 9);
        let line = tokens.read_string_until_matched(b"\r\n", 4096).unwrap();
        assert_eq!(line, "\r\r\r\r\r\r");
    }

    #[test]
    fn test_current_byte_index_tracks_logical_position() {
        let mut tokens = tokens_over(b"abc\r\nrest");
        assert_eq!(tokens.current_byte_index(), 0);
        tokens.read_string_until_matched(b"\r\n", 4096).unwrap();
        assert_eq!(tokens.current_byte_index(), 5);
    }
}
