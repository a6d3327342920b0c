//! Circular lookahead buffer over a raw byte source.
//!
//! Provides byte-at-a-time reads with bounded backtracking: a single
//! `mark`/`reset` window that stays valid for a caller-declared number of
//! future reads. The buffer is the only component that touches the
//! underlying source; everything above it works in terms of marks, resets,
//! and single bytes.
//!
//! All positions are absolute `u64` stream offsets; buffer indices are
//! derived by masking against a power-of-two capacity and never leave this
//! module.

use std::io::Read;

use crate::error::MultipartError;

/// Fixed-capacity circular byte buffer with a mark/reset lookahead window.
#[derive(Debug)]
pub struct CircularBuffer<R> {
    source: R,
    buffer: Vec<u8>,
    index_mask: u64,
    /// Absolute offset of the next byte to hand out.
    cursor: u64,
    /// Absolute offset one past the last buffered byte.
    right_bound: u64,
    mark: u64,
    mark_valid: bool,
    read_limit: u64,
    eos: bool,
}

impl<R: Read> CircularBuffer<R> {
    /// Create a buffer over `source`. `capacity` is rounded up to the next
    /// power of two.
    pub fn new(source: R, capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        Self {
            source,
            buffer: vec![0u8; capacity],
            index_mask: capacity as u64 - 1,
            cursor: 0,
            right_bound: 0,
            mark: 0,
            mark_valid: false,
            read_limit: 0,
            eos: false,
        }
    }

    /// Next byte of the stream, or `None` once the source is exhausted.
    ///
    /// Source I/O errors propagate unchanged as [`MultipartError::Io`].
    pub fn read_byte(&mut self) -> Result<Option<u8>, MultipartError> {
        while self.cursor == self.right_bound {
            if !self.refill()? {
                return Ok(None);
            }
        }
        let byte = self.buffer[(self.cursor & self.index_mask) as usize];
        self.cursor += 1;
        if self.mark_valid && self.cursor - self.mark > self.read_limit {
            self.mark_valid = false;
        }
        Ok(Some(byte))
    }

    /// Record the current position as restorable for up to `read_limit`
    /// bytes of future reads. Reading further invalidates the mark.
    pub fn mark(&mut self, read_limit: usize) {
        debug_assert!(
            read_limit <= self.buffer.len(),
            "mark window must fit the buffer"
        );
        self.mark = self.cursor;
        self.mark_valid = true;
        self.read_limit = read_limit as u64;
    }

    /// Rewind to the mark.
    ///
    /// Fails with [`MultipartError::InvalidMark`] when the mark was
    /// invalidated by reading past its limit, or was never set.
    pub fn reset(&mut self) -> Result<(), MultipartError> {
        if !self.mark_valid {
            return Err(MultipartError::InvalidMark);
        }
        self.cursor = self.mark;
        Ok(())
    }

    /// Number of buffered bytes ahead of the cursor.
    #[must_use]
    pub fn available(&self) -> usize {
        (self.right_bound - self.cursor) as usize
    }

    /// Offset, from the cursor, of the next buffered occurrence of `byte`.
    pub(crate) fn find_buffered(&self, byte: u8) -> Option<usize> {
        let cursor_index = (self.cursor & self.index_mask) as usize;
        let available = self.available();
        let first_len = available.min(self.buffer.len() - cursor_index);
        if let Some(offset) = memchr::memchr(byte, &self.buffer[cursor_index..cursor_index + first_len])
        {
            return Some(offset);
        }
        let wrapped = available - first_len;
        memchr::memchr(byte, &self.buffer[..wrapped]).map(|offset| first_len + offset)
    }

    /// Advance the cursor over `count` already-buffered bytes.
    pub(crate) fn skip_buffered(&mut self, count: usize) {
        debug_assert!(count <= self.available());
        self.cursor += count as u64;
        if self.mark_valid && self.cursor - self.mark > self.read_limit {
            self.mark_valid = false;
        }
    }

    /// Pull more bytes from the source without overwriting the window
    /// between the oldest valid mark (or the cursor) and the buffered end.
    fn refill(&mut self) -> Result<bool, MultipartError> {
        if self.eos {
            return Ok(false);
        }

        let window_start = if self.mark_valid { self.mark } else { self.cursor };
        if self.right_bound - window_start >= self.buffer.len() as u64 {
            // A mark whose read limit spans the whole buffer can no longer
            // be honoured once the window fills; the reader that placed it
            // sees InvalidMark on reset.
            self.mark_valid = false;
            return self.refill();
        }

        let right_index = (self.right_bound & self.index_mask) as usize;
        let window_index = (window_start & self.index_mask) as usize;
        let writable = if window_index > right_index {
            window_index - right_index
        } else {
            self.buffer.len() - right_index
        };

        let read = self
            .source
            .read(&mut self.buffer[right_index..right_index + writable])?;
        if read == 0 {
            self.eos = true;
            return Ok(false);
        }
        self.right_bound += read as u64;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_over(bytes: &[u8], capacity: usize) -> CircularBuffer<std::io::Cursor<Vec<u8>>> {
        CircularBuffer::new(std::io::Cursor::new(bytes.to_vec()), capacity)
    }

    #[test]
    fn test_reads_all_bytes_then_signals_end() {
        let mut buf = buffer_over(b"abc", 8);
        assert_eq!(buf.read_byte().unwrap(), Some(b'a'));
        assert_eq!(buf.read_byte().unwrap(), Some(b'b'));
        assert_eq!(buf.read_byte().unwrap(), Some(b'c'));
        assert_eq!(buf.read_byte().unwrap(), None);
        assert_eq!(buf.read_byte().unwrap(), None);
    }

    #[test]
    fn test_mark_and_reset_replays_bytes() {
        let mut buf = buffer_over(b"abcdef", 8);
        assert_eq!(buf.read_byte().unwrap(), Some(b'a'));
        buf.mark(3);
        assert_eq!(buf.read_byte().unwrap(), Some(b'b'));
        assert_eq!(buf.read_byte().unwrap(), Some(b'c'));
        buf.reset().unwrap();
        assert_eq!(buf.read_byte().unwrap(), Some(b'b'));
        assert_eq!(buf.read_byte().unwrap(), Some(b'c'));
        assert_eq!(buf.read_byte().unwrap(), Some(b'd'));
    }

    #[test]
    fn test_reset_without_mark_is_invalid() {
        let mut buf = buffer_over(b"abc", 8);
        assert!(matches!(buf.reset(), Err(MultipartError::InvalidMark)));
    }

    #[test]
    fn test_reading_past_limit_invalidates_mark() {
        let mut buf = buffer_over(b"abcdef", 8);
        buf.mark(2);
        assert_eq!(buf.read_byte().unwrap(), Some(b'a'));
        assert_eq!(buf.read_byte().unwrap(), Some(b'b'));
        // still within the limit
        buf.reset().unwrap();
        assert_eq!(buf.read_byte().unwrap(), Some(b'a'));
        assert_eq!(buf.read_byte().unwrap(), Some(b'b'));
        assert_eq!(buf.read_byte().unwrap(), Some(b'c'));
        assert!(matches!(buf.reset(), Err(MultipartError::InvalidMark)));
    }

    #[test]
    fn test_wraparound_preserves_marked_window() {
        // capacity 4; stream longer than the buffer forces wrapping refills
        let mut buf = buffer_over(b"0123456789", 4);
        for expected in b"0123" {
            assert_eq!(buf.read_byte().unwrap(), Some(*expected));
        }
        buf.mark(2);
        assert_eq!(buf.read_byte().unwrap(), Some(b'4'));
        assert_eq!(buf.read_byte().unwrap(), Some(b'5'));
        buf.reset().unwrap();
        assert_eq!(buf.read_byte().unwrap(), Some(b'4'));
        for expected in b"56789" {
            assert_eq!(buf.read_byte().unwrap(), Some(*expected));
        }
        assert_eq!(buf.read_byte().unwrap(), None);
    }

    #[test]
    fn test_capacity_rounds_up_to_power_of_two() {
        // capacity request of 5 must still stream more than 5 bytes cleanly
        let mut buf = buffer_over(b"abcdefghij", 5);
        let mut collected = Vec::new();
        while let Some(b) = buf.read_byte().unwrap() {
            collected.push(b);
        }
        assert_eq!(collected, b"abcdefghij");
    }

    #[test]
    fn test_available_counts_buffered_bytes() {
        let mut buf = buffer_over(b"abcd", 8);
        assert_eq!(buf.available(), 0);
        assert_eq!(buf.read_byte().unwrap(), Some(b'a'));
        assert_eq!(buf.available(), 3);
    }

    #[test]
    fn test_find_buffered_spans_the_wrap_point() {
        let mut buf = buffer_over(b"abcdefgh", 4);
        for expected in b"abc" {
            assert_eq!(buf.read_byte().unwrap(), Some(*expected));
        }
        // cursor sits at index 3; the next refill wraps into the front
        buf.mark(3);
        assert_eq!(buf.read_byte().unwrap(), Some(b'd'));
        assert_eq!(buf.read_byte().unwrap(), Some(b'e'));
        buf.reset().unwrap();
        assert_eq!(buf.find_buffered(b'f'), Some(2));
        assert_eq!(buf.find_buffered(b'z'), None);
        buf.skip_buffered(2);
        assert_eq!(buf.read_byte().unwrap(), Some(b'f'));
    }
}
