//! Text encoding seam for header and content decoding.

/// Encoding used to decode header lines, error-message tokens, and in-memory
/// part string views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// UTF-8, decoded lossily (invalid sequences become U+FFFD).
    #[default]
    Utf8,
    /// ISO-8859-1, where every byte maps to the code point of equal value.
    Latin1,
}

impl Encoding {
    /// Decode raw bytes into a `String`.
    #[must_use]
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        }
    }

    /// Encode text into raw bytes. Latin-1 replaces out-of-range characters
    /// with `?`.
    #[must_use]
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Self::Utf8 => text.as_bytes().to_vec(),
            Self::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }
}
