//! Error types for multipart stream parsing.
//!
//! Low-level failures ([`MultipartError`]) flow unchanged through the
//! tokenizer and segmenter internals. At the pull-iteration boundary they are
//! wrapped as [`ParseError`] so callers catch a single type while keeping the
//! original cause inspectable.

use std::fmt;

/// Errors raised by the lookahead buffer, token stream, and part segmenter.
#[derive(Debug)]
pub enum MultipartError {
    /// A required delimiter (boundary, field separator, header terminator)
    /// was not found within its search window. Fatal to the current parse
    /// position.
    TokenNotFound {
        /// Full message including the missing token and context bytes.
        detail: String,
    },
    /// Overall-stream or per-part byte budget exceeded.
    StreamTooLong {
        /// Full message including the exceeded limit.
        detail: String,
    },
    /// Structurally invalid input, e.g. a header line without a colon.
    Parse {
        /// Full message including the offending input.
        detail: String,
    },
    /// A part's content stream was read after it was closed, or after the
    /// segmenter advanced past it.
    AlreadyClosed,
    /// The lookahead buffer was reset after its mark was invalidated or
    /// before any mark was set. Not reachable from malformed input alone.
    InvalidMark,
    /// Iteration was advanced past the last part.
    NoSuchElement,
    /// I/O failure from the underlying byte source, propagated unchanged.
    Io(std::io::Error),
}

impl MultipartError {
    pub(crate) fn token_not_found(detail: impl Into<String>) -> Self {
        Self::TokenNotFound {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for MultipartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenNotFound { detail }
            | Self::StreamTooLong { detail }
            | Self::Parse { detail } => f.write_str(detail),
            Self::AlreadyClosed => write!(f, "stream already closed"),
            Self::InvalidMark => write!(f, "lookahead mark invalidated or never set"),
            Self::NoSuchElement => write!(f, "No more parts in this MultipartForm"),
            Self::Io(e) => write!(f, "multipart I/O error: {e}"),
        }
    }
}

impl std::error::Error for MultipartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MultipartError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Uniform error surfaced by [`FormParts`](crate::FormParts) iteration.
///
/// Wraps the underlying [`MultipartError`] where one exists; malformed header
/// lines are reported directly with no deeper cause.
#[derive(Debug)]
pub struct ParseError {
    message: String,
    cause: Option<MultipartError>,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub(crate) fn from_cause(cause: MultipartError) -> Self {
        Self {
            message: cause.to_string(),
            cause: Some(cause),
        }
    }

    /// The error message, identical to the cause's message when wrapping.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The wrapped lower-level failure, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&MultipartError> {
        self.cause.as_ref()
    }

    /// Unwrap back to the underlying error, for callers that handle the
    /// lower-level taxonomy directly.
    #[must_use]
    pub fn into_cause(self) -> MultipartError {
        match self.cause {
            Some(cause) => cause,
            None => MultipartError::Parse {
                detail: self.message,
            },
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}
