//! Error types for the camera streaming library.

use std::fmt;

/// Errors that can occur in the camera streaming library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse): malformed HTTP requests.
/// - **Transport**: [`Io`](Self::Io): socket/network failures.
/// - **Capture**: [`DeviceStart`](Self::DeviceStart),
///   [`DeviceStop`](Self::DeviceStop).
/// - **Server**: [`AlreadyRunning`](Self::AlreadyRunning).
#[derive(Debug, thiserror::Error)]
pub enum RobocamError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The capture device could not be powered up. The lifecycle manager
    /// stays idle and the consumer count is unchanged.
    #[error("capture device failed to start: {0}")]
    DeviceStart(String),

    /// The capture device reported an error while shutting down.
    #[error("capture device failed to stop: {0}")]
    DeviceStop(String),

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// Failed to parse an HTTP request message.
    #[error("HTTP parse error: {kind}")]
    Parse { kind: ParseErrorKind },
}

/// Specific kind of HTTP parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method Path Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// Version other than `HTTP/1.0` or `HTTP/1.1`.
    UnsupportedVersion,
    /// The head exceeded the size limit before its blank line.
    HeadTooLarge,
    /// The client closed the connection in the middle of the head.
    IncompleteHead,
    /// The head was not valid UTF-8.
    InvalidEncoding,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::UnsupportedVersion => write!(f, "unsupported HTTP version"),
            Self::HeadTooLarge => write!(f, "request head too large"),
            Self::IncompleteHead => write!(f, "incomplete request head"),
            Self::InvalidEncoding => write!(f, "request head is not UTF-8"),
        }
    }
}

/// Convenience alias for `Result<T, RobocamError>`.
pub type Result<T> = std::result::Result<T, RobocamError>;
