//! Error types for the streaming engine.

use std::fmt;

/// Errors that can occur in the streaming engine.
///
/// Variants are grouped by how far they propagate:
///
/// - **Per frame** (absorbed, counted in stats): [`CaptureUnavailable`](Self::CaptureUnavailable),
///   [`QueueFull`](Self::QueueFull), [`FrameTooLarge`](Self::FrameTooLarge).
/// - **Per connection** (end one session only): [`Parse`](Self::Parse),
///   [`SendFailed`](Self::SendFailed), [`SessionLimitReached`](Self::SessionLimitReached).
/// - **Server lifecycle** (returned from [`StreamServer::start`](crate::StreamServer::start)):
///   [`ResourceInit`](Self::ResourceInit), [`InvalidConfig`](Self::InvalidConfig),
///   [`AlreadyRunning`](Self::AlreadyRunning).
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The frame producer had no frame ready. Transient; back off and retry.
    #[error("capture unavailable")]
    CaptureUnavailable,

    /// A fan-out queue was full and the incoming frame was dropped.
    #[error("queue full")]
    QueueFull,

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Every session slot is taken; the connection is refused.
    #[error("session limit reached ({max} clients)")]
    SessionLimitReached { max: usize },

    /// A socket send failed. Fatal for that socket only.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// The frame exceeds the configured UDP frame size limit.
    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    /// Socket creation, bind or listen failed during server start.
    #[error("failed to initialize {what}: {source}")]
    ResourceInit {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Configuration values are inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// [`StreamServer::start`](crate::StreamServer::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

impl StreamError {
    pub(crate) fn init(what: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| Self::ResourceInit { what, source }
    }
}

/// Specific kind of RTSP parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// The request carried no `CSeq` header and the server requires one.
    MissingCseq,
    /// The request was not valid UTF-8 text.
    InvalidEncoding,
    /// The method is not one the server implements.
    UnknownMethod(String),
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::MissingCseq => write!(f, "missing CSeq"),
            Self::InvalidEncoding => write!(f, "request is not UTF-8"),
            Self::UnknownMethod(method) => write!(f, "unknown method {method}"),
        }
    }
}

/// Convenience alias for `Result<T, StreamError>`.
pub type Result<T> = std::result::Result<T, StreamError>;
