//! Error types shared across the runtime
//!
//! Every fallible operation in the core returns [`Error`], which carries an
//! [`ErrorKind`] callers can inspect. Errors cross the wire as
//! `"<code>: <message>"` inside an error envelope, so a remote failure
//! surfaces with the same kind it had on the server.

use std::fmt;

/// Classification of runtime failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No such service name or endpoint
    NotFound,
    /// Dial or connect failure after retries
    Unavailable,
    /// Deadline exceeded
    Timeout,
    /// Canceled by the caller
    Canceled,
    /// Malformed payload or missing fields
    BadRequest,
    /// A handler returned an error
    Internal,
    /// Framing or codec corruption
    Wire,
    /// Operation on a closed resource
    Closed,
    /// Broker used before connect
    NotConnected,
    /// Selector was given an empty pool
    NoneAvailable,
}

impl ErrorKind {
    /// Stable code used as the wire prefix for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Canceled => "canceled",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Internal => "internal",
            ErrorKind::Wire => "wire",
            ErrorKind::Closed => "closed",
            ErrorKind::NotConnected => "not_connected",
            ErrorKind::NoneAvailable => "none_available",
        }
    }

    /// Parse a wire code back into a kind
    pub fn from_code(code: &str) -> Option<ErrorKind> {
        match code {
            "not_found" => Some(ErrorKind::NotFound),
            "unavailable" => Some(ErrorKind::Unavailable),
            "timeout" => Some(ErrorKind::Timeout),
            "canceled" => Some(ErrorKind::Canceled),
            "bad_request" => Some(ErrorKind::BadRequest),
            "internal" => Some(ErrorKind::Internal),
            "wire" => Some(ErrorKind::Wire),
            "closed" => Some(ErrorKind::Closed),
            "not_connected" => Some(ErrorKind::NotConnected),
            "none_available" => Some(ErrorKind::NoneAvailable),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Runtime error carrying a kind and a human-readable message
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Create an error with an explicit kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The kind of this error
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The message without the kind prefix
    pub fn message(&self) -> &str {
        &self.message
    }

    /// A `NotFound` error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// An `Unavailable` error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    /// A `Timeout` error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// A `Canceled` error
    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Canceled, message)
    }

    /// A `BadRequest` error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// An `Internal` error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// A `Wire` error
    pub fn wire(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Wire, message)
    }

    /// A `Closed` error
    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Closed, message)
    }

    /// A `NotConnected` error
    pub fn not_connected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotConnected, message)
    }

    /// A `NoneAvailable` error
    pub fn none_available(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoneAvailable, message)
    }

    /// Encode as `"<code>: <message>"` for an error envelope
    pub fn to_wire(&self) -> String {
        format!("{}: {}", self.kind.code(), self.message)
    }

    /// Decode an error envelope string produced by [`Error::to_wire`]
    ///
    /// Strings without a recognizable code prefix come back as `Internal`,
    /// so foreign error text still surfaces to the caller.
    pub fn from_wire(wire: &str) -> Self {
        if let Some((code, rest)) = wire.split_once(':') {
            if let Some(kind) = ErrorKind::from_code(code.trim()) {
                return Self::new(kind, rest.trim_start());
            }
        }
        Self::internal(wire)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::AddrNotAvailable => {
                ErrorKind::Unavailable
            }
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected => ErrorKind::Closed,
            _ => ErrorKind::Wire,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::bad_request(err.to_string())
    }
}

/// Result alias used throughout the core
pub type Result<T> = std::result::Result<T, Error>;
