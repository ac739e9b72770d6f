//! Error types for httpcall.

use std::fmt;
use std::io;

use crate::call::CallState;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured content a response body was expected to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Json,
    Xml,
}

impl fmt::Display for BodyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyFormat::Json => f.write_str("JSON"),
            BodyFormat::Xml => f.write_str("XML"),
        }
    }
}

/// Why a non-empty body could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFailure {
    DepthExceeded,
    Syntax,
    UnexpectedEnd,
    Encoding,
    Data,
    Xml,
}

impl fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DecodeFailure::DepthExceeded => "Maximum stack depth exceeded",
            DecodeFailure::Syntax => "Syntax error",
            DecodeFailure::UnexpectedEnd => "Unexpected end of input",
            DecodeFailure::Encoding => "Malformed UTF-8 characters, possibly incorrectly encoded",
            DecodeFailure::Data => "Value does not match the expected type",
            DecodeFailure::Xml => "Malformed XML document",
        };
        f.write_str(text)
    }
}

/// Errors that can occur while building, executing or decoding calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A call lifecycle method was invoked out of order.
    #[error("Cannot get to {to} from {from}")]
    InvalidStateTransition { from: CallState, to: CallState },

    /// The transfer failed without producing any response body.
    #[error("Transfer error {code}: {message}")]
    Transfer { code: i32, message: String },

    /// The server answered with a status code in the error range.
    #[error("HTTP {status}: {message}")]
    HttpResponse { status: u16, message: String },

    /// A non-empty body failed to decode as the expected content type.
    #[error("Response body does not have proper {format} format ({kind}): {detail}")]
    MalformedResponse {
        format: BodyFormat,
        kind: DecodeFailure,
        detail: String,
    },

    /// A structured content type was expected but the body was empty.
    #[error("Response body is empty")]
    EmptyBody,

    /// The multi-call driver was handed something it cannot execute.
    #[error("Unexpected request object: {0}")]
    UnsupportedRequestObject(String),

    /// Unknown HTTP verb.
    #[error("Unsupported HTTP method: {0}")]
    InvalidMethod(String),

    /// The multiplexer itself failed; no per-call attribution is possible.
    #[error("Multiplexer failure {code}: {message}")]
    Multiplexer { code: i32, message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error while building a request body.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn multiplexer(code: i32, message: impl Into<String>) -> Self {
        Error::Multiplexer {
            code,
            message: message.into(),
        }
    }
}
