//! Decoder errors

use crate::types::StreamId;
use thiserror::Error;

/// Stable error codes surfaced to control-plane callers
pub mod error_codes {
    // Malformed input
    pub const MALFORMED_DESCRIPTOR: u32 = 40001;
    pub const INVALID_INPUT: u32 = 40002;
    pub const FRAME_TOO_LARGE: u32 = 40003;

    // Unresolved references
    pub const STREAM_NOT_ASSOCIATED: u32 = 40401;
    pub const SCHEMA_NOT_REGISTERED: u32 = 40402;
    pub const MESSAGE_NOT_FOUND: u32 = 40403;
    pub const DISPATCH_DISABLED: u32 = 40404;

    // Conflicts
    pub const ASSOCIATION_CONFLICT: u32 = 40901;

    // Transport / internal
    pub const TRANSPORT_FAILURE: u32 = 50001;
    pub const INTERNAL_ERROR: u32 = 50002;
}

/// Coarse classification of a [`DecoderError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected at the boundary, never mutates state
    MalformedInput,
    /// Unresolved stream, package or message
    NotFound,
    /// Stream already bound to a different schema
    Conflict,
    /// Socket level failure other than a read timeout
    TransportFailure,
    /// Anything else
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::MalformedInput => write!(f, "malformed input"),
            ErrorKind::NotFound => write!(f, "not found"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::TransportFailure => write!(f, "transport failure"),
            ErrorKind::Internal => write!(f, "internal error"),
        }
    }
}

/// Decoder error types
#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("Malformed descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Stream not associated: {0}")]
    StreamNotAssociated(StreamId),

    #[error("Schema not registered: {0}")]
    SchemaNotRegistered(String),

    #[error("Message {message} not found in package {package}")]
    MessageNotFound { package: String, message: String },

    #[error("Stream {stream} is already associated with {package}/{message}")]
    Conflict {
        stream: StreamId,
        package: String,
        message: String,
    },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),

    #[error("Control dispatch is not enabled")]
    DispatchDisabled,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed with status {status}")]
    Http { status: u16 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{}", join_batch(.0))]
    Batch(Vec<DecoderError>),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_batch(errors: &[DecoderError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl DecoderError {
    /// Taxonomy bucket for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DecoderError::MalformedDescriptor(_)
            | DecoderError::InvalidInput(_)
            | DecoderError::Decode(_)
            | DecoderError::Encode(_)
            | DecoderError::FrameTooLarge(..) => ErrorKind::MalformedInput,
            DecoderError::StreamNotAssociated(_)
            | DecoderError::SchemaNotRegistered(_)
            | DecoderError::MessageNotFound { .. }
            | DecoderError::DispatchDisabled => ErrorKind::NotFound,
            DecoderError::Conflict { .. } => ErrorKind::Conflict,
            DecoderError::Connection(_) | DecoderError::Io(_) | DecoderError::Http { .. } => {
                ErrorKind::TransportFailure
            }
            DecoderError::Config(_) | DecoderError::Batch(_) | DecoderError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Stable code reported in control-plane error bodies
    pub fn error_code(&self) -> u32 {
        match self {
            DecoderError::MalformedDescriptor(_) => error_codes::MALFORMED_DESCRIPTOR,
            DecoderError::InvalidInput(_) | DecoderError::Decode(_) | DecoderError::Encode(_) => {
                error_codes::INVALID_INPUT
            }
            DecoderError::FrameTooLarge(..) => error_codes::FRAME_TOO_LARGE,
            DecoderError::StreamNotAssociated(_) => error_codes::STREAM_NOT_ASSOCIATED,
            DecoderError::SchemaNotRegistered(_) => error_codes::SCHEMA_NOT_REGISTERED,
            DecoderError::MessageNotFound { .. } => error_codes::MESSAGE_NOT_FOUND,
            DecoderError::DispatchDisabled => error_codes::DISPATCH_DISABLED,
            DecoderError::Conflict { .. } => error_codes::ASSOCIATION_CONFLICT,
            DecoderError::Connection(_) | DecoderError::Io(_) | DecoderError::Http { .. } => {
                error_codes::TRANSPORT_FAILURE
            }
            DecoderError::Config(_) | DecoderError::Batch(_) | DecoderError::Internal(_) => {
                error_codes::INTERNAL_ERROR
            }
        }
    }
}

/// Result type for decoder operations
pub type DecoderResult<T> = Result<T, DecoderError>;

impl From<serde_json::Error> for DecoderError {
    fn from(e: serde_json::Error) -> Self {
        DecoderError::InvalidInput(e.to_string())
    }
}

impl From<prost::DecodeError> for DecoderError {
    fn from(e: prost::DecodeError) -> Self {
        DecoderError::Decode(e.to_string())
    }
}

impl From<reqwest::Error> for DecoderError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => DecoderError::Http {
                status: status.as_u16(),
            },
            None => DecoderError::Connection(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            DecoderError::MalformedDescriptor("x".into()).kind(),
            ErrorKind::MalformedInput
        );
        assert_eq!(
            DecoderError::SchemaNotRegistered("example".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            DecoderError::Conflict {
                stream: StreamId::nil(),
                package: "example".into(),
                message: "Status".into(),
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            DecoderError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe)).kind(),
            ErrorKind::TransportFailure
        );
    }

    #[test]
    fn test_error_codes_are_distinct_per_kind() {
        assert_eq!(
            DecoderError::StreamNotAssociated(StreamId::nil()).error_code(),
            error_codes::STREAM_NOT_ASSOCIATED
        );
        assert_eq!(
            DecoderError::FrameTooLarge(70000, 65535).error_code(),
            error_codes::FRAME_TOO_LARGE
        );
        assert_eq!(
            DecoderError::Http { status: 500 }.error_code(),
            error_codes::TRANSPORT_FAILURE
        );
    }

    #[test]
    fn test_batch_display_joins_messages() {
        let err = DecoderError::Batch(vec![
            DecoderError::SchemaNotRegistered("a".into()),
            DecoderError::Http { status: 500 },
        ]);
        assert_eq!(
            err.to_string(),
            "Schema not registered: a; HTTP request failed with status 500"
        );
    }
}
