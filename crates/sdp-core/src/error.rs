//! Error types for SDP and transport header parsing.

use thiserror::Error;

/// Result type alias for SDP operations
pub type Result<T> = std::result::Result<T, SdpError>;

/// Errors produced while parsing SDP bodies or RTSP transport headers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SdpError {
    /// A line could not be parsed
    #[error("malformed SDP line: {line}")]
    Parse { line: String },

    /// A mandatory session field was absent
    #[error("missing mandatory SDP field: {field}")]
    MissingField { field: &'static str },

    /// The RTSP Transport header could not be parsed
    #[error("malformed Transport header: {detail}")]
    BadTransport { detail: String },
}
