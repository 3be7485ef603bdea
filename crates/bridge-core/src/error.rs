//! Error handling for the media bridge.

use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced at the call-admission boundary.
///
/// Relay-loop failures (unreachable peers, short reads) never appear here;
/// they are logged and absorbed so one bad peer cannot stall the others.
#[derive(Error, Debug)]
pub enum Error {
    /// Binding a media socket failed
    #[error("failed to bind media socket at {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The port pool could not produce a bindable RTP/RTCP pair
    #[error("port pool exhausted after {attempts} bind attempts")]
    PortPoolExhausted { attempts: u32 },

    /// SDP offer/answer negotiation failed for a call
    #[error("media negotiation failed: {reason}")]
    Negotiation { reason: String },

    /// The call identifier is not resident in the table
    #[error("unknown call {call_id}")]
    CallNotFound { call_id: i32 },

    /// The RTSP collaborator refused or failed the request
    #[error("rtsp source failed with status {status}")]
    Rtsp { status: u32 },

    /// The SDP document model rejected its input
    #[error(transparent)]
    Sdp(#[from] rtspgate_sdp_core::SdpError),
}

impl Error {
    /// Shorthand for negotiation failures.
    pub fn negotiation(reason: impl Into<String>) -> Error {
        Error::Negotiation { reason: reason.into() }
    }
}
