//! SDP document model for the rtspgate media bridge.
//!
//! This crate owns the parsed representation of SDP bodies exchanged on both
//! legs of the gateway (the SIP offer and the RTSP DESCRIBE answer) and the
//! parsed form of the RTSP `Transport:` response header. The media bridge
//! never touches SDP text directly; it mutates these value types through the
//! accessor surface here and serializes the result with [`std::fmt::Display`].
//!
//! The model is deliberately small: session-level origin/connection, the
//! media sections with their format lists and attributes, and nothing more.
//! Lines the gateway never rewrites (`b=`, `z=`, `k=`, ...) are dropped on
//! parse rather than round-tripped.

mod error;
mod parser;
mod session;
mod transport;

pub use error::{Result, SdpError};
pub use session::{
    ConnectionData, MediaDescription, Origin, SdpAttribute, SdpSession, TimeDescription,
};
pub use transport::RtspTransport;
