//! Seam to the external RTSP control-plane engine.
//!
//! The bridge never speaks RTSP itself. It asks the collaborator to open a
//! stream (DESCRIBE + SETUP), drives play/pause/stop around call lifecycle,
//! and paces keep-alives from the negotiated session timeout. Implementations
//! should bound their network calls with their own timeouts: they run inline
//! on the task that also drives the relay.

use std::time::Duration;

use async_trait::async_trait;
use rtspgate_sdp_core::RtspTransport;

use crate::error::Result;
use crate::types::CallId;

/// Where the RTSP server should send one media kind: the bridge's
/// RTSP-facing local RTP port for that kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointHint {
    /// Local address the bridge will receive on
    pub host: String,
    /// Local RTP port (RTCP is port + 1)
    pub rtp_port: u16,
}

/// Everything the bridge needs back from DESCRIBE + SETUP.
#[derive(Debug, Clone)]
pub struct RtspOpenResponse {
    /// The DESCRIBE body, still unparsed
    pub sdp_body: String,
    /// Host of the RTSP URL; the fallback media source address when a SETUP
    /// response names no `source` parameter
    pub server_host: String,
    /// Negotiated transport for the video stream, when set up
    pub video_transport: Option<RtspTransport>,
    /// Negotiated transport for the audio stream, when set up
    pub audio_transport: Option<RtspTransport>,
    /// Session timeout announced by the server, used to pace keep-alives
    pub session_timeout: Duration,
}

/// The RTSP collaborator. Invoked by the gateway, never invoking it.
#[async_trait]
pub trait RtspSource: Send {
    /// Connect, DESCRIBE and SETUP the stream for a call. A hint of `None`
    /// means the call does not want that media kind and SETUP for it should
    /// be skipped.
    async fn open(
        &mut self,
        call_id: CallId,
        video_hint: Option<EndpointHint>,
        audio_hint: Option<EndpointHint>,
    ) -> Result<RtspOpenResponse>;

    /// Start media flow.
    async fn play(&mut self) -> Result<()>;

    /// Pause media flow.
    async fn pause(&mut self) -> Result<()>;

    /// Tear the session down.
    async fn stop(&mut self) -> Result<()>;

    /// Refresh the session so the server's idle timer does not expire.
    async fn keepalive(&mut self) -> Result<()>;
}
